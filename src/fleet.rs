//! Fleet launcher
//!
//! Starts one proxy lifecycle per configured mapping as an independent task
//! and waits for all of them. No ordering between lifecycles; one hostname's
//! terminal error is logged here and never aborts the others.

use crate::config::{AppContext, ProxyMapping};
use crate::lifecycle;
use crate::overlay::Overlay;
use std::sync::Arc;
use tracing::{error, info};

/// Launch every mapping and block until all lifecycles have terminated.
///
/// In steady state lifecycles serve forever, so this returns only when every
/// accept loop has been lost (or the mapping set was empty).
pub async fn run_all<O: Overlay>(ctx: AppContext, overlay: Arc<O>, mappings: Vec<ProxyMapping>) {
    let mut handles = Vec::with_capacity(mappings.len());

    for mapping in mappings {
        let ctx = ctx.clone();
        let overlay = Arc::clone(&overlay);
        handles.push(tokio::spawn(async move {
            let result =
                lifecycle::run(&ctx, overlay.as_ref(), &mapping.hostname, &mapping.origin).await;
            (mapping.hostname, result)
        }));
    }

    for handle in handles {
        match handle.await {
            Ok((hostname, Ok(()))) => info!(hostname, "proxy lifecycle finished"),
            Ok((hostname, Err(e))) => error!(hostname, error = %e, "error serving proxy"),
            Err(e) => error!(error = %e, "proxy task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::LoopbackOverlay;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_mapping_set_returns_immediately() {
        let root = tempfile::tempdir().unwrap();
        let ctx = AppContext {
            state_root: root.path().to_path_buf(),
        };

        let done = tokio::time::timeout(
            Duration::from_secs(1),
            run_all(ctx, Arc::new(LoopbackOverlay::new()), Vec::new()),
        )
        .await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn test_failed_lifecycle_does_not_block_join() {
        let root = tempfile::tempdir().unwrap();
        let ctx = AppContext {
            state_root: root.path().to_path_buf(),
        };

        // Resolving this origin fails, so the lifecycle terminates and the
        // launcher's join completes.
        let mappings = vec![ProxyMapping {
            hostname: "broken".to_string(),
            origin: "not a url".to_string(),
        }];

        let done = tokio::time::timeout(
            Duration::from_secs(5),
            run_all(ctx, Arc::new(LoopbackOverlay::new()), mappings),
        )
        .await;
        assert!(done.is_ok());
    }
}
