//! Per-hostname proxy lifecycle
//!
//! One lifecycle per configured hostname: prepare the identity's state
//! directory, join the overlay, pick a forwarding strategy from the resolved
//! origin, then accept and forward inbound connections until the listener
//! fails. A lifecycle's failure never touches its siblings.

use crate::config::AppContext;
use crate::error::json_error_response;
use crate::forward::ForwardingStrategy;
use crate::origin::Origin;
use crate::overlay::Overlay;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Port each identity listens on inside the overlay
pub const OVERLAY_PORT: u16 = 80;

/// Terminal errors for one hostname's lifecycle
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("can't make proxy state directory {path}: {source}")]
    StateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to join overlay as '{hostname}': {source}")]
    Join {
        hostname: String,
        #[source]
        source: crate::overlay::OverlayError,
    },
    #[error("invalid origin for '{hostname}': {source}")]
    InvalidOrigin {
        hostname: String,
        #[source]
        source: crate::origin::InvalidOriginError,
    },
    #[error("accept loop failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// Run one hostname's proxy to completion.
///
/// Returns when the accept loop fails or an earlier step is fatal for this
/// hostname; the overlay identity is released on every exit path.
pub async fn run<O: Overlay>(
    ctx: &AppContext,
    overlay: &O,
    hostname: &str,
    origin_descriptor: &str,
) -> Result<(), LifecycleError> {
    let state_dir = ctx.state_dir(hostname);
    create_state_dir(&state_dir)?;

    let binding = overlay
        .bind(hostname, &state_dir, OVERLAY_PORT)
        .await
        .map_err(|source| LifecycleError::Join {
            hostname: hostname.to_string(),
            source,
        })?;
    info!(hostname, addr = %binding.local_addr, "listening on overlay");

    let result = serve(hostname, origin_descriptor, binding.listener).await;
    overlay.release(hostname);
    result
}

async fn serve(
    hostname: &str,
    origin_descriptor: &str,
    listener: TcpListener,
) -> Result<(), LifecycleError> {
    let origin =
        Origin::resolve(origin_descriptor).map_err(|source| LifecycleError::InvalidOrigin {
            hostname: hostname.to_string(),
            source,
        })?;
    let strategy = Arc::new(ForwardingStrategy::for_origin(&origin));
    info!(hostname, origin = origin_descriptor, "serving");

    loop {
        let (stream, remote) = listener.accept().await.map_err(LifecycleError::Accept)?;
        let strategy = Arc::clone(&strategy);
        let hostname = hostname.to_string();

        // Per-connection work runs on its own task so a slow origin never
        // blocks the accept loop.
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, remote, strategy, &hostname).await {
                debug!(hostname, addr = %remote, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    strategy: Arc<ForwardingStrategy>,
    hostname: &str,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let hostname = hostname.to_string();

    let service = service_fn(move |req: Request<Incoming>| {
        let strategy = Arc::clone(&strategy);
        let hostname = hostname.clone();
        async move {
            match strategy.forward(req, remote).await {
                Ok(response) => Ok::<_, hyper::Error>(response),
                Err(e) => {
                    // Request-scoped failure: surface a gateway error to the
                    // caller, keep the lifecycle alive.
                    error!(hostname, error = %e, "failed to forward request");
                    Ok(json_error_response(
                        e.gateway_code(),
                        "Failed to reach origin",
                    ))
                }
            }
        }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("connection error: {}", e))?;

    Ok(())
}

/// Create a hostname's state directory, idempotently, owner-only on unix
fn create_state_dir(path: &Path) -> Result<(), LifecycleError> {
    let created = {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(path)
        }
        #[cfg(not(unix))]
        {
            std::fs::create_dir_all(path)
        }
    };

    created.map_err(|source| LifecycleError::StateDir {
        path: path.display().to_string(),
        source,
    })
}
