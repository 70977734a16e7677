//! Overlay-network identity binding
//!
//! Joining the overlay is an external capability: given an identity name and
//! a state directory for its persisted credentials, produce a listener that
//! receives all traffic addressed to that identity. The `Overlay` trait keeps
//! the join protocol pluggable; `LoopbackOverlay` is the in-process
//! implementation used for local runs and tests.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum OverlayError {
    /// Another live binding already holds this identity
    #[error("identity '{0}' is already registered on the overlay")]
    IdentityCollision(String),
    /// The identity's credential/state store could not be written
    #[error("failed to persist identity state: {0}")]
    State(#[source] std::io::Error),
    /// The listener could not be bound
    #[error("failed to bind overlay listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// A live identity binding: traffic addressed to the identity arrives on
/// `listener`. Dropping the binding closes the listener; the identity itself
/// is released through [`Overlay::release`].
#[derive(Debug)]
pub struct OverlayBinding {
    pub listener: TcpListener,
    pub local_addr: SocketAddr,
}

/// The overlay-join capability
#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    /// Join the overlay under `identity` and return a TCP listener for
    /// `port`, persisting any join state under `state_dir`.
    async fn bind(
        &self,
        identity: &str,
        state_dir: &Path,
        port: u16,
    ) -> Result<OverlayBinding, OverlayError>;

    /// Release the identity when its lifecycle terminates
    fn release(&self, identity: &str);
}

/// In-process overlay: each identity gets an ephemeral loopback listener and
/// an entry in a shared registry so peers (and tests) can look it up by name.
#[derive(Clone, Default)]
pub struct LoopbackOverlay {
    registry: Arc<DashMap<String, SocketAddr>>,
}

impl LoopbackOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an identity to the address its listener is bound on
    pub fn lookup(&self, identity: &str) -> Option<SocketAddr> {
        self.registry.get(identity).map(|entry| *entry.value())
    }
}

#[async_trait]
impl Overlay for LoopbackOverlay {
    async fn bind(
        &self,
        identity: &str,
        state_dir: &Path,
        _port: u16,
    ) -> Result<OverlayBinding, OverlayError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(OverlayError::Bind)?;
        let local_addr = listener.local_addr().map_err(OverlayError::Bind)?;

        // Stands in for the credential store a real overlay keeps in the
        // state directory.
        std::fs::write(state_dir.join("identity"), identity).map_err(OverlayError::State)?;

        match self.registry.entry(identity.to_string()) {
            Entry::Occupied(_) => {
                return Err(OverlayError::IdentityCollision(identity.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(local_addr);
            }
        }

        info!(identity, addr = %local_addr, "joined overlay");
        Ok(OverlayBinding {
            listener,
            local_addr,
        })
    }

    fn release(&self, identity: &str) {
        self.registry.remove(identity);
        debug!(identity, "released overlay identity");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_registers_identity() {
        let overlay = LoopbackOverlay::new();
        let dir = tempfile::tempdir().unwrap();

        let binding = overlay.bind("web", dir.path(), 80).await.unwrap();
        assert_eq!(overlay.lookup("web"), Some(binding.local_addr));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("identity")).unwrap(),
            "web"
        );
    }

    #[tokio::test]
    async fn test_duplicate_identity_collides() {
        let overlay = LoopbackOverlay::new();
        let dir = tempfile::tempdir().unwrap();

        let _binding = overlay.bind("web", dir.path(), 80).await.unwrap();
        let err = overlay.bind("web", dir.path(), 80).await.unwrap_err();
        assert!(matches!(err, OverlayError::IdentityCollision(_)));
    }

    #[tokio::test]
    async fn test_release_allows_rebind() {
        let overlay = LoopbackOverlay::new();
        let dir = tempfile::tempdir().unwrap();

        let binding = overlay.bind("web", dir.path(), 80).await.unwrap();
        drop(binding);
        overlay.release("web");
        assert_eq!(overlay.lookup("web"), None);

        overlay.bind("web", dir.path(), 80).await.unwrap();
    }

    #[tokio::test]
    async fn test_independent_identities() {
        let overlay = LoopbackOverlay::new();
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let a = overlay.bind("svc-a", dir_a.path(), 80).await.unwrap();
        let b = overlay.bind("svc-b", dir_b.path(), 80).await.unwrap();
        assert_ne!(a.local_addr, b.local_addr);
    }
}
