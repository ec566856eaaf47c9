//! Transport contract consumed by the hub core
//!
//! The core never touches sockets. Each client owns a [`Transport`] handle
//! for per-connection writes and topic membership, and channels publish
//! through a shared [`PubSubServer`] bound late via [`ServerHandle`].

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::identity::EntityIdentity;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("send queue full")]
    Backpressure,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// True when the error indicates the connection is gone; the owning
    /// client transitions to DISCONNECTED on seeing it.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Per-connection byte sink plus topic membership, assigned at upgrade.
pub trait Transport: Send + Sync {
    /// Write bytes to this connection.
    fn send(&self, bytes: &[u8]) -> std::result::Result<(), TransportError>;

    /// Join a pub/sub topic so topic publishes reach this connection.
    fn subscribe(&self, topic: &str) -> std::result::Result<(), TransportError>;

    fn unsubscribe(&self, topic: &str) -> std::result::Result<(), TransportError>;

    /// Fan a message out to every subscriber of a topic.
    fn publish(&self, topic: &str, bytes: &[u8]) -> std::result::Result<(), TransportError>;

    fn close(&self, code: Option<u16>, reason: Option<&str>);

    /// The id and name assigned to this connection at upgrade.
    fn identity(&self) -> EntityIdentity;
}

/// The shared fan-out side of the transport: one publish reaches every
/// subscriber of the topic, in publish order per topic.
pub trait PubSubServer: Send + Sync {
    fn publish(&self, topic: &str, bytes: &[u8]) -> std::result::Result<(), TransportError>;
}

/// Late-binding cell for the shared [`PubSubServer`]. The hub and every
/// channel hold clones; publishing before a server is bound is an error.
#[derive(Clone, Default)]
pub struct ServerHandle {
    inner: Arc<RwLock<Option<Arc<dyn PubSubServer>>>>,
}

impl ServerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, server: Arc<dyn PubSubServer>) {
        *self.inner.write() = Some(server);
    }

    pub fn is_bound(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn get(&self) -> Option<Arc<dyn PubSubServer>> {
        self.inner.read().clone()
    }

    pub fn publish(&self, topic: &str, bytes: &[u8]) -> Result<()> {
        let server = self.get().ok_or(Error::TransportNotSet)?;
        server.publish(topic, bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CountingServer {
        published: Mutex<Vec<String>>,
    }

    impl PubSubServer for CountingServer {
        fn publish(&self, topic: &str, _bytes: &[u8]) -> std::result::Result<(), TransportError> {
            self.published.lock().push(topic.to_string());
            Ok(())
        }
    }

    #[test]
    fn publish_through_unbound_handle_fails() {
        let handle = ServerHandle::new();
        assert!(matches!(
            handle.publish("global", b"{}"),
            Err(Error::TransportNotSet)
        ));
    }

    #[test]
    fn bound_handle_forwards_publishes() {
        let handle = ServerHandle::new();
        let server = Arc::new(CountingServer {
            published: Mutex::new(Vec::new()),
        });
        handle.bind(server.clone());
        assert!(handle.is_bound());
        handle.publish("global", b"{}").unwrap();
        assert_eq!(server.published.lock().as_slice(), ["global"]);
    }
}
