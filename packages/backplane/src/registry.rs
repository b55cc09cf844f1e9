//! Process-local registry of the connections whose sockets this server holds.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::{Result, TransportError, ensure_not_empty};
use crate::heartbeat::ConnectionCountProvider;
use crate::message::HubMessage;

/// A connection held by this process, as exposed by the transport host.
#[async_trait]
pub trait HubConnection: Send + Sync {
    fn connection_id(&self) -> &str;

    /// Authenticated user behind the connection, if the host knows one
    fn user_id(&self) -> Option<&str> {
        None
    }

    /// Write one message to the connection's socket.
    async fn send(&self, message: &HubMessage) -> Result<(), TransportError>;
}

pub type ConnectionHandle = Arc<dyn HubConnection>;

/// Concurrent map connection id -> handle. Independent keys never contend.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` under `id`. Returns false, without replacing anything,
    /// when `id` is already registered.
    pub fn try_add(&self, id: &str, handle: ConnectionHandle) -> Result<bool> {
        ensure_not_empty("connection_id", id)?;
        match self.connections.entry(id.to_string()) {
            Entry::Occupied(_) => {
                debug!(connection_id = id, "connection already registered");
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(true)
            }
        }
    }

    /// Remove `id`. Returns false when it was not registered.
    pub fn try_remove(&self, id: &str) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Result<Option<ConnectionHandle>> {
        ensure_not_empty("connection_id", id)?;
        Ok(self.connections.get(id).map(|entry| entry.value().clone()))
    }

    /// Snapshot of every registered handle
    pub fn all(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl ConnectionCountProvider for ConnectionRegistry {
    fn connection_count(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackplaneError;
    use crate::test_helpers::RecordingConnection;

    #[test]
    fn add_and_get() {
        let registry = ConnectionRegistry::new();
        let conn = RecordingConnection::new("c1");
        assert!(registry.try_add("c1", conn.clone()).unwrap());

        let found = registry.get("c1").unwrap().expect("registered");
        assert_eq!(found.connection_id(), "c1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_add_keeps_first_handle() {
        let registry = ConnectionRegistry::new();
        let first = RecordingConnection::with_user("c1", "alice");
        let second = RecordingConnection::with_user("c1", "bob");

        assert!(registry.try_add("c1", first).unwrap());
        assert!(!registry.try_add("c1", second).unwrap());

        let found = registry.get("c1").unwrap().unwrap();
        assert_eq!(found.user_id(), Some("alice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .try_add("", RecordingConnection::new("x"))
            .unwrap_err();
        assert!(matches!(err, BackplaneError::InvalidArgument { .. }));
        assert!(registry.get("").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        registry.try_add("c1", RecordingConnection::new("c1")).unwrap();
        assert!(registry.try_remove("c1"));
        assert!(!registry.try_remove("c1"));
        assert!(!registry.try_remove("never-added"));
        assert!(registry.get("c1").unwrap().is_none());
    }

    #[test]
    fn all_is_a_snapshot() {
        let registry = ConnectionRegistry::new();
        for id in ["a", "b", "c"] {
            registry.try_add(id, RecordingConnection::new(id)).unwrap();
        }
        let snapshot = registry.all();
        registry.try_remove("a");
        assert_eq!(snapshot.len(), 3);
        assert_eq!(registry.connection_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_remove() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("c{i}");
                registry.try_add(&id, RecordingConnection::new(&id)).unwrap();
                if i % 2 == 0 {
                    registry.try_remove(&id);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.len(), 32);
    }
}
