//! Subscriber connection registry
//!
//! Tracks which connections should receive broadcasts right now.

use std::collections::HashMap;

use super::{ConnectionHandle, ConnectionId};

/// Set of live subscriber connections keyed by connection id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Insert a connection; no-op if it is already registered
    ///
    /// Returns true if the connection was newly added
    pub fn add(&mut self, handle: ConnectionHandle) -> bool {
        if self.connections.contains_key(&handle.id()) {
            return false;
        }
        self.connections.insert(handle.id(), handle);
        true
    }

    /// Remove a connection; no-op if absent
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(&id)
    }

    /// Check if a connection is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Current subscriber count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Enumerate registered connections
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.connections.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(1, 4);

        assert!(registry.add(handle.clone()));
        assert!(!registry.add(handle));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut registry = ConnectionRegistry::new();
        let (a, _rx_a) = ConnectionHandle::new(1, 4);
        let (b, _rx_b) = ConnectionHandle::new(2, 4);
        registry.add(a);
        registry.add(b);

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(!registry.contains(1));
        assert!(registry.contains(2));
        assert_eq!(registry.iter().count(), 1);
    }
}
