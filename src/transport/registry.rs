//! Concurrency-safe id → endpoint map.
//!
//! The server keeps one registry per transport: stream writers inserted at
//! accept time, datagram addresses inserted when a datagram is first seen.
//! Every mutation and iteration goes through this type. Lookups never wait
//! for an entry to appear.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::ConnectionId;

/// Id-keyed map guarded by an `RwLock`.
#[derive(Debug)]
pub struct ConnectionRegistry<V> {
    entries: RwLock<HashMap<ConnectionId, V>>,
}

impl<V: Clone> ConnectionRegistry<V> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the entry for `id`, returning the old value.
    pub fn insert(&self, id: ConnectionId, value: V) -> Option<V> {
        self.entries
            .write()
            .expect("ConnectionRegistry lock poisoned")
            .insert(id, value)
    }

    /// Remove the entry for `id`.
    pub fn remove(&self, id: ConnectionId) -> Option<V> {
        self.entries
            .write()
            .expect("ConnectionRegistry lock poisoned")
            .remove(&id)
    }

    /// Clone of the entry for `id`.
    pub fn get(&self, id: ConnectionId) -> Option<V> {
        self.entries
            .read()
            .expect("ConnectionRegistry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Whether `id` has an entry.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries
            .read()
            .expect("ConnectionRegistry lock poisoned")
            .contains_key(&id)
    }

    /// Copy of every entry at call time, sorted by id.
    ///
    /// The lock is released before returning, so callers can send to each
    /// entry while other tasks insert or remove.
    pub fn snapshot(&self) -> Vec<(ConnectionId, V)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .expect("ConnectionRegistry lock poisoned")
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Ids present at call time, sorted.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.snapshot().into_iter().map(|(id, _)| id).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("ConnectionRegistry lock poisoned")
            .len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for ConnectionRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}
