//! Directory of connected agents keyed by identity

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::agent::Agent;

/// Concurrency-safe map from stable identity to the one authoritative entry
#[derive(Debug)]
pub struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
    /// One lock per identity ever seen, held across a registration or removal
    /// and the store update that goes with it
    transitions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Registry of live agent connections
pub type AgentRegistry = Registry<Agent>;

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
        }
    }

    /// Serialize lifecycle transitions for one identity.
    ///
    /// Whoever holds the guard may await collaborators, so a reconnecting
    /// agent cannot interleave its online mark with the offline mark of the
    /// connection it replaces. Other identities are not affected.
    pub async fn lock_identity(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .transitions
            .lock()
            .await
            .entry(identity.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Insert an entry, returning the one it displaced
    pub async fn put(&self, identity: impl Into<String>, entry: Arc<T>) -> Option<Arc<T>> {
        self.entries.write().await.insert(identity.into(), entry)
    }

    /// Insert an entry only if the identity is free.
    ///
    /// On conflict the current holder is returned and nothing changes.
    pub async fn try_put(&self, identity: impl Into<String>, entry: Arc<T>) -> Result<(), Arc<T>> {
        let mut entries = self.entries.write().await;
        match entries.entry(identity.into()) {
            std::collections::hash_map::Entry::Occupied(held) => Err(held.get().clone()),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Look up the entry for an identity
    pub async fn get(&self, identity: &str) -> Option<Arc<T>> {
        self.entries.read().await.get(identity).cloned()
    }

    /// Remove whatever entry holds an identity
    pub async fn remove(&self, identity: &str) -> Option<Arc<T>> {
        self.entries.write().await.remove(identity)
    }

    /// Remove the entry only if it is exactly `entry`.
    ///
    /// A connection that was replaced by a newer one for the same identity
    /// must not unregister its successor.
    pub async fn remove_if_same(&self, identity: &str, entry: &Arc<T>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(identity) {
            Some(current) if Arc::ptr_eq(current, entry) => {
                entries.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Number of registered identities
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is registered
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Registered identities, sorted
    pub async fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.entries.read().await.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Snapshot of every registered entry
    pub async fn agents(&self) -> Vec<Arc<T>> {
        self.entries.read().await.values().cloned().collect()
    }
}
