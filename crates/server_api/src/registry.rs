//! Registry of owners that currently hold a live connection.
//!
//! One entry per owner: a second connect from the same owner overwrites the
//! first, and a single disconnect removes it. Connection counts are not tracked.

use std::{collections::HashMap, sync::Arc};

use shared::domain::OwnerId;
use tokio::sync::RwLock;
use tracing::debug;

/// Per-owner state captured when the connection was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEntry {
    /// Chaos flag of the session at connect time. Later toggles do not update it.
    pub chaos_enabled: bool,
}

/// Point-in-time copy of the registry. Mutations after it was taken are not visible.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: HashMap<OwnerId, ConnectionEntry>,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, owner: OwnerId) -> Option<ConnectionEntry> {
        self.entries.get(&owner).copied()
    }

    pub fn owners(&self) -> impl Iterator<Item = OwnerId> + '_ {
        self.entries.keys().copied()
    }
}

impl IntoIterator for RegistrySnapshot {
    type Item = (OwnerId, ConnectionEntry);
    type IntoIter = std::collections::hash_map::IntoIter<OwnerId, ConnectionEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<OwnerId, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for `owner`.
    pub async fn register(&self, owner: OwnerId, chaos_enabled: bool) {
        let previous = self
            .entries
            .write()
            .await
            .insert(owner, ConnectionEntry { chaos_enabled });
        debug!(
            owner_id = owner.0,
            chaos_enabled,
            replaced = previous.is_some(),
            "owner registered"
        );
    }

    /// Removes the entry for `owner`. Returns whether an entry existed; absence is not an error.
    pub async fn deregister(&self, owner: OwnerId) -> bool {
        let removed = self.entries.write().await.remove(&owner).is_some();
        debug!(owner_id = owner.0, removed, "owner deregistered");
        removed
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let entries = self.entries.read().await.clone();
        RegistrySnapshot { entries }
    }

    pub async fn get(&self, owner: OwnerId) -> Option<ConnectionEntry> {
        self.entries.read().await.get(&owner).copied()
    }

    pub async fn contains(&self, owner: OwnerId) -> bool {
        self.entries.read().await.contains_key(&owner)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
