//! Deferred mutation state for one entity type
//!
//! Tracks which keys must be deleted from and (re)indexed into the search
//! store when the owning scope commits. A key is never in both sets:
//!
//! - a delete removes the key from the index set
//! - an index registration for a key already pending deletion is a no-op
//!
//! So for any sequence of registrations on one key the resolved state is
//! "deleted" as soon as a delete was seen, "indexed" otherwise. A full
//! reindex request overrides both sets at flush time; individual
//! registrations are still recorded but ignored.

use std::collections::BTreeSet;
use tandem_core::EntityKey;

/// Pending search-index mutations for one entity type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationState {
    deletes: BTreeSet<EntityKey>,
    indexes: BTreeSet<EntityKey>,
    full_reindex: bool,
}

impl MutationState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` for (re)indexing
    ///
    /// Returns whether the state changed. Keys pending deletion are left
    /// alone.
    pub fn register_index(&mut self, key: EntityKey) -> bool {
        if self.deletes.contains(&key) {
            return false;
        }
        self.indexes.insert(key)
    }

    /// Register `key` for deletion
    ///
    /// Returns whether the state changed.
    pub fn register_delete(&mut self, key: EntityKey) -> bool {
        let unindexed = self.indexes.remove(&key);
        let inserted = self.deletes.insert(key);
        unindexed || inserted
    }

    /// Request a full reindex of the entity type
    ///
    /// Returns `false` if one was already requested.
    pub fn request_full_reindex(&mut self) -> bool {
        !std::mem::replace(&mut self.full_reindex, true)
    }

    /// True if a full reindex was requested
    pub fn is_full_reindex(&self) -> bool {
        self.full_reindex
    }

    /// Keys pending deletion, in key order
    pub fn deletes(&self) -> &BTreeSet<EntityKey> {
        &self.deletes
    }

    /// Keys pending (re)indexing, in key order
    pub fn indexes(&self) -> &BTreeSet<EntityKey> {
        &self.indexes
    }

    /// True if nothing was registered
    pub fn is_empty(&self) -> bool {
        !self.full_reindex && self.deletes.is_empty() && self.indexes.is_empty()
    }
}

/// Counts of what a scope's indexing context would flush right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingMutations {
    /// Entity types with at least one registration
    pub entity_types: usize,
    /// Keys pending deletion (excluding fully reindexed types)
    pub deletes: usize,
    /// Keys pending indexing (excluding fully reindexed types)
    pub indexes: usize,
    /// Entity types awaiting a full reindex
    pub full_reindexes: usize,
}

impl PendingMutations {
    /// True if a flush would do nothing
    pub fn is_empty(&self) -> bool {
        self.entity_types == 0
    }

    pub(crate) fn add(&mut self, state: &MutationState) {
        if state.is_empty() {
            return;
        }
        self.entity_types += 1;
        if state.is_full_reindex() {
            self.full_reindexes += 1;
        } else {
            self.deletes += state.deletes().len();
            self.indexes += state.indexes().len();
        }
    }
}
