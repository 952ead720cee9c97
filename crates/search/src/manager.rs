//! Index manager: the facade business code uses to keep the search index
//! in step with the primary store
//!
//! Every call joins the ambient scope (or starts one), registers its intent
//! in the scope's indexing context and completes its own handle. Inside an
//! outer unit of work the handle is a pass-through, so the intent is only
//! flushed when the outer scope commits and dropped if it rolls back.
//! Outside any scope the call flushes immediately.

use crate::indexing::IndexingContext;
use tandem_concurrency::ScopeCoordinator;
use tandem_core::{EntityKey, EntityType, Result};

/// Registers index intents against a flow's ambient scope
#[derive(Debug, Clone)]
pub struct IndexManager {
    coordinator: ScopeCoordinator,
}

impl IndexManager {
    /// Create a manager for one flow
    pub fn new(coordinator: ScopeCoordinator) -> Self {
        Self { coordinator }
    }

    /// Coordinator of the flow this manager registers into
    pub fn coordinator(&self) -> &ScopeCoordinator {
        &self.coordinator
    }

    /// (Re)index an entity when the ambient unit of work commits
    ///
    /// Returns whether the registration changed the pending state.
    ///
    /// # Errors
    ///
    /// `NoProvider` if no indexing provider is registered, plus any flush
    /// error when there was no outer scope.
    pub fn index(
        &self,
        entity_type: impl Into<EntityType>,
        key: impl Into<EntityKey>,
    ) -> Result<bool> {
        let (entity_type, key) = (entity_type.into(), key.into());
        self.register(move |ctx| ctx.register_index(entity_type, key))
    }

    /// Remove an entity from the index when the ambient unit of work commits
    ///
    /// # Errors
    ///
    /// As [`IndexManager::index`].
    pub fn delete(
        &self,
        entity_type: impl Into<EntityType>,
        key: impl Into<EntityKey>,
    ) -> Result<bool> {
        let (entity_type, key) = (entity_type.into(), key.into());
        self.register(move |ctx| ctx.register_delete(entity_type, key))
    }

    /// Rebuild the index of an entity type when the ambient unit of work commits
    ///
    /// # Errors
    ///
    /// As [`IndexManager::index`].
    pub fn reindex_all(&self, entity_type: impl Into<EntityType>) -> Result<bool> {
        let entity_type = entity_type.into();
        self.register(move |ctx| ctx.request_full_reindex(entity_type))
    }

    fn register(&self, f: impl FnOnce(&mut IndexingContext) -> bool) -> Result<bool> {
        let scope = self.coordinator.ensure_scope();
        let changed = scope.with_context_or_create::<IndexingContext, _>(|ctx| Ok(f(ctx)))?;
        scope.complete();
        scope.dispose()?;
        Ok(changed)
    }
}
