//! Indexing context: the scope's deferred mutation registry
//!
//! Index and delete intents registered during a scope are held here and
//! resolved into a single bulk request when the scope commits. The flush
//! runs in `on_before_commit`, before the scope's database transaction
//! commits, so a failing flush abandons the whole scope.
//!
//! Flush algorithm:
//! 1. Nothing registered: no-op.
//! 2. Open a nested scope (joins the committing scope and its transaction).
//! 3. Per entity type with pending state, in entity-type order:
//!    - full reindex requested: load all, queue one `index_many`
//!    - otherwise: queue `delete` (one key) or `delete_many` (more), then
//!      load the index set and queue `index` (one key) or `index_many`
//!      (more), dropping keys whose load finds nothing
//! 4. Run the request against the store (skipped when nothing was queued).
//! 5. Complete the nested scope on success; on failure dispose it
//!    uncompleted and surface the original error.
//!
//! Only registrations not yet sent are flushed. Anything registered after
//! a flush (for example by another context's before-commit hook) makes
//! the context report pending work, and the committing scope flushes it
//! again before the database commits.

use crate::bulk::{BulkRequest, RefreshPolicy, SearchStore};
use crate::mutation::{MutationState, PendingMutations};
use crate::source::EntitySource;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_concurrency::{
    ContextKind, ContextType, ResourceContext, ResourceContextProvider, Scope, ScopeCoordinator,
    ScopeInfo,
};
use tandem_core::{EntityKey, EntityType, Result, ScopeId};
use tracing::{debug, trace, warn};

/// What one flush sent to the search store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Bulk operations queued
    pub operations: usize,
    /// Documents queued for indexing
    pub indexed: usize,
    /// Keys queued for deletion
    pub deleted: usize,
    /// Index-set keys dropped because their entity no longer exists
    pub skipped: usize,
    /// Entity types fully reindexed
    pub full_reindexes: Vec<EntityType>,
    /// Whether the store was called at all
    pub ran: bool,
}

/// Deferred mutation registry owned by one scope
pub struct IndexingContext {
    scope: ScopeId,
    store: Arc<dyn SearchStore>,
    entities: Arc<dyn EntitySource>,
    refresh: RefreshPolicy,
    /// Every registration of the scope; decides what a registration changes
    states: BTreeMap<EntityType, MutationState>,
    /// Changes not yet sent to the store
    unflushed: BTreeMap<EntityType, MutationState>,
    completed: bool,
    last_flush: Option<FlushReport>,
}

impl IndexingContext {
    /// Create an empty registry for `scope`
    pub fn new(
        scope: ScopeId,
        store: Arc<dyn SearchStore>,
        entities: Arc<dyn EntitySource>,
        refresh: RefreshPolicy,
    ) -> Self {
        Self {
            scope,
            store,
            entities,
            refresh,
            states: BTreeMap::new(),
            unflushed: BTreeMap::new(),
            completed: false,
            last_flush: None,
        }
    }

    /// Register `key` of `entity_type` for (re)indexing at commit
    ///
    /// Returns whether the registration changed the pending state.
    pub fn register_index(
        &mut self,
        entity_type: impl Into<EntityType>,
        key: impl Into<EntityKey>,
    ) -> bool {
        let entity_type = entity_type.into();
        let key = key.into();
        trace!(target: "tandem::index", scope = %self.scope, entity_type = %entity_type, key = %key, "register index");
        let changed = self
            .states
            .entry(entity_type.clone())
            .or_default()
            .register_index(key.clone());
        if changed {
            self.unflushed.entry(entity_type).or_default().register_index(key);
        }
        changed
    }

    /// Register `key` of `entity_type` for deletion at commit
    ///
    /// Returns whether the registration changed the pending state.
    pub fn register_delete(
        &mut self,
        entity_type: impl Into<EntityType>,
        key: impl Into<EntityKey>,
    ) -> bool {
        let entity_type = entity_type.into();
        let key = key.into();
        trace!(target: "tandem::index", scope = %self.scope, entity_type = %entity_type, key = %key, "register delete");
        let changed = self
            .states
            .entry(entity_type.clone())
            .or_default()
            .register_delete(key.clone());
        if changed {
            self.unflushed.entry(entity_type).or_default().register_delete(key);
        }
        changed
    }

    /// Request a full reindex of `entity_type` at commit
    ///
    /// Returns `false` if one was already requested in this scope.
    pub fn request_full_reindex(&mut self, entity_type: impl Into<EntityType>) -> bool {
        let entity_type = entity_type.into();
        debug!(target: "tandem::index", scope = %self.scope, entity_type = %entity_type, "Full reindex requested");
        let changed = self
            .states
            .entry(entity_type.clone())
            .or_default()
            .request_full_reindex();
        if changed {
            self.unflushed
                .entry(entity_type)
                .or_default()
                .request_full_reindex();
        }
        changed
    }

    /// Everything registered for one entity type in this scope
    pub fn state(&self, entity_type: &EntityType) -> Option<&MutationState> {
        self.states.get(entity_type)
    }

    /// Summary of what a flush would send right now
    pub fn pending(&self) -> PendingMutations {
        let mut pending = PendingMutations::default();
        for state in self.unflushed.values() {
            pending.add(state);
        }
        pending
    }

    /// True once the owning scope has completed
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Report of the flush, once it ran
    pub fn last_flush(&self) -> Option<&FlushReport> {
        self.last_flush.as_ref()
    }

    fn has_unflushed(&self) -> bool {
        !self.unflushed.values().all(MutationState::is_empty)
    }

    fn flush(&mut self, coordinator: &ScopeCoordinator) -> Result<()> {
        if !self.has_unflushed() {
            trace!(target: "tandem::index", scope = %self.scope, "Nothing to flush");
            return Ok(());
        }

        let nested = coordinator.ensure_scope();
        match self.build_and_run(&nested) {
            Ok(report) => {
                nested.complete();
                nested.dispose()?;
                self.unflushed.clear();
                debug!(
                    target: "tandem::index",
                    scope = %self.scope,
                    operations = report.operations,
                    indexed = report.indexed,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    full_reindexes = report.full_reindexes.len(),
                    "Index mutations flushed"
                );
                self.last_flush = Some(report);
                Ok(())
            }
            Err(e) => {
                warn!(target: "tandem::index", scope = %self.scope, error = %e, "Index flush failed");
                if let Err(dispose_err) = nested.dispose() {
                    warn!(target: "tandem::index", scope = %self.scope, error = %dispose_err, "Disposing flush scope failed");
                }
                Err(e)
            }
        }
    }

    fn build_and_run(&self, nested: &Scope) -> Result<FlushReport> {
        let mut request = BulkRequest::new();
        let mut report = FlushReport::default();

        for (entity_type, state) in &self.unflushed {
            if state.is_empty() {
                continue;
            }

            if state.is_full_reindex() {
                let documents = self.entities.load_all(nested, entity_type)?;
                report.indexed += documents.len();
                report.full_reindexes.push(entity_type.clone());
                request.index_many(entity_type.clone(), documents);
                continue;
            }

            let deletes: Vec<EntityKey> = state.deletes().iter().cloned().collect();
            report.deleted += deletes.len();
            match deletes.len() {
                0 => {}
                1 => {
                    request.delete(entity_type.clone(), deletes[0].clone());
                }
                _ => {
                    request.delete_many(entity_type.clone(), deletes);
                }
            }

            let indexes: Vec<EntityKey> = state.indexes().iter().cloned().collect();
            match indexes.len() {
                0 => {}
                1 => match self.entities.load(nested, entity_type, &indexes[0])? {
                    Some(document) => {
                        report.indexed += 1;
                        request.index(entity_type.clone(), document);
                    }
                    None => report.skipped += 1,
                },
                _ => {
                    let documents = self.entities.load_many(nested, entity_type, &indexes)?;
                    report.skipped += indexes.len().saturating_sub(documents.len());
                    report.indexed += documents.len();
                    if !documents.is_empty() {
                        request.index_many(entity_type.clone(), documents);
                    }
                }
            }
        }

        report.operations = request.len();
        if request.is_empty() {
            return Ok(report);
        }

        self.store.run(request, self.refresh)?;
        report.ran = true;
        Ok(report)
    }
}

impl ContextType for IndexingContext {
    const KIND: ContextKind = ContextKind::new("indexing");
}

impl ResourceContext for IndexingContext {
    fn kind(&self) -> ContextKind {
        Self::KIND
    }

    fn mark_complete(&mut self) {
        self.completed = true;
    }

    fn on_before_commit(&mut self, coordinator: &ScopeCoordinator) -> Result<()> {
        if !self.completed {
            return Ok(());
        }
        self.flush(coordinator)
    }

    fn has_pending_work(&self) -> bool {
        self.completed && self.has_unflushed()
    }

    fn on_rollback(&mut self) -> Result<()> {
        let pending = self.pending();
        if !pending.is_empty() {
            debug!(
                target: "tandem::index",
                scope = %self.scope,
                deletes = pending.deletes,
                indexes = pending.indexes,
                full_reindexes = pending.full_reindexes,
                "Pending index mutations discarded"
            );
        }
        self.states.clear();
        self.unflushed.clear();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Provider creating one [`IndexingContext`] per scope
#[derive(Clone)]
pub struct IndexingContextProvider {
    store: Arc<dyn SearchStore>,
    entities: Arc<dyn EntitySource>,
    refresh: RefreshPolicy,
}

impl IndexingContextProvider {
    /// Create a provider flushing to `store`, loading through `entities`
    pub fn new(store: Arc<dyn SearchStore>, entities: Arc<dyn EntitySource>) -> Self {
        Self {
            store,
            entities,
            refresh: RefreshPolicy::default(),
        }
    }

    /// Builder: set the refresh policy of every flush
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    /// Refresh policy passed to the store
    pub fn refresh(&self) -> RefreshPolicy {
        self.refresh
    }
}

impl std::fmt::Debug for IndexingContextProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingContextProvider")
            .field("refresh", &self.refresh)
            .finish()
    }
}

impl ResourceContextProvider for IndexingContextProvider {
    fn kind(&self) -> ContextKind {
        IndexingContext::KIND
    }

    fn create(&self, scope: &ScopeInfo) -> Result<Box<dyn ResourceContext>> {
        Ok(Box::new(IndexingContext::new(
            scope.id,
            Arc::clone(&self.store),
            Arc::clone(&self.entities),
            self.refresh,
        )))
    }
}
