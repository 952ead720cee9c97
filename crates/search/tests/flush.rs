//! Indexing flush integration tests
//!
//! Runs whole units of work against the in-process data source and search
//! store:
//!
//! 1. **Resolution** - registrations resolve to the right bulk operations
//! 2. **Ordering** - the flush runs before the database commits and sees its writes
//! 3. **Failure** - a failing flush rolls the database back
//! 4. **Facade** - `IndexManager` inside and outside a unit of work

use proptest::prelude::*;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tandem_concurrency::{
    with_connection, ContextKind, ContextType, DatabaseContextProvider, MemoryConnection,
    MemoryDataSource, ProviderRegistry, ResourceContext, ResourceContextProvider, Scope,
    ScopeCoordinator, ScopeInfo,
};
use tandem_core::{EntityKey, EntityType, Error, Result};
use tandem_search::{
    BulkRequest, BulkResponse, IndexManager, IndexingContext, IndexingContextProvider,
    MemorySearchStore, RecordedOperation, RefreshPolicy, SearchStore, TableEntitySource,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Search store that snapshots the data source's commit count on every run
struct ObservingStore {
    inner: MemorySearchStore,
    source: MemoryDataSource,
    commits_seen: parking_lot::Mutex<Vec<u64>>,
}

impl SearchStore for ObservingStore {
    fn run(&self, request: BulkRequest, refresh: RefreshPolicy) -> Result<BulkResponse> {
        self.commits_seen.lock().push(self.source.stats().commits);
        self.inner.run(request, refresh)
    }
}

/// Context whose before-commit hook writes an `Audit` row and indexes it
///
/// Created after the indexing context, so its registration arrives once
/// the indexing context has already flushed.
struct AuditTrail;

impl ContextType for AuditTrail {
    const KIND: ContextKind = ContextKind::new("audit-trail");
}

impl ResourceContext for AuditTrail {
    fn kind(&self) -> ContextKind {
        Self::KIND
    }

    fn mark_complete(&mut self) {}

    fn on_before_commit(&mut self, coordinator: &ScopeCoordinator) -> Result<()> {
        let nested = coordinator.ensure_scope();
        with_connection::<MemoryConnection, _>(&nested, "main", |conn| {
            conn.put("Audit", 1, json!({ "event": "product saved" }).to_string())
        })?;
        IndexManager::new(coordinator.clone()).index("Audit", 1)?;
        nested.complete();
        nested.dispose()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct AuditTrailProvider;

impl ResourceContextProvider for AuditTrailProvider {
    fn kind(&self) -> ContextKind {
        AuditTrail::KIND
    }

    fn create(&self, _scope: &ScopeInfo) -> Result<Box<dyn ResourceContext>> {
        Ok(Box::new(AuditTrail))
    }
}

struct Harness {
    coordinator: ScopeCoordinator,
    source: MemoryDataSource,
    store: Arc<ObservingStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_refresh(RefreshPolicy::Immediate)
    }

    fn with_refresh(refresh: RefreshPolicy) -> Self {
        let source = MemoryDataSource::new("main");
        let store = Arc::new(ObservingStore {
            inner: MemorySearchStore::new(),
            source: source.clone(),
            commits_seen: parking_lot::Mutex::new(Vec::new()),
        });

        let database = DatabaseContextProvider::new()
            .with_source(Arc::new(source.clone()))
            .unwrap();
        let indexing = IndexingContextProvider::new(
            Arc::clone(&store) as Arc<dyn SearchStore>,
            Arc::new(TableEntitySource::new("main")),
        )
        .with_refresh(refresh);
        let registry = ProviderRegistry::new()
            .with(Arc::new(database))
            .unwrap()
            .with(Arc::new(indexing))
            .unwrap()
            .with(Arc::new(AuditTrailProvider))
            .unwrap();

        Self {
            coordinator: ScopeCoordinator::new(Arc::new(registry)),
            source,
            store,
        }
    }

    fn manager(&self) -> IndexManager {
        IndexManager::new(self.coordinator.clone())
    }

    fn search(&self) -> &MemorySearchStore {
        &self.store.inner
    }

    fn ops(&self) -> Vec<RecordedOperation> {
        self.search().applied_operations()
    }
}

fn product() -> EntityType {
    EntityType::new("Product")
}

fn save(scope: &Scope, key: i64, name: &str) {
    with_connection::<MemoryConnection, _>(scope, "main", |conn| {
        conn.put("Product", key, json!({ "name": name }).to_string())
    })
    .unwrap();
}

fn remove(scope: &Scope, key: i64) {
    with_connection::<MemoryConnection, _>(scope, "main", |conn| conn.delete("Product", key))
        .unwrap();
}

fn op(name: &'static str, keys: &[i64]) -> RecordedOperation {
    RecordedOperation {
        name,
        entity_type: product(),
        keys: keys.iter().map(|k| EntityKey::Int(*k)).collect(),
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_delete_removes_key_from_index_set() {
    let h = Harness::new();
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);
    h.source.seed("Product", 2, r#"{"name":"desk"}"#);
    let manager = h.manager();

    let scope = h.coordinator.ensure_scope();
    manager.index("Product", 1).unwrap();
    manager.index("Product", 2).unwrap();
    manager.delete("Product", 1).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    let runs = h.search().runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].operations, vec![op("delete", &[1]), op("index", &[2])]);
    assert_eq!(h.search().keys(&product()), vec![EntityKey::Int(2)]);
}

#[test]
fn test_batches_use_many_variants() {
    let h = Harness::new();
    for k in 1..=4 {
        h.source.seed("Product", k, format!(r#"{{"name":"item {}"}}"#, k));
    }

    let scope = h.coordinator.ensure_scope();
    let manager = h.manager();
    manager.delete("Product", 1).unwrap();
    manager.delete("Product", 2).unwrap();
    manager.index("Product", 3).unwrap();
    manager.index("Product", 4).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(h.ops(), vec![op("delete_many", &[1, 2]), op("index_many", &[3, 4])]);
}

#[test]
fn test_full_reindex_overrides_individual_registrations() {
    let h = Harness::new();
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);
    h.source.seed("Product", 2, r#"{"name":"desk"}"#);

    let scope = h.coordinator.ensure_scope();
    let manager = h.manager();
    manager.delete("Product", 1).unwrap();
    assert!(manager.reindex_all("Product").unwrap());
    assert!(!manager.reindex_all("Product").unwrap());
    manager.index("Product", 7).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(h.ops(), vec![op("index_many", &[1, 2])]);
}

#[test]
fn test_missing_entities_are_dropped() {
    let h = Harness::new();
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);

    let scope = h.coordinator.ensure_scope();
    let manager = h.manager();
    manager.index("Product", 1).unwrap();
    manager.index("Product", 99).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(h.ops(), vec![op("index_many", &[1])]);
}

#[test]
fn test_nothing_to_send_skips_the_store() {
    let h = Harness::new();
    let scope = h.coordinator.ensure_scope();
    h.manager().index("Product", 99).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    assert!(h.search().runs().is_empty());
    // The flush still opened a connection to look the entity up
    assert_eq!(h.source.stats().opened, 1);
}

#[test]
fn test_entity_types_flush_in_order() {
    let h = Harness::new();
    h.source.seed("Order", 10, r#"{"total":5}"#);
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);

    let scope = h.coordinator.ensure_scope();
    let manager = h.manager();
    manager.index("Product", 1).unwrap();
    manager.index("Order", 10).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    let names: Vec<_> = h
        .ops()
        .iter()
        .map(|o| o.entity_type.as_str().to_string())
        .collect();
    assert_eq!(names, vec!["Order", "Product"]);
    assert_eq!(h.search().runs().len(), 1);
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_flush_runs_before_database_commit_and_sees_its_writes() {
    let h = Harness::new();
    let scope = h.coordinator.ensure_scope();
    save(&scope, 1, "reading lamp");
    h.manager().index("Product", 1).unwrap();
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(*h.store.commits_seen.lock(), vec![0]);
    assert_eq!(h.source.stats().commits, 1);
    assert_eq!(
        h.search().get(&product(), &EntityKey::Int(1)),
        Some(json!({"name": "reading lamp"}))
    );
    assert_eq!(h.search().search(&product(), "lamp"), vec![EntityKey::Int(1)]);
}

#[test]
fn test_full_reindex_sees_uncommitted_deletes() {
    let h = Harness::new();
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);
    h.source.seed("Product", 2, r#"{"name":"desk"}"#);

    let scope = h.coordinator.ensure_scope();
    remove(&scope, 1);
    save(&scope, 3, "chair");
    h.manager().reindex_all("Product").unwrap();
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(h.ops(), vec![op("index_many", &[2, 3])]);
}

#[test]
fn test_flush_happens_exactly_once() {
    let h = Harness::new();
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);

    let scope = h.coordinator.ensure_scope();
    let manager = h.manager();
    manager.index("Product", 1).unwrap();
    scope.complete();
    // A second complete must not lead to a second flush
    scope.complete();
    scope.dispose().unwrap();

    assert_eq!(h.search().runs().len(), 1);
}

#[test]
fn test_registration_during_commit_phase_is_flushed() {
    let h = Harness::new();
    let scope = h.coordinator.ensure_scope();
    save(&scope, 1, "lamp");
    h.manager().index("Product", 1).unwrap();
    scope
        .with_context_or_create::<AuditTrail, _>(|_| Ok(()))
        .unwrap();
    scope.complete();
    scope.dispose().unwrap();

    let runs = h.search().runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].operations, vec![op("index", &[1])]);
    assert_eq!(
        runs[1].operations,
        vec![RecordedOperation {
            name: "index",
            entity_type: EntityType::new("Audit"),
            keys: vec![EntityKey::Int(1)],
        }]
    );
    // Both flushes ran before the database committed
    assert_eq!(*h.store.commits_seen.lock(), vec![0, 0]);
    assert_eq!(h.source.stats().commits, 1);
    assert!(h.source.get("Audit", &EntityKey::Int(1)).is_some());
    assert_eq!(h.search().keys(&EntityType::new("Audit")), vec![EntityKey::Int(1)]);
}

#[test]
fn test_refresh_policy_reaches_the_store() {
    let h = Harness::with_refresh(RefreshPolicy::WaitFor);
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);
    h.manager().index("Product", 1).unwrap();
    assert_eq!(h.search().runs()[0].refresh, RefreshPolicy::WaitFor);
}

// ============================================================================
// Failure
// ============================================================================

#[test]
fn test_flush_failure_rolls_back_database() {
    let h = Harness::new();
    let scope = h.coordinator.ensure_scope();
    save(&scope, 1, "lamp");
    h.manager().index("Product", 1).unwrap();
    scope.complete();
    h.search().fail_next_run();

    let err = scope.dispose().unwrap_err();
    assert!(matches!(err, Error::Search { .. }));
    assert_eq!(h.source.get("Product", &EntityKey::Int(1)), None);
    assert_eq!(h.source.stats().commits, 0);
    assert!(h.search().is_empty());
    assert_eq!(h.coordinator.depth(), 0);
}

#[test]
fn test_rollback_discards_pending_mutations() {
    let h = Harness::new();
    h.source.seed("Product", 1, r#"{"name":"lamp"}"#);
    let scope = h.coordinator.ensure_scope();
    h.manager().index("Product", 1).unwrap();
    let pending = scope
        .with_context::<IndexingContext, _>(|ctx| ctx.pending())
        .unwrap()
        .unwrap();
    assert_eq!(pending.indexes, 1);
    scope.dispose().unwrap();

    assert!(h.search().runs().is_empty());
}

#[test]
fn test_independent_scope_flushes_even_if_outer_fails() {
    let h = Harness::new();
    let outer = h.coordinator.ensure_scope();
    save(&outer, 1, "outer");
    h.manager().index("Product", 1).unwrap();

    let audit = h.coordinator.begin_new_transaction(None);
    save(&audit, 2, "independent");
    h.manager().index("Product", 2).unwrap();
    audit.complete();
    audit.dispose().unwrap();

    outer.dispose().unwrap();

    assert_eq!(h.ops(), vec![op("index", &[2])]);
    assert_eq!(h.search().keys(&product()), vec![EntityKey::Int(2)]);
}

// ============================================================================
// Facade
// ============================================================================

#[test]
fn test_manager_outside_scope_flushes_immediately() {
    let h = Harness::new();
    h.source.seed("Product", 5, r#"{"name":"stool"}"#);
    assert!(h.manager().index("Product", 5).unwrap());

    assert_eq!(h.coordinator.depth(), 0);
    assert_eq!(h.ops(), vec![op("index", &[5])]);
}

#[test]
fn test_manager_joins_outer_scope() {
    let h = Harness::new();
    h.source.seed("Product", 5, r#"{"name":"stool"}"#);
    let scope = h.coordinator.ensure_scope();
    h.manager().index("Product", 5).unwrap();

    assert!(h.search().runs().is_empty());
    assert!(scope.has_context::<IndexingContext>());
    scope.complete();
    scope.dispose().unwrap();
    assert_eq!(h.search().runs().len(), 1);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_full_reindex_issues_exactly_one_index_many(
        ops in proptest::collection::vec((1i64..8, any::<bool>()), 0..24),
        rows in 0i64..6,
    ) {
        let h = Harness::new();
        for k in 0..rows {
            h.source.seed("Product", k, r#"{"name":"row"}"#);
        }

        let scope = h.coordinator.ensure_scope();
        let manager = h.manager();
        manager.reindex_all("Product").unwrap();
        for (key, is_delete) in ops {
            if is_delete {
                manager.delete("Product", key).unwrap();
            } else {
                manager.index("Product", key).unwrap();
            }
        }
        scope.complete();
        scope.dispose().unwrap();

        let expected: Vec<i64> = (0..rows).collect();
        prop_assert_eq!(h.ops(), vec![op("index_many", &expected)]);
    }
}
