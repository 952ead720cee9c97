//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use serde_json::json;
use std::sync::{Arc, Once};
pub use tandem::{
    with_connection, EntityKey, EntityType, Error, IndexManager, MemoryConnection,
    MemoryDataSource, MemorySearchStore, RecordedOperation, Result, Scope, ScopeCoordinator,
    TableEntitySource, Tandem, TandemConfig,
};
use tracing_subscriber::filter::LevelFilter;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness (shown for failing tests only)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(LevelFilter::DEBUG)
            .try_init();
    });
}

// ============================================================================
// TestRuntime
// ============================================================================

/// Runtime over the in-process data source and search store
pub struct TestRuntime {
    pub tandem: Tandem,
    pub source: MemoryDataSource,
    pub store: Arc<MemorySearchStore>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_config(TandemConfig::default())
    }

    pub fn with_config(config: TandemConfig) -> Self {
        init_tracing();
        let source = MemoryDataSource::new("main");
        let store = Arc::new(MemorySearchStore::new());
        let tandem = Tandem::builder()
            .config(config)
            .data_source(Arc::new(source.clone()))
            .search(store.clone(), Arc::new(TableEntitySource::new("main")))
            .build()
            .expect("runtime builds");
        Self {
            tandem,
            source,
            store,
        }
    }

    /// A fresh flow and an index manager bound to it
    pub fn flow(&self) -> (ScopeCoordinator, IndexManager) {
        let flow = self.tandem.flow();
        let manager = self.tandem.index_manager(&flow);
        (flow, manager)
    }

    /// Committed row of the Product table
    pub fn product_row(&self, key: i64) -> Option<String> {
        self.source.get("Product", &EntityKey::Int(key))
    }

    /// Indexed Product keys
    pub fn indexed_products(&self) -> Vec<EntityKey> {
        self.store.keys(&EntityType::new("Product"))
    }

    /// Every operation the store applied
    pub fn applied(&self) -> Vec<RecordedOperation> {
        self.store.applied_operations()
    }
}

// ============================================================================
// Business helpers
// ============================================================================

/// Insert or update a product inside `scope`
pub fn save_product(scope: &Scope, key: i64, name: &str) -> Result<()> {
    with_connection::<MemoryConnection, _>(scope, "main", |conn| {
        conn.put("Product", key, json!({ "name": name }).to_string())
    })
}

/// Delete a product inside `scope`
pub fn delete_product(scope: &Scope, key: i64) -> Result<()> {
    with_connection::<MemoryConnection, _>(scope, "main", |conn| conn.delete("Product", key))
}

/// Repository-style operation: save, then register the index intent, inside
/// whatever unit of work is ambient
pub fn create_product(
    flow: &ScopeCoordinator,
    manager: &IndexManager,
    key: i64,
    name: &str,
) -> Result<()> {
    let scope = flow.ensure_scope();
    save_product(&scope, key, name)?;
    manager.index("Product", key)?;
    scope.complete();
    scope.dispose()
}

/// Repository-style delete
pub fn remove_product(flow: &ScopeCoordinator, manager: &IndexManager, key: i64) -> Result<()> {
    let scope = flow.ensure_scope();
    delete_product(&scope, key)?;
    manager.delete("Product", key)?;
    scope.complete();
    scope.dispose()
}

/// Expected recorded operation on the Product index
pub fn product_op(name: &'static str, keys: &[i64]) -> RecordedOperation {
    RecordedOperation {
        name,
        entity_type: EntityType::new("Product"),
        keys: keys.iter().map(|k| EntityKey::Int(*k)).collect(),
    }
}
