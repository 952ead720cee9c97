//! Tandem - unit-of-work coordination across a relational store and a search index
//!
//! Business operations open a scope, touch the database and register search
//! index intents; when the outermost scope commits, the pending index
//! mutations are flushed in one bulk request *before* the database
//! transaction commits, so a failing flush rolls the database back too.
//!
//! # Quick Start
//!
//! ```ignore
//! use tandem::{Tandem, MemoryDataSource, MemorySearchStore, TableEntitySource};
//!
//! let tandem = Tandem::builder()
//!     .data_source(Arc::new(MemoryDataSource::new("main")))
//!     .search(Arc::new(MemorySearchStore::new()), Arc::new(TableEntitySource::new("main")))
//!     .build()?;
//!
//! let flow = tandem.flow();
//! let scope = flow.ensure_scope();
//! with_connection::<MemoryConnection, _>(&scope, "main", |conn| conn.put("Product", 1, "{}"))?;
//! tandem.index_manager(&flow).index("Product", 1)?;
//! scope.complete();
//! scope.dispose()?;
//! ```
//!
//! # Architecture
//!
//! - `tandem-core`: error taxonomy and identifiers
//! - `tandem-concurrency`: scopes, the per-flow coordinator, resource contexts
//! - `tandem-search`: the deferred mutation registry and bulk flush
//! - `tandem-engine`: configuration and runtime wiring

pub use tandem_concurrency::{
    with_connection, Connection, ContextKind, ContextType, DataSource, DatabaseContext,
    DatabaseContextProvider, MemoryConnection, MemoryDataSource, MemoryStats, ProviderRegistry,
    ResourceContext, ResourceContextProvider, Scope, ScopeCoordinator, ScopeInfo, ScopeStats,
    TransactionStatus,
};
pub use tandem_core::{
    EntityKey, EntityType, Error, FlowId, Result, ScopeId, TransactionIntent,
};
pub use tandem_engine::{SearchConfig, Tandem, TandemBuilder, TandemConfig, CONFIG_FILE_NAME};
pub use tandem_search::{
    BulkOperation, BulkRequest, BulkResponse, Document, EntitySource, FlushReport, IndexManager,
    IndexingContext, IndexingContextProvider, MemorySearchStore, MutationState,
    PendingMutations, RecordedOperation, RecordedRun, RefreshPolicy, SearchStore,
    TableEntitySource,
};
