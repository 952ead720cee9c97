//! Deferred search-index synchronization
//!
//! This crate provides:
//! - `MutationState`: per-entity-type pending deletes, indexes and full reindex
//! - `IndexingContext`: the scope-owned registry flushed before the database commits
//! - `BulkRequest` / `SearchStore`: the bulk surface a flush talks to
//! - `EntitySource`: reloads entities as documents at flush time
//! - `IndexManager`: the facade business code registers intents through
//! - `MemorySearchStore`: an in-process store for tests and demos
//!
//! # Usage
//!
//! ```ignore
//! let scope = coordinator.ensure_scope();
//! write_product(&scope, 42)?;
//! IndexManager::new(coordinator.clone()).index("Product", 42)?;
//! scope.complete();
//! scope.dispose()?; // flushes to the search store, then commits the database
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bulk;
pub mod indexing;
pub mod manager;
pub mod memory;
pub mod mutation;
pub mod source;
pub mod tokenizer;

pub use bulk::{BulkOperation, BulkRequest, BulkResponse, Document, RefreshPolicy, SearchStore};
pub use indexing::{FlushReport, IndexingContext, IndexingContextProvider};
pub use manager::IndexManager;
pub use memory::{MemorySearchStore, RecordedOperation, RecordedRun};
pub use mutation::{MutationState, PendingMutations};
pub use source::{EntitySource, TableEntitySource};
