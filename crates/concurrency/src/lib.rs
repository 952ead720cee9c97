//! Scope coordination layer for Tandem
//!
//! This crate implements the unit-of-work machinery:
//! - ResourceContext: Three-phase commit hook contract for backend state
//! - ProviderRegistry: Lazy, per-kind context creation
//! - Scope: One nested unit of work owning its contexts
//! - ScopeCoordinator: The ambient scope stack of one execution flow
//! - DatabaseContext: One transaction plus its connections per scope
//! - MemoryDataSource: In-process transactional table store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod coordinator;
pub mod database;
pub mod memory;
pub mod scope;

pub use context::{
    ContextKind, ContextType, ProviderRegistry, ResourceContext, ResourceContextProvider,
    ScopeInfo,
};
pub use coordinator::{ScopeCoordinator, ScopeStats};
pub use database::{
    with_connection, Connection, DataSource, DatabaseContext, DatabaseContextProvider,
    TransactionStatus,
};
pub use memory::{MemoryConnection, MemoryDataSource, MemoryStats};
pub use scope::Scope;
