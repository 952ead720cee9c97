//! Core types for Tandem
//!
//! This crate defines the foundational types used throughout the system:
//! - FlowId / ScopeId: Identity of execution flows and their scopes
//! - TransactionIntent: Transactional mode of a scope
//! - EntityType / EntityKey: Addressing for deferred search-index mutations
//! - Error: Error taxonomy shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EntityKey, EntityType, FlowId, ScopeId, TransactionIntent};
