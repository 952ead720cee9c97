//! Error types for Tandem
//!
//! This module defines every error the coordination layer can surface.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors fall into three classes:
//! - **Sequence errors**: misuse of the scope API (out-of-order dispose,
//!   unregistered context kinds). These are fatal; see [`Error::is_fatal`].
//! - **No active transaction**: a transactional context was requested
//!   under a suppressed scope. Kept distinct so callers can tell it apart
//!   from a sequence violation.
//! - **Resource errors**: a database commit or search flush failed. These
//!   propagate out of `dispose()` and abort the rest of the disposal chain.

use crate::types::ScopeId;
use std::io;
use thiserror::Error;

/// Result type alias for Tandem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the coordination layer
#[derive(Debug, Error)]
pub enum Error {
    /// A scope was disposed while another scope sat on top of the stack
    #[error(
        "Scope disposed out of order: expected {expected} on top of stack, found {}",
        describe_top(.found)
    )]
    ScopeOrderViolation {
        /// Scope that was being disposed
        expected: ScopeId,
        /// Scope actually on top of the stack, `None` if the stack was empty
        found: Option<ScopeId>,
    },

    /// No provider is registered for the requested context kind
    #[error("No resource context provider registered for kind '{kind}'")]
    NoProvider {
        /// Kind tag that was requested
        kind: &'static str,
    },

    /// A provider for this kind was already registered
    #[error("Resource context provider for kind '{kind}' registered twice")]
    DuplicateProvider {
        /// Kind tag registered twice
        kind: &'static str,
    },

    /// The context stored under a kind tag is not of the requested type
    #[error("Resource context for kind '{kind}' has an unexpected type")]
    ContextTypeMismatch {
        /// Kind tag whose context failed to downcast
        kind: &'static str,
    },

    /// The scope was already disposed
    #[error("Scope {scope} is already disposed")]
    ScopeDisposed {
        /// Disposed scope
        scope: ScopeId,
    },

    /// A transactional context was requested outside any transaction
    #[error("No active transaction in scope {scope}")]
    NoActiveTransaction {
        /// Scope that suppresses transactions
        scope: ScopeId,
    },

    /// The database transaction outlived its timeout
    #[error("Transaction in scope {scope} timed out after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    TransactionTimeout {
        /// Owning scope
        scope: ScopeId,
        /// Elapsed time at commit
        elapsed_ms: u64,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// No data source is registered under this name
    #[error("Unknown data source '{name}'")]
    UnknownDataSource {
        /// Requested data-source name
        name: String,
    },

    /// Database collaborator failure
    #[error("Database error: {message}")]
    Database {
        /// Description from the database layer
        message: String,
    },

    /// Search store collaborator failure
    #[error("Search error: {message}")]
    Search {
        /// Description from the search layer
        message: String,
    },

    /// Configuration could not be read or parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error (config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe_top(found: &Option<ScopeId>) -> String {
    match found {
        Some(scope) => scope.to_string(),
        None => "an empty stack".to_string(),
    }
}

impl Error {
    /// Build a database error
    pub fn database(message: impl Into<String>) -> Self {
        Error::Database {
            message: message.into(),
        }
    }

    /// Build a search error
    pub fn search(message: impl Into<String>) -> Self {
        Error::Search {
            message: message.into(),
        }
    }

    /// Build an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    /// True for programming-sequence violations
    ///
    /// These are never retried or swallowed: they indicate a bug in the
    /// calling code rather than a failing resource.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ScopeOrderViolation { .. }
                | Error::NoProvider { .. }
                | Error::DuplicateProvider { .. }
                | Error::ContextTypeMismatch { .. }
                | Error::ScopeDisposed { .. }
        )
    }

    /// True when a transactional context was requested under a suppressed scope
    pub fn is_no_active_transaction(&self) -> bool {
        matches!(self, Error::NoActiveTransaction { .. })
    }
}
