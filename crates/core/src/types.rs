//! Core types for Tandem
//!
//! This module defines the foundational types:
//! - FlowId: Identifier for one logical execution flow (one scope stack)
//! - ScopeId: Identifier for a scope within a flow
//! - TransactionIntent: What a scope asks of the transactional stores
//! - EntityType / EntityKey: Addressing for deferred index mutations

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a logical execution flow
///
/// Every `ScopeCoordinator` owns exactly one ambient stack and carries a
/// FlowId so log lines from concurrent flows can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(Uuid);

impl FlowId {
    /// Create a new random FlowId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the raw bytes of this FlowId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a scope, unique within its flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Wrap a raw id
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Transactional intent of a scope
///
/// ```text
/// ensure_scope()           -> Required   (or a pass-through handle: None)
/// begin_new_transaction()  -> RequiresNew
/// begin_suppressed()       -> Suppress
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionIntent {
    /// Handle that joins another scope and owns nothing
    None,
    /// Owning scope created because no ambient scope existed
    Required,
    /// Owning scope independent of any outer scope
    RequiresNew,
    /// Owning scope that refuses transactional contexts
    Suppress,
}

impl TransactionIntent {
    /// Whether transactional contexts may be created under this intent
    pub fn allows_transaction(&self) -> bool {
        !matches!(self, TransactionIntent::Suppress)
    }
}

impl fmt::Display for TransactionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionIntent::None => write!(f, "none"),
            TransactionIntent::Required => write!(f, "required"),
            TransactionIntent::RequiresNew => write!(f, "requires_new"),
            TransactionIntent::Suppress => write!(f, "suppress"),
        }
    }
}

/// Name of an indexed entity type (e.g. "Product")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityType(String);

impl EntityType {
    /// Create a new entity type name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, totally ordered entity key
///
/// A single representation covers both single-column keys (`Int`, `Text`)
/// and multi-column keys (`Composite`). Ordering is derived, so keys of the
/// same shape sort naturally and flushes are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKey {
    /// Integer key
    Int(i64),
    /// String key
    Text(String),
    /// Multi-part key, compared part by part
    Composite(Vec<EntityKey>),
}

impl EntityKey {
    /// Build a composite key from parts
    pub fn composite<I, K>(parts: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<EntityKey>,
    {
        EntityKey::Composite(parts.into_iter().map(Into::into).collect())
    }
}

impl From<i64> for EntityKey {
    fn from(v: i64) -> Self {
        EntityKey::Int(v)
    }
}

impl From<i32> for EntityKey {
    fn from(v: i32) -> Self {
        EntityKey::Int(v as i64)
    }
}

impl From<u32> for EntityKey {
    fn from(v: u32) -> Self {
        EntityKey::Int(v as i64)
    }
}

impl From<&str> for EntityKey {
    fn from(v: &str) -> Self {
        EntityKey::Text(v.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(v: String) -> Self {
        EntityKey::Text(v)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(v) => write!(f, "{}", v),
            EntityKey::Text(s) => f.write_str(s),
            EntityKey::Composite(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", part)?;
                }
                write!(f, ")")
            }
        }
    }
}
