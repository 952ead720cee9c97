//! Bulk request surface of the search store
//!
//! A flush builds one [`BulkRequest`] from every pending mutation in a
//! scope and hands it to the [`SearchStore`] in a single `run` call. The
//! request keeps the single/batch distinction of the queued operations so
//! stores can map them to their own bulk APIs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tandem_core::{EntityKey, EntityType, Error, Result};

// ============================================================================
// Document
// ============================================================================

/// A search document: the entity key plus its JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Key of the entity the document was built from
    pub key: EntityKey,
    /// Document body as sent to the store
    pub body: Value,
}

impl Document {
    /// Create a document from a key and a JSON body
    pub fn new(key: impl Into<EntityKey>, body: Value) -> Self {
        Self {
            key: key.into(),
            body,
        }
    }

    /// Create a document by serializing `entity`
    ///
    /// # Errors
    ///
    /// Returns `Search` if `entity` cannot be represented as JSON.
    pub fn from_entity<T: Serialize>(key: impl Into<EntityKey>, entity: &T) -> Result<Self> {
        let body = serde_json::to_value(entity)
            .map_err(|e| Error::search(format!("cannot serialize document: {}", e)))?;
        Ok(Self::new(key, body))
    }
}

// ============================================================================
// BulkOperation / BulkRequest
// ============================================================================

/// One queued operation of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Delete a single document
    Delete {
        /// Index the document lives in
        entity_type: EntityType,
        /// Document key
        key: EntityKey,
    },
    /// Delete several documents in one call
    DeleteMany {
        /// Index the documents live in
        entity_type: EntityType,
        /// Document keys
        keys: Vec<EntityKey>,
    },
    /// Index (insert or replace) a single document
    Index {
        /// Target index
        entity_type: EntityType,
        /// Document to store
        document: Document,
    },
    /// Index several documents in one call
    IndexMany {
        /// Target index
        entity_type: EntityType,
        /// Documents to store
        documents: Vec<Document>,
    },
}

impl BulkOperation {
    /// Entity type (index) the operation targets
    pub fn entity_type(&self) -> &EntityType {
        match self {
            BulkOperation::Delete { entity_type, .. }
            | BulkOperation::DeleteMany { entity_type, .. }
            | BulkOperation::Index { entity_type, .. }
            | BulkOperation::IndexMany { entity_type, .. } => entity_type,
        }
    }

    /// Short operation name used in logs and call records
    pub fn name(&self) -> &'static str {
        match self {
            BulkOperation::Delete { .. } => "delete",
            BulkOperation::DeleteMany { .. } => "delete_many",
            BulkOperation::Index { .. } => "index",
            BulkOperation::IndexMany { .. } => "index_many",
        }
    }

    /// Keys touched by the operation, in queue order
    pub fn keys(&self) -> Vec<EntityKey> {
        match self {
            BulkOperation::Delete { key, .. } => vec![key.clone()],
            BulkOperation::DeleteMany { keys, .. } => keys.clone(),
            BulkOperation::Index { document, .. } => vec![document.key.clone()],
            BulkOperation::IndexMany { documents, .. } => {
                documents.iter().map(|d| d.key.clone()).collect()
            }
        }
    }

    /// True for the delete variants
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            BulkOperation::Delete { .. } | BulkOperation::DeleteMany { .. }
        )
    }
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} x{}", self.name(), self.entity_type(), self.keys().len())
    }
}

/// Batch of operations sent to the store in one `run` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkRequest {
    operations: Vec<BulkOperation>,
}

impl BulkRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single delete
    pub fn delete(&mut self, entity_type: EntityType, key: EntityKey) -> &mut Self {
        self.operations
            .push(BulkOperation::Delete { entity_type, key });
        self
    }

    /// Queue a batched delete
    pub fn delete_many(&mut self, entity_type: EntityType, keys: Vec<EntityKey>) -> &mut Self {
        self.operations
            .push(BulkOperation::DeleteMany { entity_type, keys });
        self
    }

    /// Queue a single index
    pub fn index(&mut self, entity_type: EntityType, document: Document) -> &mut Self {
        self.operations.push(BulkOperation::Index {
            entity_type,
            document,
        });
        self
    }

    /// Queue a batched index
    pub fn index_many(&mut self, entity_type: EntityType, documents: Vec<Document>) -> &mut Self {
        self.operations.push(BulkOperation::IndexMany {
            entity_type,
            documents,
        });
        self
    }

    /// Queued operations, in queue order
    pub fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    /// Consume the request, yielding its operations
    pub fn into_operations(self) -> Vec<BulkOperation> {
        self.operations
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True if nothing was queued
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// ============================================================================
// SearchStore
// ============================================================================

/// Whether `run` waits for the index refresh before returning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Return as soon as the store accepted the request
    #[default]
    Immediate,
    /// Return once the changes are visible to searches
    WaitFor,
}

impl RefreshPolicy {
    /// `WaitFor` if `wait` is set, `Immediate` otherwise
    pub fn from_wait(wait: bool) -> Self {
        if wait {
            RefreshPolicy::WaitFor
        } else {
            RefreshPolicy::Immediate
        }
    }
}

/// What a store applied for one bulk request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Operations executed
    pub operations: usize,
    /// Documents indexed
    pub indexed: usize,
    /// Documents deleted (keys absent from the index count too)
    pub deleted: usize,
}

/// Search-store collaborator executing bulk requests
pub trait SearchStore: Send + Sync {
    /// Execute every operation of `request`
    ///
    /// # Errors
    ///
    /// Returns `Search` if the store rejects the request. Stores must not
    /// apply part of a request that fails.
    fn run(&self, request: BulkRequest, refresh: RefreshPolicy) -> Result<BulkResponse>;
}
