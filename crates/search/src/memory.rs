//! In-process search store
//!
//! Keeps one map of documents per entity type and records every bulk run
//! so tests can assert on exactly what a flush issued. A run is validated
//! in full before anything is applied, so a failing run leaves the store
//! untouched.

use crate::bulk::{BulkOperation, BulkRequest, BulkResponse, RefreshPolicy, SearchStore};
use crate::tokenizer::{document_terms, tokenize};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tandem_core::{EntityKey, EntityType, Error, Result};
use tracing::debug;

/// One operation as the store received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOperation {
    /// Operation name (`delete`, `delete_many`, `index`, `index_many`)
    pub name: &'static str,
    /// Target entity type
    pub entity_type: EntityType,
    /// Keys in queue order
    pub keys: Vec<EntityKey>,
}

/// One `run` call as the store received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRun {
    /// Refresh policy the caller asked for
    pub refresh: RefreshPolicy,
    /// Operations in queue order
    pub operations: Vec<RecordedOperation>,
    /// Whether the run was applied
    pub applied: bool,
}

/// In-process [`SearchStore`]
#[derive(Default)]
pub struct MemorySearchStore {
    indices: DashMap<EntityType, BTreeMap<EntityKey, Value>>,
    runs: Mutex<Vec<RecordedRun>>,
    fail_next_run: AtomicBool,
}

impl MemorySearchStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `run` fail without applying anything
    pub fn fail_next_run(&self) {
        self.fail_next_run.store(true, Ordering::SeqCst);
    }

    /// Stored document body
    pub fn get(&self, entity_type: &EntityType, key: &EntityKey) -> Option<Value> {
        self.indices
            .get(entity_type)
            .and_then(|docs| docs.get(key).cloned())
    }

    /// Keys stored for an entity type, in key order
    pub fn keys(&self, entity_type: &EntityType) -> Vec<EntityKey> {
        self.indices
            .get(entity_type)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of documents stored for an entity type
    pub fn len(&self, entity_type: &EntityType) -> usize {
        self.indices
            .get(entity_type)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// True if no document of any type is stored
    pub fn is_empty(&self) -> bool {
        self.indices.iter().all(|docs| docs.is_empty())
    }

    /// Keys of the documents containing every term of `query`, in key order
    ///
    /// An empty query matches nothing.
    pub fn search(&self, entity_type: &EntityType, query: &str) -> Vec<EntityKey> {
        let wanted = tokenize(query);
        if wanted.is_empty() {
            return Vec::new();
        }
        let Some(docs) = self.indices.get(entity_type) else {
            return Vec::new();
        };
        docs.iter()
            .filter(|(_, body)| {
                let terms = document_terms(body);
                wanted.iter().all(|t| terms.contains(t))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Every run received so far, applied or not
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().clone()
    }

    /// Operations of the applied runs, flattened in order
    pub fn applied_operations(&self) -> Vec<RecordedOperation> {
        self.runs
            .lock()
            .iter()
            .filter(|run| run.applied)
            .flat_map(|run| run.operations.iter().cloned())
            .collect()
    }

    fn apply(&self, operation: BulkOperation, response: &mut BulkResponse) {
        match operation {
            BulkOperation::Delete { entity_type, key } => {
                self.indices.entry(entity_type).or_default().remove(&key);
                response.deleted += 1;
            }
            BulkOperation::DeleteMany { entity_type, keys } => {
                let mut docs = self.indices.entry(entity_type).or_default();
                for key in keys {
                    docs.remove(&key);
                    response.deleted += 1;
                }
            }
            BulkOperation::Index {
                entity_type,
                document,
            } => {
                self.indices
                    .entry(entity_type)
                    .or_default()
                    .insert(document.key, document.body);
                response.indexed += 1;
            }
            BulkOperation::IndexMany {
                entity_type,
                documents,
            } => {
                let mut docs = self.indices.entry(entity_type).or_default();
                for document in documents {
                    docs.insert(document.key, document.body);
                    response.indexed += 1;
                }
            }
        }
        response.operations += 1;
    }
}

impl SearchStore for MemorySearchStore {
    fn run(&self, request: BulkRequest, refresh: RefreshPolicy) -> Result<BulkResponse> {
        let operations: Vec<RecordedOperation> = request
            .operations()
            .iter()
            .map(|op| RecordedOperation {
                name: op.name(),
                entity_type: op.entity_type().clone(),
                keys: op.keys(),
            })
            .collect();

        if self.fail_next_run.swap(false, Ordering::SeqCst) {
            self.runs.lock().push(RecordedRun {
                refresh,
                operations,
                applied: false,
            });
            return Err(Error::search("bulk request rejected by search store"));
        }

        let mut response = BulkResponse::default();
        for operation in request.into_operations() {
            self.apply(operation, &mut response);
        }
        self.runs.lock().push(RecordedRun {
            refresh,
            operations,
            applied: true,
        });

        debug!(
            target: "tandem::index",
            operations = response.operations,
            indexed = response.indexed,
            deleted = response.deleted,
            refresh = ?refresh,
            "Bulk request applied"
        );
        Ok(response)
    }
}

impl std::fmt::Debug for MemorySearchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySearchStore")
            .field("entity_types", &self.indices.len())
            .field("runs", &self.runs.lock().len())
            .finish()
    }
}
