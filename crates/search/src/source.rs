//! Entity source contract
//!
//! At flush time the indexing context reloads the current state of every
//! pending entity from the primary store. Loads run inside the nested scope
//! opened by the flush, which joins the committing scope, so they see the
//! scope's own uncommitted writes.

use crate::bulk::Document;
use serde_json::Value;
use tandem_concurrency::{with_connection, MemoryConnection, Scope};
use tandem_core::{EntityKey, EntityType, Result};

/// Loads entities as search documents
pub trait EntitySource: Send + Sync {
    /// Load one entity; `None` if it no longer exists
    ///
    /// # Errors
    ///
    /// Any error from the underlying store.
    fn load(&self, scope: &Scope, entity_type: &EntityType, key: &EntityKey)
        -> Result<Option<Document>>;

    /// Load several entities, silently dropping the ones that no longer exist
    ///
    /// The default loads one key at a time.
    fn load_many(
        &self,
        scope: &Scope,
        entity_type: &EntityType,
        keys: &[EntityKey],
    ) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(doc) = self.load(scope, entity_type, key)? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }

    /// Load every entity of a type
    fn load_all(&self, scope: &Scope, entity_type: &EntityType) -> Result<Vec<Document>>;
}

/// Entity source reading rows from a [`tandem_concurrency::MemoryDataSource`]
///
/// Each entity type maps to the table of the same name. Row values that
/// parse as JSON become the document body; anything else is indexed as a
/// JSON string.
#[derive(Debug, Clone)]
pub struct TableEntitySource {
    source: String,
}

impl TableEntitySource {
    /// Read from the data source registered under `source`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Name of the data source read from
    pub fn source(&self) -> &str {
        &self.source
    }

    fn document(key: EntityKey, row: String) -> Document {
        let body = serde_json::from_str(&row).unwrap_or(Value::String(row));
        Document::new(key, body)
    }
}

impl EntitySource for TableEntitySource {
    fn load(
        &self,
        scope: &Scope,
        entity_type: &EntityType,
        key: &EntityKey,
    ) -> Result<Option<Document>> {
        with_connection::<MemoryConnection, _>(scope, &self.source, |conn| {
            Ok(conn
                .get(entity_type.as_str(), key)
                .map(|row| Self::document(key.clone(), row)))
        })
    }

    fn load_all(&self, scope: &Scope, entity_type: &EntityType) -> Result<Vec<Document>> {
        with_connection::<MemoryConnection, _>(scope, &self.source, |conn| {
            Ok(conn
                .scan(entity_type.as_str())
                .into_iter()
                .map(|(key, row)| Self::document(key, row))
                .collect())
        })
    }
}
