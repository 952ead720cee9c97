//! In-process data source
//!
//! A small table store with transactional connections: writes are staged
//! in the connection's write set and applied to the shared tables only on
//! commit. Reads see the connection's own staged writes first
//! (read-your-writes), then committed data.
//!
//! Used by tests and demos as the relational side of a unit of work.

use crate::context::ScopeInfo;
use crate::database::{Connection, DataSource};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tandem_core::{EntityKey, Error, Result, ScopeId};

type Tables = BTreeMap<String, BTreeMap<EntityKey, String>>;

/// Counters describing what the data source has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Connections opened
    pub opened: u64,
    /// Connections closed
    pub closed: u64,
    /// Successful commits
    pub commits: u64,
    /// Rollbacks
    pub rollbacks: u64,
}

struct Shared {
    name: String,
    tables: RwLock<Tables>,
    fail_next_commit: AtomicBool,
    opened: AtomicU64,
    closed: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// In-process data source; clones share the same tables
#[derive(Clone)]
pub struct MemoryDataSource {
    shared: Arc<Shared>,
}

impl MemoryDataSource {
    /// Create an empty data source with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                tables: RwLock::new(BTreeMap::new()),
                fail_next_commit: AtomicBool::new(false),
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
            }),
        }
    }

    /// Read committed data
    pub fn get(&self, table: &str, key: &EntityKey) -> Option<String> {
        self.shared
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(key).cloned())
    }

    /// All committed rows of a table, in key order
    pub fn rows(&self, table: &str) -> Vec<(EntityKey, String)> {
        self.shared
            .tables
            .read()
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Insert committed data directly, outside any transaction
    pub fn seed(&self, table: &str, key: impl Into<EntityKey>, value: impl Into<String>) {
        self.shared
            .tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Make the next commit on any connection fail
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            opened: self.shared.opened.load(Ordering::SeqCst),
            closed: self.shared.closed.load(Ordering::SeqCst),
            commits: self.shared.commits.load(Ordering::SeqCst),
            rollbacks: self.shared.rollbacks.load(Ordering::SeqCst),
        }
    }
}

impl DataSource for MemoryDataSource {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn open(&self, scope: &ScopeInfo) -> Result<Box<dyn Connection>> {
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            scope: scope.id,
            write_set: BTreeMap::new(),
            closed: false,
        }))
    }
}

/// Connection to a [`MemoryDataSource`]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    scope: ScopeId,
    /// Staged writes; `None` marks a delete
    write_set: BTreeMap<(String, EntityKey), Option<String>>,
    closed: bool,
}

impl MemoryConnection {
    /// Scope whose transaction this connection is enlisted in
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Read a row, seeing this connection's staged writes first
    pub fn get(&self, table: &str, key: &EntityKey) -> Option<String> {
        if let Some(staged) = self.write_set.get(&(table.to_string(), key.clone())) {
            return staged.clone();
        }
        self.shared
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(key).cloned())
    }

    /// Every row of a table as this connection sees it, in key order
    pub fn scan(&self, table: &str) -> Vec<(EntityKey, String)> {
        let mut rows = self
            .shared
            .tables
            .read()
            .get(table)
            .cloned()
            .unwrap_or_default();
        for ((t, key), value) in &self.write_set {
            if t != table {
                continue;
            }
            match value {
                Some(v) => {
                    rows.insert(key.clone(), v.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        rows.into_iter().collect()
    }

    /// Stage an insert or update
    pub fn put(&mut self, table: &str, key: impl Into<EntityKey>, value: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.write_set
            .insert((table.to_string(), key.into()), Some(value.into()));
        Ok(())
    }

    /// Stage a delete
    pub fn delete(&mut self, table: &str, key: impl Into<EntityKey>) -> Result<()> {
        self.ensure_open()?;
        self.write_set.insert((table.to_string(), key.into()), None);
        Ok(())
    }

    /// Number of staged writes
    pub fn pending_writes(&self) -> usize {
        self.write_set.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::database("connection is closed"));
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::database(format!(
                "commit rejected by data source '{}'",
                self.shared.name
            )));
        }

        let mut tables = self.shared.tables.write();
        for ((table, key), value) in std::mem::take(&mut self.write_set) {
            let rows = tables.entry(table).or_default();
            match value {
                Some(v) => {
                    rows.insert(key, v);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.write_set.clear();
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
