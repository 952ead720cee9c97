//! Database resource context
//!
//! The database context owns one transaction per scope plus the
//! connections opened under it, keyed by data-source name. Connections are
//! opened lazily on first request and enlisted in the scope's transaction.
//!
//! Lifecycle:
//! - `mark_complete` records the scope's decision to commit
//! - `on_commit` commits every enlisted connection, then closes them
//! - `on_rollback` (or drop without dispose) rolls back and closes them
//!
//! This is ordering within one process, not two-phase commit: if the
//! second of two connections fails to commit, the first has already
//! committed.

use crate::context::{ContextKind, ContextType, ResourceContext, ResourceContextProvider, ScopeInfo};
use crate::scope::Scope;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tandem_core::{Error, Result};
use tracing::{debug, warn};

/// A connection to one data source, enlisted in a scope's transaction
pub trait Connection: Send + 'static {
    /// Make the connection's work in this transaction durable
    fn commit(&mut self) -> Result<()>;

    /// Discard the connection's work in this transaction
    fn rollback(&mut self) -> Result<()>;

    /// Release the connection
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Downcasting support for typed access
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A named source of connections (a database, a schema, a shard)
pub trait DataSource: Send + Sync {
    /// Name under which connections are keyed
    fn name(&self) -> &str;

    /// Open a connection enlisted in the given scope's transaction
    fn open(&self, scope: &ScopeInfo) -> Result<Box<dyn Connection>>;
}

/// Status of a database context's transaction
///
/// State transitions:
/// - `Active` → `Committed` (scope completed, every connection committed)
/// - `Active` → `RolledBack` (scope not completed, commit failure, timeout)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is open, connections may be opened
    Active,
    /// Transaction committed
    Committed,
    /// Transaction rolled back
    RolledBack,
}

type SourceMap = BTreeMap<String, Arc<dyn DataSource>>;

/// Database context: one transaction plus its connections
pub struct DatabaseContext {
    scope: ScopeInfo,
    sources: Arc<SourceMap>,
    connections: BTreeMap<String, Box<dyn Connection>>,
    status: TransactionStatus,
    completed: bool,
    started: Instant,
}

impl DatabaseContext {
    fn new(scope: ScopeInfo, sources: Arc<SourceMap>) -> Self {
        debug!(target: "tandem::db", scope = %scope.id, "Transaction begun");
        Self {
            scope,
            sources,
            connections: BTreeMap::new(),
            status: TransactionStatus::Active,
            completed: false,
            started: Instant::now(),
        }
    }

    /// Current transaction status
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// True once the owning scope has completed
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Names of the data sources with an open connection
    pub fn open_sources(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    /// Get the connection for `source`, opening it on first request
    ///
    /// # Errors
    ///
    /// - `UnknownDataSource` if no source has this name
    /// - `Database` if the transaction is no longer active or the open fails
    pub fn connection(&mut self, source: &str) -> Result<&mut dyn Connection> {
        if self.status != TransactionStatus::Active {
            return Err(Error::database(format!(
                "transaction in {} is {:?}",
                self.scope.id, self.status
            )));
        }

        if !self.connections.contains_key(source) {
            let data_source = self
                .sources
                .get(source)
                .ok_or_else(|| Error::UnknownDataSource {
                    name: source.to_string(),
                })?;
            let connection = data_source.open(&self.scope)?;
            debug!(target: "tandem::db", scope = %self.scope.id, source, "Connection opened");
            self.connections.insert(source.to_string(), connection);
        }

        self.connections
            .get_mut(source)
            .map(|conn| conn.as_mut())
            .ok_or_else(|| Error::UnknownDataSource {
                name: source.to_string(),
            })
    }

    /// Typed access to the connection for `source`
    ///
    /// # Errors
    ///
    /// As [`DatabaseContext::connection`], plus `InvalidInput` if the
    /// connection is not a `C`.
    pub fn connection_as<C: Connection>(&mut self, source: &str) -> Result<&mut C> {
        self.connection(source)?
            .as_any_mut()
            .downcast_mut::<C>()
            .ok_or_else(|| {
                Error::invalid_input(format!("connection for '{}' has an unexpected type", source))
            })
    }

    fn rollback_connections(&mut self) {
        for (name, conn) in self.connections.iter_mut() {
            if let Err(e) = conn.rollback() {
                warn!(target: "tandem::db", scope = %self.scope.id, source = %name, error = %e, "Rollback failed");
            }
        }
        self.status = TransactionStatus::RolledBack;
    }

    fn close_connections(&mut self) {
        for (name, mut conn) in std::mem::take(&mut self.connections) {
            match conn.close() {
                Ok(()) => debug!(target: "tandem::db", scope = %self.scope.id, source = %name, "Connection closed"),
                Err(e) => warn!(target: "tandem::db", scope = %self.scope.id, source = %name, error = %e, "Close failed"),
            }
        }
    }

    fn check_timeout(&self) -> Result<()> {
        if let Some(timeout) = self.scope.timeout {
            let elapsed = self.started.elapsed();
            if elapsed > timeout {
                return Err(Error::TransactionTimeout {
                    scope: self.scope.id,
                    elapsed_ms: elapsed.as_millis() as u64,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

impl ContextType for DatabaseContext {
    const KIND: ContextKind = ContextKind::transactional("database");
}

impl ResourceContext for DatabaseContext {
    fn kind(&self) -> ContextKind {
        Self::KIND
    }

    fn mark_complete(&mut self) {
        self.completed = true;
    }

    fn on_commit(&mut self) -> Result<()> {
        if self.status != TransactionStatus::Active {
            return Ok(());
        }
        if !self.completed {
            self.rollback_connections();
            self.close_connections();
            return Ok(());
        }

        if let Err(e) = self.check_timeout() {
            self.rollback_connections();
            self.close_connections();
            return Err(e);
        }

        let names: Vec<String> = self.connections.keys().cloned().collect();
        for name in names {
            let result = match self.connections.get_mut(&name) {
                Some(conn) => conn.commit(),
                None => Ok(()),
            };
            if let Err(e) = result {
                warn!(target: "tandem::db", scope = %self.scope.id, source = %name, error = %e, "Commit failed");
                self.rollback_connections();
                self.close_connections();
                return Err(e);
            }
        }

        self.status = TransactionStatus::Committed;
        debug!(
            target: "tandem::db",
            scope = %self.scope.id,
            connections = self.connections.len(),
            "Transaction committed"
        );
        self.close_connections();
        Ok(())
    }

    fn on_rollback(&mut self) -> Result<()> {
        if self.status == TransactionStatus::Active {
            self.rollback_connections();
            debug!(target: "tandem::db", scope = %self.scope.id, "Transaction rolled back");
        }
        self.close_connections();
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for DatabaseContext {
    fn drop(&mut self) {
        if self.status == TransactionStatus::Active && !self.connections.is_empty() {
            self.rollback_connections();
            self.close_connections();
        }
    }
}

/// Provider creating one [`DatabaseContext`] per scope
#[derive(Default, Clone)]
pub struct DatabaseContextProvider {
    sources: Arc<SourceMap>,
}

impl DatabaseContextProvider {
    /// Create a provider with no data sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a data source
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a source with the same name exists.
    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Result<Self> {
        let name = source.name().to_string();
        let sources = Arc::make_mut(&mut self.sources);
        if sources.contains_key(&name) {
            return Err(Error::invalid_input(format!(
                "data source '{}' registered twice",
                name
            )));
        }
        sources.insert(name, source);
        Ok(self)
    }

    /// Names of the registered data sources
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }
}

impl ResourceContextProvider for DatabaseContextProvider {
    fn kind(&self) -> ContextKind {
        DatabaseContext::KIND
    }

    fn create(&self, scope: &ScopeInfo) -> Result<Box<dyn ResourceContext>> {
        if !scope.intent.allows_transaction() {
            return Err(Error::NoActiveTransaction { scope: scope.id });
        }
        Ok(Box::new(DatabaseContext::new(
            scope.clone(),
            Arc::clone(&self.sources),
        )))
    }
}

/// Run `f` against the scope's connection to `source`
///
/// Creates the scope's database context and opens the connection on first
/// use.
///
/// # Errors
///
/// `NoActiveTransaction` under a suppressed scope, plus any error from
/// [`Scope::with_context_or_create`], [`DatabaseContext::connection_as`]
/// or `f`.
pub fn with_connection<C, R>(
    scope: &Scope,
    source: &str,
    f: impl FnOnce(&mut C) -> Result<R>,
) -> Result<R>
where
    C: Connection,
{
    scope.with_context_or_create::<DatabaseContext, _>(|db| f(db.connection_as::<C>(source)?))
}
