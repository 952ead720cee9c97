//! Runtime builder
//!
//! Collects the collaborators a deployment plugs in (data sources, a search
//! store with its entity source, extra context providers) and wires them
//! into one provider registry shared by every flow.
//!
//! ```ignore
//! let tandem = Tandem::builder()
//!     .config(TandemConfig::from_file(&path)?)
//!     .data_source(Arc::new(MemoryDataSource::new("main")))
//!     .search(store, Arc::new(TableEntitySource::new("main")))
//!     .build()?;
//! ```

use super::{Tandem, TandemConfig};
use std::path::Path;
use std::sync::Arc;
use tandem_concurrency::{
    DataSource, DatabaseContextProvider, ProviderRegistry, ResourceContextProvider,
};
use tandem_core::Result;
use tandem_search::{EntitySource, IndexingContextProvider, SearchStore};
use tracing::info;

/// Builder for a [`Tandem`] runtime
#[derive(Default)]
pub struct TandemBuilder {
    config: TandemConfig,
    sources: Vec<Arc<dyn DataSource>>,
    search: Option<(Arc<dyn SearchStore>, Arc<dyn EntitySource>)>,
    providers: Vec<Arc<dyn ResourceContextProvider>>,
}

impl TandemBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`
    pub fn config(mut self, config: TandemConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a `tandem.toml` file
    ///
    /// # Errors
    ///
    /// As [`TandemConfig::from_file`].
    pub fn config_file(self, path: &Path) -> Result<Self> {
        let config = TandemConfig::from_file(path)?;
        Ok(self.config(config))
    }

    /// Add a data source reachable through the database context
    pub fn data_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Flush index mutations to `store`, loading entities through `entities`
    pub fn search(mut self, store: Arc<dyn SearchStore>, entities: Arc<dyn EntitySource>) -> Self {
        self.search = Some((store, entities));
        self
    }

    /// Register an additional context provider
    pub fn provider(mut self, provider: Arc<dyn ResourceContextProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Wire the providers and build the runtime
    ///
    /// The database provider is registered when at least one data source
    /// was added, the indexing provider when a search store was set.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if two data sources share a name
    /// - `DuplicateProvider` if two providers claim the same kind
    pub fn build(self) -> Result<Tandem> {
        let mut registry = ProviderRegistry::new();

        if !self.sources.is_empty() {
            let mut database = DatabaseContextProvider::new();
            for source in self.sources {
                database = database.with_source(source)?;
            }
            info!(target: "tandem::db", sources = ?database.source_names(), "Database provider registered");
            registry.register(Arc::new(database))?;
        }

        if let Some((store, entities)) = self.search {
            let refresh = self.config.search.refresh_policy();
            let indexing = IndexingContextProvider::new(store, entities).with_refresh(refresh);
            info!(target: "tandem::index", refresh = ?refresh, "Indexing provider registered");
            registry.register(Arc::new(indexing))?;
        }

        for provider in self.providers {
            registry.register(provider)?;
        }

        Ok(Tandem::new(self.config, registry))
    }
}

impl std::fmt::Debug for TandemBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TandemBuilder")
            .field("config", &self.config)
            .field("sources", &self.sources.len())
            .field("search", &self.search.is_some())
            .field("providers", &self.providers.len())
            .finish()
    }
}
