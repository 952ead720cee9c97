//! Tandem runtime
//!
//! `Tandem` is built once at startup and shared. It owns the configuration
//! and the provider registry; each logical flow (one request, one job)
//! asks it for a fresh [`ScopeCoordinator`] and therefore its own ambient
//! stack.

mod builder;
mod config;

pub use builder::TandemBuilder;
pub use config::{SearchConfig, TandemConfig, CONFIG_FILE_NAME};

use std::sync::Arc;
use tandem_concurrency::{ContextKind, ProviderRegistry, ScopeCoordinator};
use tandem_search::IndexManager;
use tracing::debug;

/// Shared runtime handing out one coordinator per flow
#[derive(Debug, Clone)]
pub struct Tandem {
    config: TandemConfig,
    registry: Arc<ProviderRegistry>,
}

impl Tandem {
    pub(crate) fn new(config: TandemConfig, registry: ProviderRegistry) -> Self {
        debug!(target: "tandem::scope", kinds = ?registry.kinds(), "Runtime built");
        Self {
            config,
            registry: Arc::new(registry),
        }
    }

    /// Start building a runtime
    pub fn builder() -> TandemBuilder {
        TandemBuilder::new()
    }

    /// Coordinator with a fresh, empty stack for a new flow
    ///
    /// Independent transactions begun without an explicit timeout use the
    /// configured default timeout.
    pub fn flow(&self) -> ScopeCoordinator {
        ScopeCoordinator::with_default_timeout(
            Arc::clone(&self.registry),
            self.config.default_timeout(),
        )
    }

    /// Index manager registering into `flow`'s ambient scopes
    pub fn index_manager(&self, flow: &ScopeCoordinator) -> IndexManager {
        IndexManager::new(flow.clone())
    }

    /// Active configuration
    pub fn config(&self) -> &TandemConfig {
        &self.config
    }

    /// Provider registry shared by every flow
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Registered context kinds, in registration order
    pub fn context_kinds(&self) -> Vec<ContextKind> {
        self.registry.kinds()
    }
}
