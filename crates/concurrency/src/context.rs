//! Resource context protocol
//!
//! A resource context is one unit of backend-specific transactional state
//! owned by a scope: a database transaction with its connections, a batch
//! of pending search-index mutations, and so on.
//!
//! Contexts are created lazily by a [`ResourceContextProvider`] the first
//! time a scope asks for their kind, and are driven through the commit
//! hooks when the owning scope is disposed:
//!
//! ```text
//! completed:      on_before_commit (every context, scope still on the stack)
//!                 -> on_commit (every context) -> on_after_commit (every context)
//! not completed:  on_rollback
//! ```
//!
//! A context that picks up new work while other contexts run their
//! before-commit hooks reports it through `has_pending_work` and gets its
//! hook run again before anything commits.
//!
//! Errors from `on_before_commit` and `on_commit` abort the remaining
//! disposal chain and roll back every context not yet committed. Errors
//! from `on_after_commit` and `on_rollback` are logged and swallowed.

use crate::coordinator::ScopeCoordinator;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{Error, FlowId, Result, ScopeId, TransactionIntent};

/// Tag identifying a kind of resource context
///
/// Transactional kinds (database contexts) are disposed after every other
/// kind and cannot be created under a suppressed scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKind {
    name: &'static str,
    transactional: bool,
}

impl ContextKind {
    /// A non-transactional kind
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            transactional: false,
        }
    }

    /// A transactional kind (disposed last, refused under suppression)
    pub const fn transactional(name: &'static str) -> Self {
        Self {
            name,
            transactional: true,
        }
    }

    /// Kind name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this kind owns a transaction
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What a provider knows about the scope it creates a context for
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    /// Scope identifier
    pub id: ScopeId,
    /// Flow owning the scope's stack
    pub flow: FlowId,
    /// Transactional intent of the owning scope
    pub intent: TransactionIntent,
    /// Transaction timeout, if any
    pub timeout: Option<Duration>,
}

/// Backend-specific transactional state owned by exactly one scope
///
/// All hooks have no-op defaults so a context only implements the phases
/// it cares about.
pub trait ResourceContext: Send + 'static {
    /// Kind tag of this context
    fn kind(&self) -> ContextKind;

    /// Record that the owning scope completed
    ///
    /// Called once per context, in creation order, by `Scope::complete`.
    /// A context created after completion receives it at creation.
    fn mark_complete(&mut self);

    /// Work that must finish before the primary resource commits
    ///
    /// Receives the flow's coordinator so the context can open nested
    /// scopes of its own.
    fn on_before_commit(&mut self, _coordinator: &ScopeCoordinator) -> Result<()> {
        Ok(())
    }

    /// True if `on_before_commit` has work it has not done yet
    ///
    /// Checked by a committing scope after each round of before-commit
    /// hooks, so work registered by a later context's hook is not lost.
    fn has_pending_work(&self) -> bool {
        false
    }

    /// Commit and release the resource
    fn on_commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Best-effort notification after commit; failures are logged only
    fn on_after_commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discard the resource's pending work; failures are logged only
    fn on_rollback(&mut self) -> Result<()> {
        Ok(())
    }

    /// Downcasting support for typed access
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A concrete context type with a statically known kind
pub trait ContextType: ResourceContext + Sized {
    /// Kind tag under which this type is registered
    const KIND: ContextKind;
}

/// Factory for one kind of resource context
pub trait ResourceContextProvider: Send + Sync {
    /// Kind of context this provider creates
    fn kind(&self) -> ContextKind;

    /// Create a fresh context for the given scope
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot provide the resource.
    fn create(&self, scope: &ScopeInfo) -> Result<Box<dyn ResourceContext>>;
}

/// Registry mapping kind tags to providers
///
/// Built once at startup and shared by every coordinator through an `Arc`.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: SmallVec<[Arc<dyn ResourceContextProvider>; 4]>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider
    ///
    /// # Errors
    ///
    /// Returns `DuplicateProvider` if a provider of the same kind exists.
    pub fn register(&mut self, provider: Arc<dyn ResourceContextProvider>) -> Result<()> {
        let kind = provider.kind();
        if self.get(kind.name()).is_some() {
            return Err(Error::DuplicateProvider { kind: kind.name() });
        }
        self.providers.push(provider);
        Ok(())
    }

    /// Builder: register a provider
    pub fn with(mut self, provider: Arc<dyn ResourceContextProvider>) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    /// Look up the provider for a kind name
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ResourceContextProvider>> {
        self.providers.iter().find(|p| p.kind().name() == kind)
    }

    /// Registered kinds, in registration order
    pub fn kinds(&self) -> Vec<ContextKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True if no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
