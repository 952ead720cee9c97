//! Scope coordinator: the ambient scope stack of one execution flow
//!
//! Each logical flow (one inbound request, one job) owns its own
//! `ScopeCoordinator` and therefore its own stack. Coordinators share the
//! provider registry, never the stack. Cloning a coordinator clones the
//! handle, not the stack.
//!
//! Stack rules:
//! - `begin_new_transaction` and `begin_suppressed` always push.
//! - `ensure_scope` pushes only when the stack is empty; otherwise it
//!   returns a pass-through handle bound to the top of the stack.
//! - Only an owning scope's dispose pops, and only if it is on top.
//! - An owner disposed while not on top is removed from wherever it sits
//!   and rolled back; the dispose fails with `ScopeOrderViolation`.

use crate::context::{ProviderRegistry, ScopeInfo};
use crate::scope::{Scope, ScopeCore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{Error, FlowId, Result, ScopeId, TransactionIntent};
use tracing::{debug, error, warn};

/// Snapshot of a coordinator's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeStats {
    /// Owning scopes pushed on the stack
    pub begun: u64,
    /// Pass-through handles handed out by `ensure_scope`
    pub joined: u64,
    /// Owning scopes disposed with every commit hook succeeding
    pub committed: u64,
    /// Owning scopes disposed without committing
    pub rolled_back: u64,
}

/// Coordinator for one flow's ambient scope stack
///
/// # Memory Ordering
///
/// The counters use Relaxed ordering: they are observational only and do
/// not synchronize any other memory.
#[derive(Clone)]
pub struct ScopeCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    flow: FlowId,
    providers: Arc<ProviderRegistry>,
    default_timeout: Option<Duration>,
    stack: Mutex<Vec<Arc<ScopeCore>>>,
    next_scope_id: AtomicU64,
    begun: AtomicU64,
    joined: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl ScopeCoordinator {
    /// Create a coordinator (and a fresh, empty stack) for a new flow
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self::with_default_timeout(providers, None)
    }

    /// Create a coordinator whose independent transactions default to `timeout`
    pub fn with_default_timeout(
        providers: Arc<ProviderRegistry>,
        timeout: Option<Duration>,
    ) -> Self {
        let flow = FlowId::new();
        debug!(target: "tandem::scope", flow = %flow, "Flow started");
        Self {
            inner: Arc::new(CoordinatorInner {
                flow,
                providers,
                default_timeout: timeout,
                stack: Mutex::new(Vec::new()),
                next_scope_id: AtomicU64::new(1),
                begun: AtomicU64::new(0),
                joined: AtomicU64::new(0),
                committed: AtomicU64::new(0),
                rolled_back: AtomicU64::new(0),
            }),
        }
    }

    /// Flow identifier
    pub fn flow(&self) -> FlowId {
        self.inner.flow
    }

    /// Provider registry shared with other flows
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.inner.providers
    }

    /// Number of owning scopes currently on the stack
    pub fn depth(&self) -> usize {
        self.inner.stack.lock().len()
    }

    /// Identifier of the scope on top of the stack
    pub fn current_scope_id(&self) -> Option<ScopeId> {
        self.inner.stack.lock().last().map(|core| core.id())
    }

    /// Join the ambient scope, or start one if the stack is empty
    ///
    /// Safe at any nesting depth: repeated calls never create redundant
    /// contexts because every pass-through handle shares the owner's.
    pub fn ensure_scope(&self) -> Scope {
        let mut stack = self.inner.stack.lock();
        if let Some(top) = stack.last() {
            self.inner.joined.fetch_add(1, Ordering::Relaxed);
            return Scope::pass_through(Arc::clone(top));
        }
        self.push_locked(&mut stack, TransactionIntent::Required, None)
    }

    /// Start a scope that commits or rolls back independently of any outer scope
    ///
    /// `timeout` falls back to the coordinator's default timeout.
    pub fn begin_new_transaction(&self, timeout: Option<Duration>) -> Scope {
        let timeout = timeout.or(self.inner.default_timeout);
        let mut stack = self.inner.stack.lock();
        self.push_locked(&mut stack, TransactionIntent::RequiresNew, timeout)
    }

    /// Start a scope in which no transactional context can be created
    pub fn begin_suppressed(&self) -> Scope {
        let mut stack = self.inner.stack.lock();
        self.push_locked(&mut stack, TransactionIntent::Suppress, None)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ScopeStats {
        ScopeStats {
            begun: self.inner.begun.load(Ordering::Relaxed),
            joined: self.inner.joined.load(Ordering::Relaxed),
            committed: self.inner.committed.load(Ordering::Relaxed),
            rolled_back: self.inner.rolled_back.load(Ordering::Relaxed),
        }
    }

    fn push_locked(
        &self,
        stack: &mut Vec<Arc<ScopeCore>>,
        intent: TransactionIntent,
        timeout: Option<Duration>,
    ) -> Scope {
        let id = ScopeId::new(self.inner.next_scope_id.fetch_add(1, Ordering::Relaxed));
        let info = ScopeInfo {
            id,
            flow: self.inner.flow,
            intent,
            timeout,
        };
        let core = Arc::new(ScopeCore::new(info, Arc::clone(&self.inner.providers)));
        stack.push(Arc::clone(&core));
        self.inner.begun.fetch_add(1, Ordering::Relaxed);

        debug!(
            target: "tandem::scope",
            flow = %self.inner.flow,
            scope = %id,
            intent = %intent,
            depth = stack.len(),
            "Scope pushed"
        );

        Scope::owning(core, self.clone())
    }

    /// Check that `core` is the top of the stack
    ///
    /// Fails without touching the stack otherwise.
    pub(crate) fn check_top(&self, core: &Arc<ScopeCore>) -> Result<()> {
        let stack = self.inner.stack.lock();
        self.top_matches(&stack, core)
    }

    /// Pop `core` off the stack
    ///
    /// Only called from an owning scope's dispose. Fails without touching
    /// the stack if `core` is not on top.
    pub(crate) fn pop_scope(&self, core: &Arc<ScopeCore>) -> Result<()> {
        let mut stack = self.inner.stack.lock();
        self.top_matches(&stack, core)?;
        stack.pop();
        debug!(
            target: "tandem::scope",
            flow = %self.inner.flow,
            scope = %core.id(),
            depth = stack.len(),
            "Scope popped"
        );
        Ok(())
    }

    /// Remove `core` from the stack wherever it sits
    ///
    /// Used after an out-of-order dispose so the flow never keeps a scope
    /// that nothing can pop. Scopes above it stay in place.
    pub(crate) fn remove_scope(&self, core: &Arc<ScopeCore>) {
        let mut stack = self.inner.stack.lock();
        if let Some(pos) = stack.iter().position(|s| Arc::ptr_eq(s, core)) {
            stack.remove(pos);
            warn!(
                target: "tandem::scope",
                flow = %self.inner.flow,
                scope = %core.id(),
                depth = stack.len(),
                "Out-of-order scope removed from stack"
            );
        }
    }

    fn top_matches(&self, stack: &[Arc<ScopeCore>], core: &Arc<ScopeCore>) -> Result<()> {
        match stack.last() {
            Some(top) if Arc::ptr_eq(top, core) => Ok(()),
            other => {
                let found = other.map(|top| top.id());
                error!(
                    target: "tandem::scope",
                    flow = %self.inner.flow,
                    expected = %core.id(),
                    found = ?found,
                    "Scope disposed out of order"
                );
                Err(Error::ScopeOrderViolation {
                    expected: core.id(),
                    found,
                })
            }
        }
    }

    pub(crate) fn record_commit(&self) {
        self.inner.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.inner.rolled_back.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ScopeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeCoordinator")
            .field("flow", &self.inner.flow)
            .field("depth", &self.depth())
            .finish()
    }
}
