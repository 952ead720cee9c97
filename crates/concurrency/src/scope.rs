//! Scopes: one level of nested unit-of-work
//!
//! A [`Scope`] handle is either an **owner** (pushed on the flow's ambient
//! stack by the coordinator) or a **pass-through** handle bound to the
//! scope that was on top of the stack when `ensure_scope` was called.
//! Pass-through handles see the owner's contexts but their `complete` and
//! `dispose` do nothing.
//!
//! Disposal order: every transactional (database) context is placed last,
//! and the before-commit phase runs while the owner is still on top of the
//! stack, so other contexts can run nested database work inside the
//! owner's still-open transaction during their before-commit hook.

use crate::context::{ContextKind, ContextType, ProviderRegistry, ResourceContext, ScopeInfo};
use crate::coordinator::ScopeCoordinator;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use tandem_core::{Error, FlowId, Result, ScopeId, TransactionIntent};
use tracing::{debug, error, trace, warn};

type ContextSlot = Arc<Mutex<Box<dyn ResourceContext>>>;

/// Shared state of one owning scope
pub(crate) struct ScopeCore {
    info: ScopeInfo,
    providers: Arc<ProviderRegistry>,
    state: Mutex<ScopeState>,
}

#[derive(Default)]
struct ScopeState {
    /// Contexts in creation order
    slots: SmallVec<[(ContextKind, ContextSlot); 4]>,
    /// Set at most once, never unset
    completed: bool,
    disposed: bool,
}

impl ScopeCore {
    pub(crate) fn new(info: ScopeInfo, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            info,
            providers,
            state: Mutex::new(ScopeState::default()),
        }
    }

    pub(crate) fn id(&self) -> ScopeId {
        self.info.id
    }
}

/// Handle to a unit-of-work scope
///
/// Obtained from [`ScopeCoordinator::ensure_scope`],
/// [`ScopeCoordinator::begin_new_transaction`] or
/// [`ScopeCoordinator::begin_suppressed`].
///
/// # Lifecycle
///
/// ```ignore
/// let scope = coordinator.ensure_scope();
/// scope.with_context_or_create::<DatabaseContext, _>(|db| { /* work */ Ok(()) })?;
/// scope.complete();
/// scope.dispose()?; // commits; without complete() it rolls back
/// ```
///
/// Dropping an undisposed owner disposes it and logs any error. During a
/// panic the drop always rolls back.
pub struct Scope {
    core: Arc<ScopeCore>,
    /// Back-reference to the coordinator whose stack holds this scope.
    /// `None` for pass-through handles, which are never pushed.
    owner: Option<ScopeCoordinator>,
    disposed: bool,
}

impl Scope {
    pub(crate) fn owning(core: Arc<ScopeCore>, coordinator: ScopeCoordinator) -> Self {
        Self {
            core,
            owner: Some(coordinator),
            disposed: false,
        }
    }

    pub(crate) fn pass_through(core: Arc<ScopeCore>) -> Self {
        Self {
            core,
            owner: None,
            disposed: false,
        }
    }

    /// Identifier of the scope whose contexts this handle uses
    pub fn id(&self) -> ScopeId {
        self.core.info.id
    }

    /// Flow this scope belongs to
    pub fn flow(&self) -> FlowId {
        self.core.info.flow
    }

    /// Intent of this handle (`None` for pass-through handles)
    pub fn intent(&self) -> TransactionIntent {
        if self.is_owner() {
            self.core.info.intent
        } else {
            TransactionIntent::None
        }
    }

    /// Description of the underlying scope as seen by providers
    pub fn info(&self) -> &ScopeInfo {
        &self.core.info
    }

    /// True if this handle owns the scope (and its `complete`/`dispose` matter)
    pub fn is_owner(&self) -> bool {
        self.owner.is_some()
    }

    /// True once the owning scope has been completed
    pub fn is_completed(&self) -> bool {
        self.core.state.lock().completed
    }

    /// Mark the scope complete
    ///
    /// Forwards `mark_complete` to every owned context in creation order.
    /// Repeated calls and calls on pass-through handles are no-ops. Never
    /// completing before dispose means "roll back".
    pub fn complete(&self) {
        if !self.is_owner() {
            trace!(target: "tandem::scope", scope = %self.id(), "complete on pass-through handle ignored");
            return;
        }

        let slots: Vec<ContextSlot> = {
            let mut state = self.core.state.lock();
            if state.completed || state.disposed {
                return;
            }
            state.completed = true;
            state.slots.iter().map(|(_, slot)| Arc::clone(slot)).collect()
        };

        for slot in slots {
            slot.lock().mark_complete();
        }

        debug!(target: "tandem::scope", scope = %self.id(), "Scope completed");
    }

    /// True if a context of kind `K` has been created in this scope
    pub fn has_context<K: ContextType>(&self) -> bool {
        self.core
            .state
            .lock()
            .slots
            .iter()
            .any(|(kind, _)| kind.name() == K::KIND.name())
    }

    /// Kinds of the contexts created so far, in creation order
    pub fn context_kinds(&self) -> Vec<ContextKind> {
        self.core
            .state
            .lock()
            .slots
            .iter()
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Run `f` against the existing context of kind `K`
    ///
    /// Never creates the context: returns `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ContextTypeMismatch` if the stored context is not a `K`.
    pub fn with_context<K, R>(&self, f: impl FnOnce(&mut K) -> R) -> Result<Option<R>>
    where
        K: ContextType,
    {
        match self.slot(K::KIND, false)? {
            Some(slot) => {
                let mut guard = slot.lock();
                let ctx = downcast::<K>(&mut guard)?;
                Ok(Some(f(ctx)))
            }
            None => Ok(None),
        }
    }

    /// Run `f` against the context of kind `K`, creating it if needed
    ///
    /// The registered provider is queried at most once per scope.
    ///
    /// # Errors
    ///
    /// - `NoActiveTransaction` if `K` is transactional and the scope is suppressed
    /// - `NoProvider` if no provider is registered for `K`
    /// - `ScopeDisposed` if the owning scope was already disposed
    /// - any error returned by the provider or by `f`
    pub fn with_context_or_create<K, R>(&self, f: impl FnOnce(&mut K) -> Result<R>) -> Result<R>
    where
        K: ContextType,
    {
        let slot = self
            .slot(K::KIND, true)?
            .ok_or(Error::NoProvider { kind: K::KIND.name() })?;
        let mut guard = slot.lock();
        let ctx = downcast::<K>(&mut guard)?;
        f(ctx)
    }

    fn slot(&self, kind: ContextKind, create: bool) -> Result<Option<ContextSlot>> {
        let mut state = self.core.state.lock();
        if state.disposed {
            return Err(Error::ScopeDisposed { scope: self.id() });
        }

        if let Some((_, slot)) = state.slots.iter().find(|(k, _)| k.name() == kind.name()) {
            return Ok(Some(Arc::clone(slot)));
        }

        if !create {
            return Ok(None);
        }

        if kind.is_transactional() && !self.core.info.intent.allows_transaction() {
            return Err(Error::NoActiveTransaction { scope: self.id() });
        }

        let provider = self
            .core
            .providers
            .get(kind.name())
            .ok_or(Error::NoProvider { kind: kind.name() })?;

        let mut ctx = provider.create(&self.core.info)?;
        if state.completed {
            ctx.mark_complete();
        }

        debug!(target: "tandem::scope", scope = %self.id(), kind = %kind, "Context created");

        let slot: ContextSlot = Arc::new(Mutex::new(ctx));
        state.slots.push((kind, Arc::clone(&slot)));
        Ok(Some(slot))
    }

    /// Dispose the scope
    ///
    /// For an owner that was completed:
    /// 1. every context's `on_before_commit` runs while the scope is still
    ///    on top of the stack, so nested `ensure_scope` calls made by the
    ///    hooks join this scope and its open transaction; a context that
    ///    reports `has_pending_work` afterwards has its hook run again
    /// 2. the scope pops itself off the stack
    /// 3. `on_commit` runs per context, then `on_after_commit`
    ///
    /// Transactional contexts come last in every phase. An owner that was
    /// never completed pops and rolls every context back. For a
    /// pass-through handle dispose does nothing.
    ///
    /// # Errors
    ///
    /// - `ScopeOrderViolation` if another scope is on top of the stack; the
    ///   scope is removed from the stack and its contexts are rolled back
    /// - the first error from a before-commit or commit hook; every context
    ///   that has not committed yet is rolled back
    pub fn dispose(mut self) -> Result<()> {
        self.dispose_inner(false)
    }

    fn dispose_inner(&mut self, force_rollback: bool) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let Some(coordinator) = self.owner.clone() else {
            trace!(target: "tandem::scope", scope = %self.id(), "dispose on pass-through handle ignored");
            return Ok(());
        };

        if let Err(e) = coordinator.check_top(&self.core) {
            self.abandon(&coordinator);
            return Err(e);
        }

        let commit = self.is_completed() && !force_rollback;
        let prepared = if commit {
            self.before_commit_all(&coordinator)
        } else {
            Ok(())
        };

        if let Err(e) = coordinator.pop_scope(&self.core) {
            self.abandon(&coordinator);
            return Err(e);
        }

        let ordered = dispose_order(self.take_slots());

        match prepared {
            Ok(()) if commit => self.commit_all(&coordinator, ordered),
            Ok(()) => {
                debug!(target: "tandem::scope", scope = %self.id(), contexts = ordered.len(), "Rolling back scope");
                rollback_all(self.id(), ordered);
                coordinator.record_rollback();
                Ok(())
            }
            Err(e) => {
                rollback_all(self.id(), ordered);
                coordinator.record_rollback();
                Err(e)
            }
        }
    }

    /// Mark the scope disposed and hand out its contexts
    fn take_slots(&self) -> SmallVec<[(ContextKind, ContextSlot); 4]> {
        let mut state = self.core.state.lock();
        state.disposed = true;
        std::mem::take(&mut state.slots)
    }

    /// Drop an out-of-order scope from the stack and roll its contexts back
    fn abandon(&self, coordinator: &ScopeCoordinator) {
        coordinator.remove_scope(&self.core);
        rollback_all(self.id(), dispose_order(self.take_slots()));
        coordinator.record_rollback();
    }

    /// Run `on_before_commit` for every context, including contexts the
    /// hooks themselves create along the way, and again for any context
    /// that picked up new work after its hook ran.
    fn before_commit_all(&self, coordinator: &ScopeCoordinator) -> Result<()> {
        let mut prepared: SmallVec<[&'static str; 4]> = SmallVec::new();
        loop {
            let slots = {
                let state = self.core.state.lock();
                dispose_order(
                    state
                        .slots
                        .iter()
                        .map(|(kind, slot)| (*kind, Arc::clone(slot)))
                        .collect::<Vec<_>>(),
                )
            };
            let pending: Vec<_> = slots
                .into_iter()
                .filter(|(kind, slot)| {
                    !prepared.contains(&kind.name()) || slot.lock().has_pending_work()
                })
                .collect();
            if pending.is_empty() {
                return Ok(());
            }

            for (kind, slot) in pending {
                if !prepared.contains(&kind.name()) {
                    prepared.push(kind.name());
                }
                if let Err(e) = slot.lock().on_before_commit(coordinator) {
                    error!(target: "tandem::scope", scope = %self.id(), kind = %kind, error = %e, "Before-commit hook failed, abandoning scope");
                    return Err(e);
                }
            }
        }
    }

    fn commit_all(
        &self,
        coordinator: &ScopeCoordinator,
        ordered: Vec<(ContextKind, ContextSlot)>,
    ) -> Result<()> {
        let mut committed = Vec::with_capacity(ordered.len());
        let mut remaining = ordered.into_iter();

        while let Some((kind, slot)) = remaining.next() {
            let result = slot.lock().on_commit();
            if let Err(e) = result {
                error!(target: "tandem::scope", scope = %self.id(), kind = %kind, error = %e, "Commit hook failed, abandoning scope");
                let mut rest = vec![(kind, slot)];
                rest.extend(remaining.by_ref());
                rollback_all(self.id(), rest);
                coordinator.record_rollback();
                return Err(e);
            }
            committed.push((kind, slot));
        }

        for (kind, slot) in committed {
            if let Err(e) = slot.lock().on_after_commit() {
                warn!(target: "tandem::scope", scope = %self.id(), kind = %kind, error = %e, "After-commit hook failed");
            }
        }

        coordinator.record_commit();
        debug!(target: "tandem::scope", scope = %self.id(), "Scope committed");
        Ok(())
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        let panicking = std::thread::panicking();
        if let Err(e) = self.dispose_inner(panicking) {
            error!(target: "tandem::scope", scope = %self.id(), error = %e, "Scope dropped with a disposal error");
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("owner", &self.is_owner())
            .field("intent", &self.core.info.intent)
            .finish()
    }
}

/// Non-transactional contexts first, transactional ones last; creation
/// order is kept within each group.
fn dispose_order<I>(slots: I) -> Vec<(ContextKind, ContextSlot)>
where
    I: IntoIterator<Item = (ContextKind, ContextSlot)>,
{
    let (mut ordered, transactional): (Vec<_>, Vec<_>) = slots
        .into_iter()
        .partition(|(kind, _)| !kind.is_transactional());
    ordered.extend(transactional);
    ordered
}

fn rollback_all(scope: ScopeId, slots: Vec<(ContextKind, ContextSlot)>) {
    for (kind, slot) in slots {
        if let Err(e) = slot.lock().on_rollback() {
            warn!(target: "tandem::scope", scope = %scope, kind = %kind, error = %e, "Rollback hook failed");
        }
    }
}

fn downcast<K: ContextType>(ctx: &mut Box<dyn ResourceContext>) -> Result<&mut K> {
    (**ctx)
        .as_any_mut()
        .downcast_mut::<K>()
        .ok_or(Error::ContextTypeMismatch {
            kind: K::KIND.name(),
        })
}
