//! Lifecycle coordinator.
//!
//! Drives every module state transition: load, unload, reload (immediate
//! and deferred), reference pinning, and the require/unrequire contract
//! modules use from their own entrypoints. At most one lifecycle mutation
//! is in flight per record; consumers may hold live references throughout.

use std::cell::RefCell;
use std::sync::Arc;

use lbbs_core::{LbbsError, ModuleError, ModulesConfig, Result};
use tracing::{debug, error, info, warn};

use crate::backend::LibraryBackend;
use crate::deps::DependencyGraph;
use crate::module::{Module, ModuleContext, SelfToken};
use crate::registry::{
    ModuleRecord, ModuleRef, ModuleRegistry, ModuleState, ModuleStatus, canonical_name,
};

/// What a reload request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The module was torn down and loaded fresh.
    Reloaded,
    /// The module was busy; the reload fires when its refcount hits zero.
    Queued,
}

thread_local! {
    /// Loads in progress on this thread, outermost first. Bounds
    /// transitive autoload during `require`: requiring anything already
    /// on the chain is a cycle.
    static LOAD_CHAIN: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Scope guard for one entry on the load chain.
struct ChainGuard {
    name: String,
}

impl ChainGuard {
    fn enter(name: &str) -> std::result::Result<Self, ModuleError> {
        LOAD_CHAIN.with(|chain| {
            let mut chain = chain.borrow_mut();
            if chain.iter().any(|n| n == name) {
                return Err(ModuleError::WouldCycle {
                    dependent: chain.last().cloned().unwrap_or_default(),
                    dependency: name.to_string(),
                });
            }
            chain.push(name.to_string());
            Ok(Self {
                name: name.to_string(),
            })
        })
    }

    /// Whether this thread already holds a transition lock whose name
    /// orders after `name`. Nested transition locks are acquired in
    /// ascending canonical-name order; the names on the load chain are
    /// exactly the transition locks this thread holds.
    fn would_invert_lock_order(name: &str) -> bool {
        LOAD_CHAIN.with(|chain| chain.borrow().iter().any(|held| held.as_str() > name))
    }
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        LOAD_CHAIN.with(|chain| {
            let mut chain = chain.borrow_mut();
            if let Some(pos) = chain.iter().rposition(|n| n == &self.name) {
                chain.remove(pos);
            }
        });
    }
}

/// The module loader.
///
/// Owns the registry, the dependency graph, and the dynamic loader
/// backend. Shared among the startup thread, the console, and worker
/// threads running module code; all operations are safe to call
/// concurrently.
///
/// # Example
///
/// ```ignore
/// use lbbs_core::ModulesConfig;
/// use lbbs_modules::ModuleLoader;
///
/// let loader = ModuleLoader::new(ModulesConfig::default());
/// loader.load("net_smtp")?;
/// loader.reload("net_smtp", /* queue */ true)?;
/// loader.unload("net_smtp")?;
/// ```
pub struct ModuleLoader {
    config: ModulesConfig,
    registry: ModuleRegistry,
    graph: DependencyGraph,
    backend: LibraryBackend,
}

impl ModuleLoader {
    /// Create a loader for the given module configuration.
    #[must_use]
    pub fn new(config: ModulesConfig) -> Self {
        debug!("Creating module loader for {:?}", config.module_dir);
        let backend = LibraryBackend::new(config.module_dir.clone());
        Self {
            config,
            registry: ModuleRegistry::new(),
            graph: DependencyGraph::new(),
            backend,
        }
    }

    /// The configuration this loader was built with.
    #[must_use]
    pub fn config(&self) -> &ModulesConfig {
        &self.config
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Register an in-process constructor for `name` (see
    /// [`LibraryBackend::provide`]).
    pub fn provide<F>(&self, name: &str, ctor: F)
    where
        F: Fn() -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.backend.provide(name, ctor);
    }

    /// One status line per known module.
    #[must_use]
    pub fn list(&self) -> Vec<ModuleStatus> {
        self.registry.statuses()
    }

    /// Load a module by name.
    ///
    /// # Errors
    ///
    /// `already-loaded` if it is live, `not-found`/`load-failed` from the
    /// backend or the module's own `load`, `would-cycle` if reached
    /// through a requires cycle.
    pub fn load(&self, name: &str) -> Result<()> {
        let canon = canonical_name(name)?;
        self.load_canonical(&canon)?;
        Ok(())
    }

    fn load_canonical(&self, canon: &str) -> std::result::Result<(), ModuleError> {
        if let Some(existing) = self.registry.lookup(canon)
            && existing.state() == ModuleState::Loaded
        {
            return Err(ModuleError::AlreadyLoaded(canon.to_string()));
        }

        let _chain = ChainGuard::enter(canon)?;
        let (record, _created) = self.registry.get_or_insert(canon);

        // Transition locks nest in ascending canonical-name order during
        // dependency traversal. An acquisition that would run against
        // that order must not block: two opposing require chains would
        // deadlock. Take the lock only if it is free and reject the
        // loser of the race otherwise.
        let _transition = if ChainGuard::would_invert_lock_order(canon) {
            match record.transition.try_lock() {
                Some(guard) => guard,
                None => {
                    return Err(ModuleError::StateConflict {
                        name: canon.to_string(),
                        state: record.state().to_string(),
                    });
                }
            }
        } else {
            record.transition.lock()
        };

        {
            let mut inner = record.inner.lock();
            match inner.state {
                // A racing load of the same name finished while we waited
                // on the transition lock; we joined its barrier.
                ModuleState::Loaded => return Ok(()),
                ModuleState::Discovered
                | ModuleState::Unloaded
                | ModuleState::Failed => {
                    inner.state = ModuleState::Opening;
                }
                state => {
                    return Err(ModuleError::StateConflict {
                        name: canon.to_string(),
                        state: state.to_string(),
                    });
                }
            }
        }

        self.do_load_locked(&record, canon)
    }

    /// Open, register, and run `load`. Caller holds the transition lock
    /// and has put the record in `opening`.
    fn do_load_locked(
        &self,
        record: &Arc<ModuleRecord>,
        canon: &str,
    ) -> std::result::Result<(), ModuleError> {
        let want_global = record.inner.lock().flags.exports_global_symbols;
        let (token, backing) = match self.backend.open(&self.registry, canon, want_global) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Failed to open module '{}': {}", canon, e);
                self.fail_record(record, canon);
                return Err(e);
            }
        };
        record.inner.lock().backing = backing;

        let Some(entry) = record.inner.lock().entry.clone() else {
            self.fail_record(record, canon);
            return Err(ModuleError::Internal(format!(
                "module '{canon}' registered without entrypoints"
            )));
        };

        info!("Loading module '{}'", canon);
        let ctx = ModuleContext::new(self, token);
        match entry.load(&ctx) {
            Ok(()) => {
                let seq = self.registry.next_load_seq();
                let mut inner = record.inner.lock();
                inner.state = ModuleState::Loaded;
                inner.load_seq = seq;
                drop(inner);
                info!("Module '{}' loaded", canon);
                Ok(())
            }
            Err(e) => {
                error!("Module '{}' load entrypoint failed: {}", canon, e);
                let reason = e.to_string();
                // Anything it pinned before failing is released again.
                self.release_requires(canon);
                // The instance is destroyed before its library is closed.
                drop(entry);
                self.fail_record(record, canon);
                Err(ModuleError::LoadFailed {
                    name: canon.to_string(),
                    reason,
                })
            }
        }
    }

    /// Move a record to `failed`, tear down its instance and backing, and
    /// purge it once idle.
    fn fail_record(&self, record: &Arc<ModuleRecord>, canon: &str) {
        record.inner.lock().state = ModuleState::Failed;
        let _ = self.registry.unregister(canon);
        let backing = record.inner.lock().backing.take();
        if let Some(backing) = backing {
            self.backend.close(canon, backing);
        }
        self.registry.remove_idle(canon);
    }

    /// Unload a module by name.
    ///
    /// # Errors
    ///
    /// Refused while references are outstanding or dependents are live;
    /// `unload-failed` if the module's own `unload` errors (the module
    /// then stays loaded).
    pub fn unload(&self, name: &str) -> Result<()> {
        let canon = canonical_name(name)?;
        let Some(record) = self.registry.lookup(&canon) else {
            return Err(ModuleError::NotFound(canon).into());
        };
        let _transition = record.transition.lock();

        {
            let inner = record.inner.lock();
            if inner.state != ModuleState::Loaded {
                return Err(ModuleError::StateConflict {
                    name: canon,
                    state: inner.state.to_string(),
                }
                .into());
            }
        }
        let dependents = self.graph.dependents_of(&canon);
        if !dependents.is_empty() {
            return Err(ModuleError::UnloadRefused {
                name: canon,
                reason: format!("required by {}", dependents.join(", ")),
            }
            .into());
        }

        self.do_unload_locked(&record, &canon)?;
        self.registry.remove_idle(&canon);
        Ok(())
    }

    /// Run `unload`, release leftover requires, detach, and close the
    /// backing. Caller holds the transition lock on a `loaded` record.
    ///
    /// The refcount gate and the move to `unloading` are one atomic
    /// step, so no reference can slip in between them.
    fn do_unload_locked(
        &self,
        record: &Arc<ModuleRecord>,
        canon: &str,
    ) -> std::result::Result<(), ModuleError> {
        {
            let mut inner = record.inner.lock();
            if inner.refcount > 0 {
                return Err(ModuleError::UnloadRefused {
                    name: canon.to_string(),
                    reason: format!("in use (refcount {})", inner.refcount),
                });
            }
            inner.state = ModuleState::Unloading;
        }
        let Some(entry) = record.inner.lock().entry.clone() else {
            return Err(ModuleError::Internal(format!(
                "module '{canon}' loaded without entrypoints"
            )));
        };

        info!("Unloading module '{}'", canon);
        let ctx = ModuleContext::new(self, SelfToken::new(canon));
        if let Err(e) = entry.unload(&ctx) {
            warn!("Module '{}' refused to unload: {}", canon, e);
            record.inner.lock().state = ModuleState::Loaded;
            return Err(ModuleError::UnloadFailed {
                name: canon.to_string(),
                reason: e.to_string(),
            });
        }

        // Whatever the module still has pinned is released in reverse
        // acquisition order.
        self.release_requires(canon);

        let backing = {
            let mut inner = record.inner.lock();
            inner.state = ModuleState::Unloaded;
            inner.deferred_reload = false;
            inner.backing.take()
        };
        let _ = self.registry.unregister(canon);
        // The instance is destroyed before its library is closed.
        drop(entry);
        if let Some(backing) = backing {
            self.backend.close(canon, backing);
        }
        info!("Module '{}' unloaded", canon);
        Ok(())
    }

    /// Reload a module.
    ///
    /// With refcount zero this is a full unload followed by a full load
    /// of the same canonical name. With a nonzero refcount, `queue`
    /// selects between deferring until the count returns to zero and
    /// refusing outright.
    ///
    /// # Errors
    ///
    /// `not-found`, `state-conflict`, `reload-refused` when busy without
    /// `queue`, or whatever the unload/load halves surface.
    pub fn reload(&self, name: &str, queue: bool) -> Result<ReloadOutcome> {
        let canon = canonical_name(name)?;
        self.reload_canonical(&canon, queue).map_err(LbbsError::from)
    }

    fn reload_canonical(
        &self,
        canon: &str,
        queue: bool,
    ) -> std::result::Result<ReloadOutcome, ModuleError> {
        let Some(record) = self.registry.lookup(canon) else {
            return Err(ModuleError::NotFound(canon.to_string()));
        };
        let _transition = record.transition.lock();

        {
            let mut inner = record.inner.lock();
            if inner.state != ModuleState::Loaded {
                return Err(ModuleError::StateConflict {
                    name: canon.to_string(),
                    state: inner.state.to_string(),
                });
            }
            if inner.refcount > 0 {
                if queue {
                    inner.deferred_reload = true;
                    drop(inner);
                    info!("Module '{}' busy, reload queued", canon);
                    return Ok(ReloadOutcome::Queued);
                }
                let refcount = inner.refcount;
                return Err(ModuleError::ReloadRefused {
                    name: canon.to_string(),
                    reason: format!("in use (refcount {refcount})"),
                });
            }
        }

        info!("Reloading module '{}'", canon);
        self.do_unload_locked(&record, canon)?;
        record.inner.lock().state = ModuleState::Opening;
        let _chain = ChainGuard::enter(canon)?;
        self.do_load_locked(&record, canon)?;

        // Fresh instance; let it know this was a warm start.
        if let Some(entry) = record.inner.lock().entry.clone() {
            let ctx = ModuleContext::new(self, SelfToken::new(canon));
            if let Err(e) = entry.reload(&ctx) {
                warn!("Module '{}' reload hook failed: {}", canon, e);
            }
        }
        Ok(ReloadOutcome::Reloaded)
    }

    /// Drain the deferred-reload queue.
    ///
    /// Invoked between top-level operations and at shutdown entry. A
    /// module that picked up new references since being queued keeps its
    /// deferred bit and re-arms on the next refcount-zero.
    pub fn drain_deferred(&self) {
        while let Some(name) = self.registry.take_deferred() {
            debug!("Draining deferred reload of '{}'", name);
            match self.reload_canonical(&name, false) {
                Ok(_) => {}
                Err(ModuleError::ReloadRefused { .. }) => {
                    debug!("Module '{}' busy again, deferred reload re-armed", name);
                }
                Err(e) => {
                    error!("Deferred reload of '{}' failed: {}", name, e);
                }
            }
        }
    }

    /// Pin a module from outside (console, event hooks).
    ///
    /// # Errors
    ///
    /// `not-found` for unknown names; `state-conflict` unless the module
    /// is loaded or registered.
    pub fn ref_module(&self, name: &str) -> Result<ModuleRef> {
        let canon = canonical_name(name)?;
        let Some(record) = self.registry.lookup(&canon) else {
            return Err(ModuleError::NotFound(canon).into());
        };
        Ok(self.registry.ref_record(&record)?)
    }

    /// Release a reference obtained with [`ref_module`](Self::ref_module).
    ///
    /// Dropping the last reference fires any queued reload on the next
    /// drain.
    pub fn unref(&self, reference: ModuleRef) {
        self.registry.unref(reference);
    }

    /// Pin `name` on behalf of the module identified by `dependent`,
    /// loading it first if needed. Called via
    /// [`ModuleContext::require`](crate::ModuleContext::require).
    ///
    /// # Errors
    ///
    /// `not-found`, `load-failed`, or `would-cycle`.
    pub(crate) fn require(&self, dependent: &SelfToken, name: &str) -> Result<ModuleRef> {
        let canon = canonical_name(name)?;
        if canon == dependent.name() {
            return Err(ModuleError::WouldCycle {
                dependent: dependent.name().to_string(),
                dependency: canon,
            }
            .into());
        }

        let needs_load = self
            .registry
            .lookup(&canon)
            .is_none_or(|r| r.state() != ModuleState::Loaded);
        if needs_load
            && let Err(e) = self.load_canonical(&canon)
            && !e.is_benign_duplicate()
        {
            return Err(e.into());
        }
        let Some(record) = self.registry.lookup(&canon) else {
            return Err(ModuleError::NotFound(canon).into());
        };

        self.graph.add_edge(dependent.name(), &canon)?;
        match self.registry.ref_record(&record) {
            Ok(reference) => {
                debug!("Module '{}' requires '{}'", dependent.name(), canon);
                Ok(reference)
            }
            Err(e) => {
                self.graph.remove_edge(dependent.name(), &canon);
                Err(e.into())
            }
        }
    }

    /// Drop a requires edge and its reference. Called via
    /// [`ModuleContext::unrequire`](crate::ModuleContext::unrequire).
    pub(crate) fn unrequire(&self, dependent: &SelfToken, reference: ModuleRef) -> Result<()> {
        let dependency = reference.name().to_string();
        if !self.graph.remove_edge(dependent.name(), &dependency) {
            warn!(
                "Module '{}' released '{}' it never required",
                dependent.name(),
                dependency
            );
            return Err(ModuleError::Internal(format!(
                "no requires edge {} -> {dependency}",
                dependent.name()
            ))
            .into());
        }
        self.registry.unref(reference);
        Ok(())
    }

    /// Release every requires edge out of `dependent`, most recent first.
    fn release_requires(&self, dependent: &str) {
        for dependency in self.graph.drain_requires(dependent) {
            if let Some(record) = self.registry.lookup(&dependency) {
                self.registry.unref(ModuleRef { record });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ModuleDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted {
        desc: &'static ModuleDescriptor,
        loads: Arc<AtomicUsize>,
        fail_load: bool,
    }

    impl Module for Counted {
        fn descriptor(&self) -> &'static ModuleDescriptor {
            self.desc
        }

        fn load(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(LbbsError::Configuration("broken module".to_string()));
            }
            Ok(())
        }

        fn unload(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    struct Requiring {
        desc: &'static ModuleDescriptor,
        dep: &'static str,
    }

    impl Module for Requiring {
        fn descriptor(&self) -> &'static ModuleDescriptor {
            self.desc
        }

        fn load(&self, ctx: &ModuleContext<'_>) -> Result<()> {
            ctx.require(self.dep)?;
            Ok(())
        }

        fn unload(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn test_loader() -> ModuleLoader {
        ModuleLoader::new(ModulesConfig::with_dir(std::env::temp_dir()))
    }

    fn install(loader: &ModuleLoader, name: &'static str, fail_load: bool) -> Arc<AtomicUsize> {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let desc: &'static ModuleDescriptor =
            Box::leak(Box::new(ModuleDescriptor::new(name, "test module")));
        loader.provide(name, move || {
            Arc::new(Counted {
                desc,
                loads: Arc::clone(&counter),
                fail_load,
            })
        });
        loads
    }

    #[test]
    fn load_then_unload_round_trips() {
        let loader = test_loader();
        let loads = install(&loader, "mod_roundtrip", false);

        loader.load("mod_roundtrip").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let status = loader.list();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, ModuleState::Loaded);
        assert_eq!(status[0].refcount, 0);

        loader.unload("mod_roundtrip").unwrap();
        assert!(loader.list().is_empty());
    }

    #[test]
    fn double_load_is_already_loaded() {
        let loader = test_loader();
        install(&loader, "mod_twice", false);

        loader.load("mod_twice").unwrap();
        assert!(matches!(
            loader.load("mod_twice"),
            Err(LbbsError::Module(ModuleError::AlreadyLoaded(_)))
        ));
    }

    #[test]
    fn failed_load_purges_the_record() {
        let loader = test_loader();
        install(&loader, "mod_broken", true);

        assert!(matches!(
            loader.load("mod_broken"),
            Err(LbbsError::Module(ModuleError::LoadFailed { .. }))
        ));
        assert!(loader.list().is_empty());

        // The name is not poisoned; a fresh load starts over.
        assert!(loader.load("mod_broken").is_err());
    }

    #[test]
    fn unload_refused_while_referenced() {
        let loader = test_loader();
        install(&loader, "mod_pinned", false);
        loader.load("mod_pinned").unwrap();

        let reference = loader.ref_module("mod_pinned").unwrap();
        assert!(matches!(
            loader.unload("mod_pinned"),
            Err(LbbsError::Module(ModuleError::UnloadRefused { .. }))
        ));

        loader.unref(reference);
        loader.unload("mod_pinned").unwrap();
    }

    #[test]
    fn reload_refused_busy_without_queue() {
        let loader = test_loader();
        let loads = install(&loader, "mod_busy", false);
        loader.load("mod_busy").unwrap();

        let reference = loader.ref_module("mod_busy").unwrap();
        assert!(matches!(
            loader.reload("mod_busy", false),
            Err(LbbsError::Module(ModuleError::ReloadRefused { .. }))
        ));

        assert_eq!(loader.reload("mod_busy", true).unwrap(), ReloadOutcome::Queued);
        loader.unref(reference);
        loader.drain_deferred();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(loader.list()[0].state, ModuleState::Loaded);
    }

    #[test]
    fn reload_idle_swaps_the_instance() {
        let loader = test_loader();
        let loads = install(&loader, "mod_swap", false);
        loader.load("mod_swap").unwrap();

        assert_eq!(
            loader.reload("mod_swap", false).unwrap(),
            ReloadOutcome::Reloaded
        );
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn out_of_order_nested_lock_never_blocks() {
        let loader = test_loader();
        install(&loader, "mod_alpha", false);
        let desc: &'static ModuleDescriptor =
            Box::leak(Box::new(ModuleDescriptor::new("mod_zeta", "test module")));
        loader.provide("mod_zeta", move || {
            Arc::new(Requiring {
                desc,
                dep: "mod_alpha",
            })
        });

        // Requiring mod_alpha from mod_zeta's load nests transition
        // locks against ascending name order. While mod_alpha's lock is
        // held elsewhere, that acquisition is rejected, not blocked on.
        let (alpha, _) = loader.registry().get_or_insert("mod_alpha");
        let held = alpha.transition.lock();
        assert!(matches!(
            loader.load("mod_zeta"),
            Err(LbbsError::Module(ModuleError::LoadFailed { .. }))
        ));

        drop(held);
        loader.load("mod_zeta").unwrap();
        assert_eq!(loader.list().len(), 2);
    }

    #[test]
    fn unknown_module_is_not_found() {
        let loader = test_loader();
        assert!(matches!(
            loader.load("mod_ghost"),
            Err(LbbsError::Module(ModuleError::NotFound(_)))
        ));
        assert!(matches!(
            loader.unload("mod_ghost"),
            Err(LbbsError::Module(ModuleError::NotFound(_)))
        ));
    }
}
