//! Scriptable module fixtures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lbbs_core::{LbbsError, Result};
use lbbs_modules::{Module, ModuleContext, ModuleDescriptor, ModuleFlags, ModuleLoader, ModuleRef};
use parking_lot::Mutex;

/// Entrypoint call counters shared by every instance a fixture produces.
#[derive(Debug, Default)]
pub struct ModuleCalls {
    /// Number of `load` invocations.
    pub loads: AtomicUsize,
    /// Number of `unload` invocations.
    pub unloads: AtomicUsize,
    /// Number of `reload` hook invocations.
    pub reloads: AtomicUsize,
}

impl ModuleCalls {
    /// Loads so far.
    #[must_use]
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Unloads so far.
    #[must_use]
    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    /// Reload hook calls so far.
    #[must_use]
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

struct ScriptedModule {
    desc: &'static ModuleDescriptor,
    requires: Vec<String>,
    fail_load: bool,
    fail_unload: bool,
    calls: Arc<ModuleCalls>,
    held: Mutex<Vec<ModuleRef>>,
}

impl Module for ScriptedModule {
    fn descriptor(&self) -> &'static ModuleDescriptor {
        self.desc
    }

    fn load(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        self.calls.loads.fetch_add(1, Ordering::SeqCst);
        for name in &self.requires {
            let reference = ctx.require(name)?;
            self.held.lock().push(reference);
        }
        if self.fail_load {
            return Err(LbbsError::Configuration(format!(
                "{} scripted to fail load",
                ctx.name()
            )));
        }
        Ok(())
    }

    fn unload(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        self.calls.unloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_unload {
            return Err(LbbsError::Configuration(format!(
                "{} scripted to fail unload",
                ctx.name()
            )));
        }
        let mut held = self.held.lock();
        while let Some(reference) = held.pop() {
            ctx.unrequire(reference)?;
        }
        Ok(())
    }

    fn reload(&self, _ctx: &ModuleContext<'_>) -> Result<()> {
        self.calls.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builder for a scriptable in-process module.
///
/// Installing the fixture registers a provider with the loader; every
/// load constructs a fresh instance, all of them sharing one
/// [`ModuleCalls`] counter block.
///
/// ```ignore
/// let calls = ScriptedModuleBuilder::new("mod_mail")
///     .requires("net_smtp")
///     .install(harness.loader());
/// harness.loader().load("mod_mail")?;
/// assert_eq!(calls.loads(), 1);
/// ```
pub struct ScriptedModuleBuilder {
    name: String,
    description: String,
    flags: ModuleFlags,
    requires: Vec<String>,
    fail_load: bool,
    fail_unload: bool,
}

impl ScriptedModuleBuilder {
    /// Start a fixture named `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("scripted module {name}"),
            flags: ModuleFlags::NONE,
            requires: Vec::new(),
            fail_load: false,
            fail_unload: false,
        }
    }

    /// Set the descriptor description.
    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set descriptor flags.
    #[must_use]
    pub const fn flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Require `name` during `load`.
    #[must_use]
    pub fn requires(mut self, name: &str) -> Self {
        self.requires.push(name.to_string());
        self
    }

    /// Make `load` fail after any requires succeeded.
    #[must_use]
    pub const fn fail_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Make `unload` fail before releasing requires.
    #[must_use]
    pub const fn fail_unload(mut self) -> Self {
        self.fail_unload = true;
        self
    }

    /// Register the fixture as a provider on `loader`.
    pub fn install(self, loader: &ModuleLoader) -> Arc<ModuleCalls> {
        let calls = Arc::new(ModuleCalls::default());
        let shared = Arc::clone(&calls);
        let name: &'static str = Box::leak(self.name.into_boxed_str());
        let description: &'static str = Box::leak(self.description.into_boxed_str());
        let desc: &'static ModuleDescriptor = Box::leak(Box::new(
            ModuleDescriptor::with_flags(name, description, self.flags),
        ));
        let requires = self.requires;
        let fail_load = self.fail_load;
        let fail_unload = self.fail_unload;
        loader.provide(name, move || {
            Arc::new(ScriptedModule {
                desc,
                requires: requires.clone(),
                fail_load,
                fail_unload,
                calls: Arc::clone(&shared),
                held: Mutex::new(Vec::new()),
            })
        });
        calls
    }
}
