//! The module lifecycle interface.
//!
//! Defines the `Module` trait every loadable unit implements, the context
//! handed to its entrypoints, and the shared-object entry convention.

use std::fmt;
use std::sync::Arc;

use lbbs_core::Result;

use crate::descriptor::ModuleDescriptor;
use crate::lifecycle::ModuleLoader;
use crate::registry::ModuleRef;

/// Opaque identity the loader gives a module for its own use.
///
/// The token is handed out at registration and stored in the module's
/// context for every entrypoint call; modules use it to issue requires
/// and for logging. It is a non-owning identifier, valid only while the
/// module's record is live.
#[derive(Debug, Clone)]
pub struct SelfToken {
    name: Arc<str>,
}

impl SelfToken {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.into() }
    }

    /// The canonical name of the module this token identifies.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SelfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Context provided to modules during lifecycle entrypoints.
///
/// Carries the loader handle and the module's own token so entrypoints
/// can pin dependencies while they run.
pub struct ModuleContext<'a> {
    loader: &'a ModuleLoader,
    token: SelfToken,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(loader: &'a ModuleLoader, token: SelfToken) -> Self {
        Self { loader, token }
    }

    /// The canonical name of the module being called.
    #[must_use]
    pub fn name(&self) -> &str {
        self.token.name()
    }

    /// This module's self token.
    #[must_use]
    pub fn token(&self) -> &SelfToken {
        &self.token
    }

    /// The loader driving this entrypoint.
    #[must_use]
    pub fn loader(&self) -> &ModuleLoader {
        self.loader
    }

    /// Pin another module for the duration of this module's life.
    ///
    /// Loads the dependency if it is not already loaded, increments its
    /// refcount, and records the dependency edge. The returned reference
    /// must be released with [`unrequire`](Self::unrequire) from this
    /// module's `unload`; anything left over is released by the loader
    /// after `unload` returns.
    ///
    /// # Errors
    ///
    /// Fails if the dependency cannot be found or loaded, or if the edge
    /// would create a dependency cycle.
    pub fn require(&self, name: &str) -> Result<ModuleRef> {
        self.loader.require(&self.token, name)
    }

    /// Release a reference previously obtained with [`require`](Self::require).
    ///
    /// # Errors
    ///
    /// Fails if no matching dependency edge exists.
    pub fn unrequire(&self, reference: ModuleRef) -> Result<()> {
        self.loader.unrequire(&self.token, reference)
    }
}

/// Trait every LBBS module implements.
///
/// # Safety
///
/// Modules are TRUSTED native code with full system access.
///
/// # Example
///
/// ```ignore
/// use lbbs_modules::{Module, ModuleContext, ModuleDescriptor};
///
/// pub struct ChanServ;
///
/// impl Module for ChanServ {
///     fn descriptor(&self) -> &'static ModuleDescriptor {
///         static DESC: ModuleDescriptor =
///             ModuleDescriptor::new("mod_chanserv", "Channel services");
///         &DESC
///     }
///
///     fn load(&self, ctx: &ModuleContext<'_>) -> lbbs_core::Result<()> {
///         ctx.require("net_irc")?;
///         Ok(())
///     }
///
///     fn unload(&self, _ctx: &ModuleContext<'_>) -> lbbs_core::Result<()> {
///         Ok(())
///     }
/// }
///
/// // Export the module creation function
/// #[no_mangle]
/// pub extern "C" fn _lbbs_module_create() -> *mut dyn Module {
///     Box::into_raw(Box::new(ChanServ))
/// }
/// ```
pub trait Module: Send + Sync {
    /// The module's descriptor (name, description, flags).
    fn descriptor(&self) -> &'static ModuleDescriptor;

    /// Called once after registration to bring the module up.
    ///
    /// Start listeners, open resources, and pin dependencies here. The
    /// module only reaches the loaded state if this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Return an error to abort the load; the record is discarded.
    fn load(&self, ctx: &ModuleContext<'_>) -> Result<()>;

    /// Called to tear the module down before its backing is closed.
    ///
    /// Release dependencies pinned in `load`; anything left pinned is
    /// released by the loader after this returns.
    ///
    /// # Errors
    ///
    /// Return an error to refuse the unload; the module stays loaded.
    fn unload(&self, ctx: &ModuleContext<'_>) -> Result<()>;

    /// Optional hook invoked on the fresh instance after a reload
    /// completes, letting a module distinguish a warm start from a cold
    /// one. The default does nothing.
    ///
    /// # Errors
    ///
    /// Errors are logged; the module stays loaded either way.
    fn reload(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Type signature for the module creation function.
///
/// Every shared-object module exports a function with this signature
/// under [`MODULE_CREATE_SYMBOL`]. The backend invokes it at open time
/// and registers the returned instance, so registration happens before
/// the coordinator calls `load`.
///
/// # Note on FFI Safety
///
/// This type uses a trait object which is not strictly FFI-safe. This is
/// intentional - modules MUST be compiled with the same Rust version and
/// compiler settings as the host.
#[allow(improper_ctypes_definitions)]
pub type ModuleCreateFn = unsafe extern "C" fn() -> *mut dyn Module;

/// The expected symbol name for module creation.
pub const MODULE_CREATE_SYMBOL: &[u8] = b"_lbbs_module_create\0";

/// A module compiled into the host process rather than a shared object.
///
/// Built-ins are discovered by name exactly like on-disk modules, but
/// their records carry no library backing. Register one with
/// `inventory::submit!`.
pub struct BuiltinModule {
    /// Canonical module name.
    pub name: &'static str,
    /// Constructor producing a fresh instance.
    pub ctor: fn() -> Arc<dyn Module>,
}

impl BuiltinModule {
    /// Create a new built-in module registration.
    #[must_use]
    pub const fn new(name: &'static str, ctor: fn() -> Arc<dyn Module>) -> Self {
        Self { name, ctor }
    }
}
