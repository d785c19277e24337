//! Dynamic loader backend.
//!
//! Resolves a canonical name to a shared object under the configured
//! module directory, opens it, and runs the module's create function so
//! registration happens before the coordinator ever calls `load`. Also
//! hosts the in-process path: built-in modules (inventory-collected or
//! provided per loader instance) go through the same registration with
//! no library backing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lbbs_core::ModuleError;
use libloading::Library;
use parking_lot::Mutex;
use tracing::debug;

use crate::module::{MODULE_CREATE_SYMBOL, Module, ModuleCreateFn, SelfToken};
use crate::registry::ModuleRegistry;

/// Handle to a module's loaded shared object.
///
/// Dropping it runs the shared object's destructors and releases the
/// mapping. Built-in modules have no backing.
pub(crate) struct Backing {
    _library: Library,
}

/// Constructor for an in-process module instance.
pub type ModuleCtor = Box<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Opens and closes module backings.
pub struct LibraryBackend {
    module_dir: PathBuf,
    providers: Mutex<HashMap<String, ModuleCtor>>,
}

impl LibraryBackend {
    /// Create a backend rooted at the given module directory.
    #[must_use]
    pub fn new(module_dir: PathBuf) -> Self {
        Self {
            module_dir,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Register an in-process constructor for `name`.
    ///
    /// Providers take precedence over the module directory and over
    /// inventory-collected built-ins; the test harness relies on this.
    pub fn provide<F>(&self, name: &str, ctor: F)
    where
        F: Fn() -> Arc<dyn Module> + Send + Sync + 'static,
    {
        self.providers
            .lock()
            .insert(name.to_string(), Box::new(ctor));
    }

    /// Filesystem path a canonical name resolves to.
    #[must_use]
    pub fn module_path(&self, name: &str) -> PathBuf {
        self.module_dir
            .join(format!("{name}{}", std::env::consts::DLL_SUFFIX))
    }

    fn instantiate_builtin(&self, name: &str) -> Option<Arc<dyn Module>> {
        if let Some(ctor) = self.providers.lock().get(name) {
            return Some(ctor());
        }
        crate::builtin_modules()
            .into_iter()
            .find(|builtin| builtin.name == name)
            .map(|builtin| (builtin.ctor)())
    }

    /// Open the backing for `name` and register the module.
    ///
    /// `want_global` selects global symbol visibility up front (remembered
    /// from a previous load of the same record); if the freshly read
    /// descriptor asks for global symbols anyway, the library is reopened
    /// with them before registration.
    ///
    /// # Errors
    ///
    /// Fails when the shared object is missing, malformed, lacks the
    /// create symbol, or its constructor fails; and when registration is
    /// refused.
    pub(crate) fn open(
        &self,
        registry: &ModuleRegistry,
        name: &str,
        want_global: bool,
    ) -> Result<(SelfToken, Option<Backing>), ModuleError> {
        if let Some(instance) = self.instantiate_builtin(name) {
            debug!("Opening built-in module '{}'", name);
            let token = registry.register(&instance)?;
            return Ok((token, None));
        }

        let path = self.module_path(name);
        if !path.exists() {
            return Err(ModuleError::NotFound(name.to_string()));
        }

        debug!("Opening module '{}' from {:?}", name, path);
        let (library, instance) = self.open_shared(name, &path, want_global)?;

        // The descriptor may demand global symbol visibility the record
        // did not know about yet; reopen before anything resolves against
        // the library.
        let exports_global = instance.descriptor().flags.exports_global_symbols;
        let (library, instance) = if exports_global && !want_global {
            debug!("Module '{}' exports global symbols, reopening", name);
            drop(instance);
            drop(library);
            self.open_shared(name, &path, true)?
        } else {
            (library, instance)
        };

        let token = registry.register(&instance)?;
        Ok((token, Some(Backing { _library: library })))
    }

    /// Run the backing's destructors and release it.
    pub(crate) fn close(&self, name: &str, backing: Backing) {
        debug!("Closing backing of module '{}'", name);
        drop(backing);
    }

    fn open_shared(
        &self,
        name: &str,
        path: &Path,
        global: bool,
    ) -> Result<(Library, Arc<dyn Module>), ModuleError> {
        let library = open_library(path, global).map_err(|e| ModuleError::LoadFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let create: libloading::Symbol<'_, ModuleCreateFn> = unsafe {
            library
                .get(MODULE_CREATE_SYMBOL)
                .map_err(|_| ModuleError::SymbolNotFound {
                    module: name.to_string(),
                    symbol: "_lbbs_module_create".to_string(),
                })?
        };

        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(ModuleError::LoadFailed {
                name: name.to_string(),
                reason: "module create function returned null".to_string(),
            });
        }
        let instance: Arc<dyn Module> = unsafe { Arc::from(Box::from_raw(raw)) };
        drop(create);
        Ok((library, instance))
    }
}

/// Open a shared object with the requested symbol visibility.
#[cfg(unix)]
fn open_library(path: &Path, global: bool) -> Result<Library, libloading::Error> {
    use libloading::os::unix;

    let flags = if global {
        unix::RTLD_NOW | unix::RTLD_GLOBAL
    } else {
        unix::RTLD_NOW | unix::RTLD_LOCAL
    };
    unsafe { unix::Library::open(Some(path), flags).map(Into::into) }
}

#[cfg(not(unix))]
fn open_library(path: &Path, _global: bool) -> Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}
