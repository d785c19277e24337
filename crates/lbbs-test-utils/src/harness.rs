//! Test harness for isolated loader testing.

use std::sync::Arc;

use lbbs_core::ModulesConfig;
use lbbs_modules::ModuleLoader;

/// Harness providing an isolated loader with an empty module directory.
///
/// All test modules are in-process fixtures registered through
/// [`crate::ScriptedModuleBuilder::install`]; the module directory never
/// has to exist.
pub struct LoaderHarness {
    loader: Arc<ModuleLoader>,
}

impl LoaderHarness {
    /// Create a harness with no autoload list.
    #[must_use]
    pub fn new() -> Self {
        Self::with_autoload(&[])
    }

    /// Create a harness whose loader autoloads the given names.
    #[must_use]
    pub fn with_autoload(names: &[&str]) -> Self {
        let mut config = ModulesConfig::with_dir(std::env::temp_dir());
        config.autoload = names.iter().map(|s| (*s).to_string()).collect();
        Self {
            loader: Arc::new(ModuleLoader::new(config)),
        }
    }

    /// The loader under test.
    #[must_use]
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// A clonable handle for spawned threads.
    #[must_use]
    pub fn shared(&self) -> Arc<ModuleLoader> {
        Arc::clone(&self.loader)
    }
}

impl Default for LoaderHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_starts_empty() {
        let harness = LoaderHarness::new();
        assert!(harness.loader().list().is_empty());
    }
}
