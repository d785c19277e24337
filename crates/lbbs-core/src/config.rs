//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Module subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directory searched for module shared objects.
    pub module_dir: PathBuf,
    /// Ordered list of canonical module names loaded at startup.
    pub autoload: Vec<String>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from("/usr/lib/lbbs/modules"),
            autoload: Vec::new(),
        }
    }
}

impl ModulesConfig {
    /// Create a config with the given module directory and no autoload.
    #[must_use]
    pub fn with_dir(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
            autoload: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ModulesConfig::default();
        assert!(config.autoload.is_empty());
        assert_eq!(config.module_dir, PathBuf::from("/usr/lib/lbbs/modules"));
    }

    #[test]
    fn config_serialization() {
        let config = ModulesConfig {
            module_dir: PathBuf::from("/tmp/modules"),
            autoload: vec!["net_smtp".to_string(), "mod_mail".to_string()],
        };

        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: ModulesConfig = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(config.module_dir, parsed.module_dir);
        assert_eq!(config.autoload, parsed.autoload);
    }

    proptest::proptest! {
        #[test]
        fn autoload_list_round_trips(autoload in proptest::collection::vec("[a-z_]{1,16}", 0..8)) {
            let config = ModulesConfig {
                module_dir: PathBuf::from("/tmp/modules"),
                autoload,
            };
            let json = serde_json::to_string(&config).expect("serialize");
            let parsed: ModulesConfig = serde_json::from_str(&json).expect("deserialize");
            proptest::prop_assert_eq!(config.autoload, parsed.autoload);
        }
    }
}
