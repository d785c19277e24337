//! Server configuration.
//!
//! Configuration comes from a JSON file named by `LBBS_CONFIG`, or from
//! individual environment variables (`LBBS_MODULE_DIR`, `LBBS_AUTOLOAD`).

use std::path::PathBuf;

use lbbs_core::ModulesConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Module subsystem configuration.
    #[serde(default)]
    pub modules: ModulesConfig,
}

impl ServerConfig {
    /// Load configuration from the environment.
    ///
    /// `LBBS_CONFIG` names a JSON file; otherwise `LBBS_MODULE_DIR` and
    /// `LBBS_AUTOLOAD` (comma-separated names) override the defaults.
    /// Unreadable or malformed values are reported and fall back to the
    /// defaults rather than aborting startup.
    #[must_use]
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var("LBBS_CONFIG") {
            match Self::from_file(&PathBuf::from(&path)) {
                Ok(config) => return config,
                Err(e) => warn!("Ignoring config file {}: {}", path, e),
            }
        }

        let mut config = Self::default();
        if let Ok(dir) = std::env::var("LBBS_MODULE_DIR") {
            config.modules.module_dir = PathBuf::from(dir);
        }
        if let Ok(autoload) = std::env::var("LBBS_AUTOLOAD") {
            config.modules.autoload = autoload
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        config
    }

    /// Read configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_autoload() {
        let config = ServerConfig::default();
        assert!(config.modules.autoload.is_empty());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bbs.json");
        let json = r#"{"modules":{"module_dir":"/opt/lbbs/modules","autoload":["net_smtp","mod_mail"]}}"#;
        std::fs::write(&path, json).unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.modules.module_dir, PathBuf::from("/opt/lbbs/modules"));
        assert_eq!(config.modules.autoload, vec!["net_smtp", "mod_mail"]);
    }

    #[test]
    fn missing_config_file_errors() {
        assert!(ServerConfig::from_file(&PathBuf::from("/nonexistent/bbs.json")).is_err());
    }
}
