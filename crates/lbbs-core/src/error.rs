//! Error types for LBBS.
//!
//! Provides a unified error hierarchy:
//! - `LbbsError`: Top-level error type
//! - `ModuleError`: Module loader and lifecycle errors

use thiserror::Error;

/// Top-level error type for LBBS operations.
#[derive(Debug, Error)]
pub enum LbbsError {
    /// Module loader or lifecycle error.
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (catch-all).
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Module loader and lifecycle errors.
///
/// Every error surfaced by the lifecycle coordinator is one of these
/// kinds; errors returned by module entrypoints are wrapped as
/// `LoadFailed`/`UnloadFailed` with the module's reason preserved.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module with this canonical name is known or on disk.
    #[error("Module not found: {0}")]
    NotFound(String),

    /// The module is already loaded.
    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    /// The name cannot be canonicalized (empty, or contains separators).
    #[error("Invalid module name: {0:?}")]
    InvalidName(String),

    /// The module's shared object or load entrypoint failed.
    #[error("Failed to load module '{name}': {reason}")]
    LoadFailed {
        /// Canonical module name.
        name: String,
        /// Cause reported by the backend or the module.
        reason: String,
    },

    /// The module's unload entrypoint failed.
    #[error("Failed to unload module '{name}': {reason}")]
    UnloadFailed {
        /// Canonical module name.
        name: String,
        /// Cause reported by the module.
        reason: String,
    },

    /// Unload was refused because the module is still held.
    #[error("Refusing to unload module '{name}': {reason}")]
    UnloadRefused {
        /// Canonical module name.
        name: String,
        /// Why the unload was refused (refcount, dependents).
        reason: String,
    },

    /// Reload was refused because the module is busy and queueing was not
    /// requested.
    #[error("Refusing to reload module '{name}': {reason}")]
    ReloadRefused {
        /// Canonical module name.
        name: String,
        /// Why the reload was refused.
        reason: String,
    },

    /// Adding this dependency edge would close a cycle.
    #[error("Module '{dependent}' requiring '{dependency}' would create a dependency cycle")]
    WouldCycle {
        /// The module issuing the require.
        dependent: String,
        /// The module being required.
        dependency: String,
    },

    /// The operation is not valid in the record's current state.
    #[error("Module '{name}' is in state '{state}', operation not permitted")]
    StateConflict {
        /// Canonical module name.
        name: String,
        /// The state the record was observed in.
        state: String,
    },

    /// The well-known entry symbol was not found in the shared object.
    #[error("Symbol not found in module '{module}': {symbol}")]
    SymbolNotFound {
        /// Canonical module name.
        module: String,
        /// The symbol that was expected.
        symbol: String,
    },

    /// Loader invariant violation (a defect, not a user error).
    #[error("Internal module loader error: {0}")]
    Internal(String),
}

impl ModuleError {
    /// Check if this error means the module ended up not loaded.
    ///
    /// Autoload uses this to decide whether an entry counts as a failure
    /// worth reporting versus a benign duplicate.
    #[must_use]
    pub fn is_benign_duplicate(&self) -> bool {
        matches!(self, ModuleError::AlreadyLoaded(_))
    }
}
