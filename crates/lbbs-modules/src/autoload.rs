//! Autoload orchestration.
//!
//! Loads the configured module list at startup and unloads every live
//! module in reverse dependency order at shutdown.

use lbbs_core::LbbsError;
use tracing::{debug, error, info, warn};

use crate::lifecycle::ModuleLoader;
use crate::registry::ModuleState;

/// Outcome of a [`ModuleLoader::load_all`] pass.
#[derive(Debug, Default)]
pub struct AutoloadReport {
    /// Names that ended up loaded.
    pub loaded: Vec<String>,
    /// Names that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl AutoloadReport {
    /// True when every configured entry loaded.
    #[must_use]
    pub fn fully_loaded(&self) -> bool {
        self.failed.is_empty()
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.fully_loaded() {
            format!("fully loaded ({} modules)", self.loaded.len())
        } else {
            let names: Vec<&str> = self.failed.iter().map(|(n, _)| n.as_str()).collect();
            format!(
                "partially loaded ({} ok, {} failed: {})",
                self.loaded.len(),
                self.failed.len(),
                names.join(", ")
            )
        }
    }
}

impl ModuleLoader {
    /// Load every module on the configured autoload list, in order.
    ///
    /// A failure on one entry is recorded and the next is attempted;
    /// unknown entries are reported, not fatal.
    pub fn load_all(&self) -> AutoloadReport {
        let names = self.config().autoload.clone();
        info!("Autoloading {} modules", names.len());

        let mut report = AutoloadReport::default();
        for name in names {
            match self.load(&name) {
                Ok(()) => report.loaded.push(name),
                Err(LbbsError::Module(e)) if e.is_benign_duplicate() => {
                    // Already pulled in as a dependency of an earlier entry.
                    debug!("Autoload entry '{}' already loaded", name);
                    report.loaded.push(name);
                }
                Err(e) => {
                    warn!("Autoload of '{}' failed: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        self.drain_deferred();
        info!("Autoload complete: {}", report.summary());
        report
    }

    /// Unload every live module, leaves of the requires graph first.
    ///
    /// Repeatedly unloads loaded modules with no dependents, most
    /// recently loaded first, until none remain. Stragglers that can
    /// never come down (outstanding references) are forced through
    /// `failed` for diagnostics.
    pub fn unload_all(&self) {
        self.drain_deferred();
        info!("Unloading all modules");

        loop {
            let mut candidates: Vec<(u64, String)> = self
                .registry()
                .snapshot()
                .into_iter()
                .filter(|record| {
                    record.state() == ModuleState::Loaded
                        && !self.graph().has_dependents(record.name())
                })
                .map(|record| {
                    let seq = record.inner.lock().load_seq;
                    (seq, record.name().to_string())
                })
                .collect();
            if candidates.is_empty() {
                break;
            }
            candidates.sort_by(|a, b| b.0.cmp(&a.0));

            let mut progress = false;
            for (_, name) in candidates {
                match self.unload(&name) {
                    Ok(()) => progress = true,
                    Err(e) => debug!("Shutdown unload of '{}' skipped: {}", name, e),
                }
            }
            if !progress {
                break;
            }
        }

        for record in self.registry().snapshot() {
            let mut inner = record.inner.lock();
            if inner.state == ModuleState::Loaded {
                error!(
                    "Module '{}' still loaded at shutdown (refcount {}), forcing failed",
                    record.name(),
                    inner.refcount
                );
                inner.state = ModuleState::Failed;
            }
        }
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        self.unload_all();
    }
}
