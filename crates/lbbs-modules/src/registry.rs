//! Process-wide module registry.
//!
//! The registry owns the name → record table, the deferred-reload queue,
//! and the refcount gate. It is the only component that creates or
//! destroys module records; the lifecycle coordinator drives every state
//! transition through it.
//!
//! # Locking
//!
//! The registry lock protects the record table and the deferred-reload
//! queue and is held only for short lookups. Each record carries two
//! locks of its own: the transition lock serializing lifecycle mutations
//! (held across entrypoint calls, so at most one is in flight per record)
//! and a short-term state lock for its fields. Lock order is registry,
//! then dependency graph, then transition, then record state.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use lbbs_core::ModuleError;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::backend::Backing;
use crate::descriptor::ModuleFlags;
use crate::module::{Module, SelfToken};

/// Lifecycle state of a module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Known (e.g. from the autoload scan) but never opened.
    Discovered,
    /// The backend is opening the shared object.
    Opening,
    /// The module registered its descriptor; `load` has not run yet.
    Registered,
    /// `load` returned success; the module is live.
    Loaded,
    /// `unload` is in progress.
    Unloading,
    /// Torn down; the record is about to be purged.
    Unloaded,
    /// A lifecycle step failed; retained until the failure is reported.
    Failed,
}

impl ModuleState {
    /// Whether a reference may be taken in this state.
    #[must_use]
    pub const fn can_ref(self) -> bool {
        matches!(self, ModuleState::Loaded | ModuleState::Registered)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Opening => "opening",
            ModuleState::Registered => "registered",
            ModuleState::Loaded => "loaded",
            ModuleState::Unloading => "unloading",
            ModuleState::Unloaded => "unloaded",
            ModuleState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Mutable fields of a module record, guarded by the record's state lock.
///
/// Field order matters for drop: the module instance must be destroyed
/// before the library that contains its code.
pub(crate) struct RecordInner {
    pub(crate) state: ModuleState,
    pub(crate) description: String,
    pub(crate) flags: ModuleFlags,
    pub(crate) refcount: u32,
    pub(crate) deferred_reload: bool,
    pub(crate) load_seq: u64,
    pub(crate) entry: Option<Arc<dyn Module>>,
    pub(crate) backing: Option<Backing>,
}

/// One record per discovered-or-loaded module.
pub struct ModuleRecord {
    name: String,
    /// Serializes lifecycle mutations; held across entrypoint calls.
    pub(crate) transition: Mutex<()>,
    /// Short-term lock for state bits and the refcount.
    pub(crate) inner: Mutex<RecordInner>,
}

impl ModuleRecord {
    fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            transition: Mutex::new(()),
            inner: Mutex::new(RecordInner {
                state: ModuleState::Discovered,
                description: String::new(),
                flags: ModuleFlags::NONE,
                refcount: 0,
                deferred_reload: false,
                load_seq: 0,
                entry: None,
                backing: None,
            }),
        })
    }

    /// Canonical module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.inner.lock().state
    }

    /// Current reference count.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.inner.lock().refcount
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("refcount", &inner.refcount)
            .finish_non_exhaustive()
    }
}

/// A live reference pinning a module.
///
/// Obtained from [`crate::ModuleLoader::ref_module`] or
/// [`crate::ModuleContext::require`]. Must be released explicitly with
/// the matching `unref`/`unrequire`; dropping it does not decrement the
/// refcount.
pub struct ModuleRef {
    pub(crate) record: Arc<ModuleRecord>,
}

impl ModuleRef {
    /// Canonical name of the pinned module.
    #[must_use]
    pub fn name(&self) -> &str {
        self.record.name()
    }
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModuleRef").field(&self.name()).finish()
    }
}

/// One line of the `modules` listing.
#[derive(Debug, Clone)]
pub struct ModuleStatus {
    /// Canonical module name.
    pub name: String,
    /// Human-readable description from the descriptor.
    pub description: String,
    /// Outstanding references (explicit refs plus requires edges).
    pub refcount: u32,
    /// Lifecycle state.
    pub state: ModuleState,
}

struct RegistryInner {
    records: HashMap<String, Arc<ModuleRecord>>,
    deferred: VecDeque<String>,
    next_seq: u64,
}

/// The process-wide collection of known modules.
#[derive(Default)]
pub struct ModuleRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            deferred: VecDeque::new(),
            next_seq: 0,
        }
    }
}

impl ModuleRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by canonical name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        self.inner.lock().records.get(name).cloned()
    }

    /// Fetch the record for `name`, creating a fresh one if absent.
    ///
    /// Returns the record and whether it was just created.
    pub(crate) fn get_or_insert(&self, name: &str) -> (Arc<ModuleRecord>, bool) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get(name) {
            (Arc::clone(record), false)
        } else {
            let record = ModuleRecord::new(name.to_string());
            inner
                .records
                .insert(name.to_string(), Arc::clone(&record));
            (record, true)
        }
    }

    /// Attach a freshly constructed module instance to its open-in-progress
    /// record.
    ///
    /// This is the registration path every module goes through, shared
    /// object and built-in alike: it validates the descriptor name against
    /// the record currently being opened, attaches the entrypoints, and
    /// moves the record from `opening` to `registered`.
    ///
    /// # Errors
    ///
    /// Fails if no open-in-progress record matches the descriptor name,
    /// or if the record with that name is live in some other state.
    pub(crate) fn register(&self, module: &Arc<dyn Module>) -> Result<SelfToken, ModuleError> {
        let desc = module.descriptor();
        let canon = canonical_name(desc.name)?;
        let Some(record) = self.lookup(&canon) else {
            return Err(ModuleError::Internal(format!(
                "module '{canon}' registered with no open in progress"
            )));
        };

        let mut inner = record.inner.lock();
        if inner.state != ModuleState::Opening {
            return Err(ModuleError::StateConflict {
                name: canon,
                state: inner.state.to_string(),
            });
        }
        inner.description = desc.description.to_string();
        inner.flags = desc.flags;
        inner.entry = Some(Arc::clone(module));
        inner.state = ModuleState::Registered;
        debug!("Module '{}' registered", canon);
        Ok(SelfToken::new(&canon))
    }

    /// Detach a module's entrypoints on the way out.
    ///
    /// Only valid once the record has left the live states; anything else
    /// is an invariant violation and is reported, not honored.
    pub(crate) fn unregister(&self, name: &str) -> Result<(), ModuleError> {
        let Some(record) = self.lookup(name) else {
            return Ok(());
        };
        let mut inner = record.inner.lock();
        match inner.state {
            ModuleState::Registered | ModuleState::Unloaded | ModuleState::Failed => {
                inner.entry = None;
                Ok(())
            }
            state => {
                error!(
                    "Refusing to unregister module '{}' in state '{}'",
                    name, state
                );
                Err(ModuleError::Internal(format!(
                    "unregister of '{name}' in state '{state}'"
                )))
            }
        }
    }

    /// Take a reference on a record.
    ///
    /// # Errors
    ///
    /// Fails with a state conflict unless the record is `loaded` or
    /// `registered`.
    pub(crate) fn ref_record(
        &self,
        record: &Arc<ModuleRecord>,
    ) -> Result<ModuleRef, ModuleError> {
        let mut inner = record.inner.lock();
        if !inner.state.can_ref() {
            return Err(ModuleError::StateConflict {
                name: record.name().to_string(),
                state: inner.state.to_string(),
            });
        }
        inner.refcount += 1;
        Ok(ModuleRef {
            record: Arc::clone(record),
        })
    }

    /// Release a reference.
    ///
    /// If this was the last reference and a deferred reload is pending,
    /// the module's name is enqueued for the coordinator's drainer. The
    /// record itself is never freed here.
    pub(crate) fn unref(&self, reference: ModuleRef) {
        let mut registry = self.inner.lock();
        let mut inner = reference.record.inner.lock();
        if inner.refcount == 0 {
            error!(
                "Refcount underflow on module '{}'",
                reference.record.name()
            );
            return;
        }
        inner.refcount -= 1;
        if inner.refcount == 0 && inner.deferred_reload {
            let name = reference.record.name().to_string();
            if !registry.deferred.contains(&name) {
                debug!("Module '{}' idle, queueing deferred reload", name);
                registry.deferred.push_back(name);
            }
        }
    }

    /// Pop the next name from the deferred-reload queue.
    pub(crate) fn take_deferred(&self) -> Option<String> {
        self.inner.lock().deferred.pop_front()
    }

    /// Next load-completion sequence number.
    pub(crate) fn next_load_seq(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        inner.next_seq
    }

    /// Drop an idle record (refcount zero, terminal state) from the table.
    pub(crate) fn remove_idle(&self, name: &str) -> bool {
        let mut registry = self.inner.lock();
        let Some(record) = registry.records.get(name) else {
            return false;
        };
        let idle = {
            let inner = record.inner.lock();
            inner.refcount == 0
                && matches!(inner.state, ModuleState::Unloaded | ModuleState::Failed)
        };
        if idle {
            registry.records.remove(name);
            debug!("Module '{}' purged from registry", name);
        }
        idle
    }

    /// Snapshot all records.
    pub(crate) fn snapshot(&self) -> Vec<Arc<ModuleRecord>> {
        self.inner.lock().records.values().cloned().collect()
    }

    /// One status line per record, sorted by name.
    #[must_use]
    pub fn statuses(&self) -> Vec<ModuleStatus> {
        let mut statuses: Vec<ModuleStatus> = self
            .snapshot()
            .into_iter()
            .map(|record| {
                let inner = record.inner.lock();
                ModuleStatus {
                    name: record.name().to_string(),
                    description: inner.description.clone(),
                    refcount: inner.refcount,
                    state: inner.state,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Number of known records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().records.len()
    }
}

/// Canonicalize a module name.
///
/// Strips one trailing platform shared-object suffix if present and
/// lowercases. Empty names and names containing path separators or
/// whitespace are invalid.
///
/// # Errors
///
/// Returns `ModuleError::InvalidName` for names that cannot be
/// canonicalized.
pub fn canonical_name(raw: &str) -> Result<String, ModuleError> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_suffix(std::env::consts::DLL_SUFFIX)
        .unwrap_or(trimmed);
    if stripped.is_empty()
        || stripped
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace())
    {
        return Err(ModuleError::InvalidName(raw.to_string()));
    }
    Ok(stripped.to_ascii_lowercase())
}
