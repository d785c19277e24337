//! Dependency tracker.
//!
//! Directed acyclic graph of "module A requires module B", maintained by
//! the `require`/`unrequire` calls modules make from their own `load` and
//! `unload` entrypoints. The graph has its own lock, ordered after the
//! registry lock and before record transition locks.

use std::collections::{HashMap, HashSet};

use lbbs_core::ModuleError;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct GraphInner {
    /// Forward edges per dependent, in acquisition order.
    requires: HashMap<String, Vec<String>>,
    /// Reverse edges per dependency.
    required_by: HashMap<String, Vec<String>>,
}

/// The requires graph.
#[derive(Default)]
pub struct DependencyGraph {
    inner: Mutex<GraphInner>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` requires `dependency`.
    ///
    /// Duplicate edges are allowed; each one corresponds to one reference
    /// on the dependency.
    ///
    /// # Errors
    ///
    /// Refuses with `WouldCycle` if the edge would close a cycle,
    /// including the degenerate self-edge.
    pub fn add_edge(&self, dependent: &str, dependency: &str) -> Result<(), ModuleError> {
        let mut inner = self.inner.lock();
        // The edge closes a cycle iff the dependency can already reach
        // back to the dependent.
        if dependent == dependency || inner.reachable(dependency, dependent) {
            return Err(ModuleError::WouldCycle {
                dependent: dependent.to_string(),
                dependency: dependency.to_string(),
            });
        }
        inner
            .requires
            .entry(dependent.to_string())
            .or_default()
            .push(dependency.to_string());
        inner
            .required_by
            .entry(dependency.to_string())
            .or_default()
            .push(dependent.to_string());
        debug!("Dependency edge added: {} -> {}", dependent, dependency);
        Ok(())
    }

    /// Remove one `dependent` → `dependency` edge (the most recent one).
    ///
    /// Returns false if no such edge exists.
    pub fn remove_edge(&self, dependent: &str, dependency: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(forward) = inner.requires.get_mut(dependent) else {
            return false;
        };
        let Some(pos) = forward.iter().rposition(|d| d == dependency) else {
            return false;
        };
        forward.remove(pos);
        if forward.is_empty() {
            inner.requires.remove(dependent);
        }
        if let Some(reverse) = inner.required_by.get_mut(dependency) {
            if let Some(pos) = reverse.iter().rposition(|d| d == dependent) {
                reverse.remove(pos);
            }
            if inner.required_by[dependency].is_empty() {
                inner.required_by.remove(dependency);
            }
        }
        debug!("Dependency edge removed: {} -> {}", dependent, dependency);
        true
    }

    /// Drain every edge out of `dependent`, returned in reverse
    /// acquisition order for release.
    pub fn drain_requires(&self, dependent: &str) -> Vec<String> {
        let mut inner = self.inner.lock();
        let Some(mut forward) = inner.requires.remove(dependent) else {
            return Vec::new();
        };
        for dependency in &forward {
            if let Some(reverse) = inner.required_by.get_mut(dependency) {
                if let Some(pos) = reverse.iter().rposition(|d| d == dependent) {
                    reverse.remove(pos);
                }
                if reverse.is_empty() {
                    inner.required_by.remove(dependency);
                }
            }
        }
        forward.reverse();
        forward
    }

    /// Names of the modules `dependent` currently requires.
    #[must_use]
    pub fn requires_of(&self, dependent: &str) -> Vec<String> {
        self.inner
            .lock()
            .requires
            .get(dependent)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the modules holding `dependency`, deduplicated.
    #[must_use]
    pub fn dependents_of(&self, dependency: &str) -> Vec<String> {
        let inner = self.inner.lock();
        let Some(reverse) = inner.required_by.get(dependency) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        reverse
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    /// Whether any module still requires `dependency`.
    #[must_use]
    pub fn has_dependents(&self, dependency: &str) -> bool {
        self.inner
            .lock()
            .required_by
            .get(dependency)
            .is_some_and(|v| !v.is_empty())
    }
}

impl GraphInner {
    /// Depth-first reachability over forward edges.
    fn reachable(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = self.requires.get(node) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }
}
