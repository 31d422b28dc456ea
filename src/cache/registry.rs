//! Dependency index for cascading invalidation.
//!
//! Tracks which stored keys declared a dependency on which other keys, so
//! that removing a dependency key can find every entry that must go with it.

use std::collections::{HashMap, HashSet};

/// Maps a dependency key to the keys of entries that depend on it.
///
/// The index holds no lock of its own; it lives inside the store state and
/// is mutated under the store's write lock together with the entries.
#[derive(Debug, Default)]
pub(crate) struct DependencyIndex {
    dependents: HashMap<String, HashSet<String>>,
}

impl DependencyIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record that `key` depends on each of `dependencies`.
    pub(crate) fn register(&mut self, key: &str, dependencies: &[String]) {
        for dependency in dependencies {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    /// Drop the edges recorded for `key` when it leaves the store.
    pub(crate) fn unregister(&mut self, key: &str, dependencies: &[String]) {
        for dependency in dependencies {
            if let Some(keys) = self.dependents.get_mut(dependency) {
                keys.remove(key);
                if keys.is_empty() {
                    self.dependents.remove(dependency);
                }
            }
        }
    }

    /// Remove and return every key that depends on `dependency`.
    pub(crate) fn take_dependents(&mut self, dependency: &str) -> HashSet<String> {
        self.dependents.remove(dependency).unwrap_or_default()
    }

    pub(crate) fn dependents_of(&self, dependency: &str) -> HashSet<String> {
        self.dependents
            .get(dependency)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of dependency keys with at least one dependent.
    #[cfg(test)]
    pub(crate) fn dependency_count(&self) -> usize {
        self.dependents.len()
    }
}
