//! Keyed ledger registries
//!
//! Collaborators only ever see `&Registry`; the mutators are crate-private
//! and are called exclusively by the commit engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a conditional removal did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoveError {
    /// ID not present
    Missing,
    /// ID present with a different value
    Mismatch,
}

/// ID-keyed store of ledger entities
///
/// Ordered so that iteration, and therefore anything derived from it, is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry<K: Ord, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy, V: PartialEq> Registry<K, V> {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `id`
    pub fn get(&self, id: &K) -> Option<&V> {
        self.entries.get(id)
    }

    /// Existence check
    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ID order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Insert unless `id` is taken. Returns whether the insert happened.
    pub(crate) fn insert_if_absent(&mut self, id: K, value: V) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Remove `id` if it holds exactly `expected`
    pub(crate) fn remove_matching(&mut self, id: &K, expected: &V) -> Result<V, RemoveError> {
        match self.entries.get(id) {
            None => Err(RemoveError::Missing),
            Some(stored) if stored != expected => Err(RemoveError::Mismatch),
            Some(_) => self.entries.remove(id).ok_or(RemoveError::Missing),
        }
    }
}
