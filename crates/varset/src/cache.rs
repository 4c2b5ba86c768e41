//! Keyed store for restoring variable state across constructions.

use crate::types::CachedVariableState;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cloneable handle to a keyed snapshot store.
///
/// Passed explicitly wherever restoration is wanted, so tests get isolated
/// instances instead of sharing process globals. Clones address the same
/// underlying store.
#[derive(Debug, Clone, Default)]
pub struct VariableStateCache {
    entries: Arc<DashMap<String, CachedVariableState>>,
}

impl VariableStateCache {
    /// Fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the snapshot stored under `cache_key`.
    #[must_use]
    pub fn get(&self, cache_key: &str) -> Option<CachedVariableState> {
        self.entries.get(cache_key).map(|entry| entry.value().clone())
    }

    /// Store `snapshot` under `cache_key`, replacing any previous entry.
    pub fn set(&self, cache_key: impl Into<String>, snapshot: CachedVariableState) {
        self.entries.insert(cache_key.into(), snapshot);
    }

    /// Drop the entry under `cache_key`, returning it if present.
    pub fn remove(&self, cache_key: &str) -> Option<CachedVariableState> {
        self.entries.remove(cache_key).map(|(_, snapshot)| snapshot)
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize every entry, keyed by cache key, for host-side persistence.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures from `serde_json`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let entries: BTreeMap<String, CachedVariableState> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        serde_json::to_string(&entries)
    }

    /// Load entries produced by [`VariableStateCache::to_json`], replacing
    /// duplicates. Returns the number of entries loaded.
    ///
    /// # Errors
    ///
    /// Propagates deserialization failures from `serde_json`.
    pub fn load_json(&self, json: &str) -> Result<usize, serde_json::Error> {
        let entries: BTreeMap<String, CachedVariableState> = serde_json::from_str(json)?;
        let count = entries.len();
        for (cache_key, snapshot) in entries {
            self.entries.insert(cache_key, snapshot);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VariableOption, VariableValue};

    fn snapshot(name: &str, value: &str) -> CachedVariableState {
        CachedVariableState {
            name: name.to_string(),
            query: format!("{name}.*"),
            value: VariableValue::Single(value.to_string()),
            text: VariableValue::Single(value.to_string()),
            options: vec![VariableOption::plain(value)],
        }
    }

    #[test]
    fn set_get_remove_roundtrip() {
        let cache = VariableStateCache::new();
        assert!(cache.is_empty());

        cache.set("a-key", snapshot("A", "AA"));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("a-key").map(|s| s.value),
            Some(VariableValue::Single("AA".to_string()))
        );

        assert!(cache.remove("a-key").is_some());
        assert!(cache.get("a-key").is_none());
    }

    #[test]
    fn clones_share_the_store() {
        let cache = VariableStateCache::new();
        let alias = cache.clone();
        alias.set("shared", snapshot("A", "AA"));
        assert!(cache.get("shared").is_some());
    }

    #[test]
    fn isolated_instances_do_not_share() {
        let first = VariableStateCache::new();
        let second = VariableStateCache::new();
        first.set("key", snapshot("A", "AA"));
        assert!(second.get("key").is_none());
    }

    #[test]
    fn json_roundtrip_restores_entries() {
        let source = VariableStateCache::new();
        source.set("a-key", snapshot("A", "AA"));
        source.set("b-key", snapshot("B", "BB"));
        let json = source.to_json().expect("serializes");

        let target = VariableStateCache::new();
        assert_eq!(target.load_json(&json).expect("deserializes"), 2);
        assert_eq!(target.len(), 2);
        assert_eq!(target.get("b-key"), source.get("b-key"));
    }
}
