use std::collections::{BTreeMap, HashMap};

use collector_api::DimensionCache;

/// Dimension cache answering from tables loaded at startup.
#[derive(Debug, Default, Clone)]
pub struct StaticCache {
    namespaces: HashMap<String, HashMap<String, String>>,
}

impl StaticCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[cache.<namespace>]` tables of the configuration.
    pub fn from_tables(tables: &BTreeMap<String, BTreeMap<String, String>>) -> Self {
        let namespaces = tables
            .iter()
            .map(|(ns, entries)| {
                let entries = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                (ns.clone(), entries)
            })
            .collect();
        Self { namespaces }
    }

    pub fn insert(&mut self, namespace: &str, key: impl Into<String>, value: impl Into<String>) {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Number of entries across all namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DimensionCache for StaticCache {
    fn resolve(&self, namespace: &str, key: &str) -> Option<String> {
        self.namespaces.get(namespace)?.get(key).cloned()
    }
}
