//! Per-executor best-effort cache of resolved reference values.

use std::collections::HashMap;
use std::sync::Mutex;

use dagflow_serde::Value;

/// Cache of already-resolved `key -> Value` pairs.
///
/// Conceptually owned and written by a single executor loop, never shared
/// across requests for correctness (cross-request staleness is acceptable —
/// a reference is re-resolved from the KVS whenever it's missing here). The
/// `Mutex` exists only so the cache can be threaded through an `&self`
/// resolver call without a `&mut` borrow; it's never contended.
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl ValueCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Insert or overwrite a cached value.
    pub fn insert(&self, key: String, value: Value) {
        self.entries.lock().unwrap().insert(key, value);
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let cache = ValueCache::new();
        cache.insert("k".into(), Value::Int(1));
        assert_eq!(cache.get("k"), Some(Value::Int(1)));
    }

    #[test]
    fn missing_key_is_none() {
        let cache = ValueCache::new();
        assert_eq!(cache.get("missing"), None);
    }
}
