#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-kvs-memory** – in-memory [`KvsClient`] driver.
//!
//! Backs the dagflow engine's test suite and single-box smoke runs. Not a
//! production Anna/sled deployment target: no persistence, no replication,
//! no server process — it is the reference double the engine is validated
//! against (out of scope per the executor's spec, §1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dagflow_kvs_core::{KvsClient, KvsError};
use dagflow_types::{CausalTuple, ClientId, Consistency, KvsError as WireKvsError, Lattice};
use dashmap::DashMap;

/// An in-memory, non-persistent KVS.
///
/// Normal-mode `put`s merge into any existing lattice at the key via
/// [`Lattice::merge`], matching a real lattice-merge KVS. Causal reads and
/// writes operate on whatever lattice is stored, expecting it to be a
/// [`Lattice::Wren`] so `ts`/`promise` can be reported to callers — the
/// resolver treats any other stored variant under `causal_get` as a type
/// error (spec: "any other lattice type is a fatal type error").
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvs {
    entries: Arc<DashMap<String, Lattice>>,
}

impl InMemoryKvs {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key with a lattice directly, bypassing `put`/`causal_put`.
    /// Used by tests to set up fixture state (e.g. a pre-existing causal
    /// snapshot bound).
    pub fn seed(&self, key: impl Into<String>, value: Lattice) {
        self.entries.insert(key.into(), value);
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvsClient for InMemoryKvs {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Option<Lattice>>, KvsError> {
        Ok(keys
            .iter()
            .map(|k| (k.clone(), self.entries.get(k).map(|e| e.clone())))
            .collect())
    }

    async fn put(&self, keys: &[String], values: &[Lattice]) -> Result<HashMap<String, bool>, KvsError> {
        let mut results = HashMap::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values.iter()) {
            self.entries
                .entry(key.clone())
                .and_modify(|existing| *existing = existing.merge(value))
                .or_insert_with(|| value.clone());
            results.insert(key.clone(), true);
        }
        Ok(results)
    }

    async fn causal_get(
        &self,
        keys: &[String],
        _t_low: u64,
        _t_high: u64,
        _consistency: Consistency,
        _client_id: ClientId,
    ) -> Result<HashMap<String, Option<CausalTuple>>, KvsError> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            let tuple = self.entries.get(key).map(|entry| match &*entry {
                Lattice::Wren { ts, promise, value } => CausalTuple {
                    key: key.clone(),
                    payload: value.clone(),
                    lattice_type: entry.type_tag(),
                    ts: *ts,
                    promise: *promise,
                    error: WireKvsError::NoError,
                },
                other => CausalTuple {
                    key: key.clone(),
                    payload: other.reveal(),
                    lattice_type: other.type_tag(),
                    ts: 0,
                    promise: 0,
                    error: WireKvsError::NoError,
                },
            });
            out.insert(key.clone(), tuple);
        }
        Ok(out)
    }

    async fn causal_put(&self, key: &str, value: Lattice, _client_id: ClientId) -> Result<bool, KvsError> {
        self.entries
            .entry(key.to_string())
            .and_modify(|existing| *existing = existing.merge(&value))
            .or_insert(value);
        Ok(true)
    }
}

/// Test decorator simulating "producer hasn't written yet": the first
/// `misses_before_success` reads of any given key return `None` (or the
/// `KEY_DNE` equivalent), after which the inner client's real value is
/// returned.
#[derive(Clone)]
pub struct FlakyKvs<K> {
    inner: K,
    misses_before_success: usize,
    attempts: Arc<DashMap<String, AtomicUsize>>,
}

impl<K: KvsClient> FlakyKvs<K> {
    /// Wrap `inner`, making every key miss `misses_before_success` times
    /// before resolving.
    pub fn new(inner: K, misses_before_success: usize) -> Self {
        Self { inner, misses_before_success, attempts: Arc::new(DashMap::new()) }
    }

    /// Total number of `get`/`causal_get` attempts observed for `key`,
    /// including the final successful one. Used to assert exact retry
    /// counts in tests.
    pub fn attempts_for(&self, key: &str) -> usize {
        self.attempts.get(key).map(|c| c.load(Ordering::SeqCst)).unwrap_or(0)
    }

    fn record_attempt(&self, key: &str) -> usize {
        let counter = self.attempts.entry(key.to_string()).or_insert_with(|| AtomicUsize::new(0));
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl<K: KvsClient + Sync> KvsClient for FlakyKvs<K> {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Option<Lattice>>, KvsError> {
        let mut real = self.inner.get(keys).await?;
        for key in keys {
            let attempt = self.record_attempt(key);
            if attempt <= self.misses_before_success {
                real.insert(key.clone(), None);
            }
        }
        Ok(real)
    }

    async fn put(&self, keys: &[String], values: &[Lattice]) -> Result<HashMap<String, bool>, KvsError> {
        self.inner.put(keys, values).await
    }

    async fn causal_get(
        &self,
        keys: &[String],
        t_low: u64,
        t_high: u64,
        consistency: Consistency,
        client_id: ClientId,
    ) -> Result<HashMap<String, Option<CausalTuple>>, KvsError> {
        let mut real = self.inner.causal_get(keys, t_low, t_high, consistency, client_id).await?;
        for key in keys {
            let attempt = self.record_attempt(key);
            if attempt <= self.misses_before_success {
                real.insert(key.clone(), None);
            }
        }
        Ok(real)
    }

    async fn causal_put(&self, key: &str, value: Lattice, client_id: ClientId) -> Result<bool, KvsError> {
        self.inner.causal_put(key, value, client_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let kvs = InMemoryKvs::new();
        let keys = vec!["a".to_string()];
        let values = vec![Lattice::Lww { ts: 1, value: b"hello".to_vec() }];
        kvs.put(&keys, &values).await.unwrap();

        let got = kvs.get(&keys).await.unwrap();
        assert_eq!(got["a"], Some(values[0].clone()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let kvs = InMemoryKvs::new();
        let got = kvs.get(&["missing".to_string()]).await.unwrap();
        assert_eq!(got["missing"], None);
    }

    #[tokio::test]
    async fn put_merges_lww_by_timestamp() {
        let kvs = InMemoryKvs::new();
        let key = vec!["k".to_string()];
        kvs.put(&key, &[Lattice::Lww { ts: 1, value: b"old".to_vec() }]).await.unwrap();
        kvs.put(&key, &[Lattice::Lww { ts: 2, value: b"new".to_vec() }]).await.unwrap();

        let got = kvs.get(&key).await.unwrap();
        assert_eq!(got["k"], Some(Lattice::Lww { ts: 2, value: b"new".to_vec() }));
    }

    #[tokio::test]
    async fn causal_get_reports_ts_and_promise_from_wren() {
        let kvs = InMemoryKvs::new();
        kvs.seed("k1", Lattice::Wren { ts: 10, promise: 100, value: b"v".to_vec() });

        let got = kvs.causal_get(&["k1".to_string()], 0, u64::MAX, Consistency::Multi, 0).await.unwrap();
        let tuple = got["k1"].as_ref().unwrap();
        assert_eq!(tuple.ts, 10);
        assert_eq!(tuple.promise, 100);
        assert_eq!(tuple.payload, b"v".to_vec());
    }

    #[tokio::test]
    async fn flaky_kvs_misses_then_resolves() {
        let inner = InMemoryKvs::new();
        inner.seed("kx", Lattice::Lww { ts: 1, value: b"9".to_vec() });
        let flaky = FlakyKvs::new(inner, 3);

        let keys = vec!["kx".to_string()];
        for _ in 0..3 {
            let got = flaky.get(&keys).await.unwrap();
            assert_eq!(got["kx"], None);
        }
        let got = flaky.get(&keys).await.unwrap();
        assert_eq!(got["kx"], Some(Lattice::Lww { ts: 1, value: b"9".to_vec() }));
        assert_eq!(flaky.attempts_for("kx"), 4);
    }
}
