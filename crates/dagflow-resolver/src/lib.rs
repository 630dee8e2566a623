#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-resolver** – turns [`Reference`]s embedded in function
//! arguments into concrete [`Value`]s, and caches the user functions those
//! arguments get passed to.
//!
//! Two independent caches live here: [`ValueCache`], a single-writer,
//! best-effort cache of resolved reference values, and [`FunctionCache`], a
//! concurrent cache of loaded user functions. Both exist to keep repeat
//! invocations of the same DAG from re-fetching from the KVS on every hop.

use std::collections::HashMap;

use async_trait::async_trait;
use dagflow_kvs_core::{KvsClient, KvsError};
use dagflow_types::{ClientId, Consistency, LatticeType, Reference};

/// User-function cache and the capability handle passed to invocations.
pub mod function_cache;
/// Single-writer reference value cache.
pub mod value_cache;

pub use function_cache::{FunctionCache, FunctionLoader, UserFunction, UserLibrary};
pub use value_cache::ValueCache;

use dagflow_serde::Value;

/// Errors raised while resolving references or loading a user function.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The underlying KVS request failed.
    #[error("KVS error while resolving a reference: {0}")]
    Kvs(#[from] KvsError),
    /// A resolved lattice payload failed to decode.
    #[error("failed to decode a resolved value: {0}")]
    Decode(#[from] dagflow_serde::SerdeError),
    /// A causal reference resolved to a lattice variant other than the
    /// pinned-snapshot envelope every causal read requires.
    #[error("causal reference resolved to a non-Wren lattice variant")]
    InvalidCausalLattice,
    /// Tightening `[t_low, t_high]` against a resolved reference's bounds
    /// collapsed the interval (`t_low > t_high`).
    #[error("causal snapshot interval collapsed")]
    SnapshotCollapse,
    /// A function name was absent from both the function cache and the
    /// KVS.
    #[error("function {0} not found")]
    FuncNotFound(String),
}

/// Resolves [`Reference`]s to concrete values under either consistency
/// regime.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Resolve `refs` under normal (last-writer-wins) semantics, consulting
    /// and populating `cache` along the way.
    async fn resolve_normal(
        &self,
        refs: &[Reference],
        cache: &ValueCache,
    ) -> Result<HashMap<String, Value>, ResolveError>;

    /// Resolve `refs` under causal semantics within `[t_low, t_high]`,
    /// returning the resolved values plus the tightened interval.
    async fn resolve_causal(
        &self,
        refs: &[Reference],
        t_low: u64,
        t_high: u64,
        client_id: ClientId,
        consistency: Consistency,
    ) -> Result<(HashMap<String, Value>, u64, u64), ResolveError>;
}

/// The only [`ReferenceResolver`] implementation: resolves directly against
/// a [`KvsClient`], retrying unboundedly on a miss (a producer racing ahead
/// of its consumer is expected, not exceptional).
pub struct KvsReferenceResolver {
    kvs: std::sync::Arc<dyn KvsClient>,
}

impl KvsReferenceResolver {
    /// Build a resolver backed by `kvs`.
    pub fn new(kvs: std::sync::Arc<dyn KvsClient>) -> Self {
        Self { kvs }
    }
}

#[async_trait]
impl ReferenceResolver for KvsReferenceResolver {
    async fn resolve_normal(
        &self,
        refs: &[Reference],
        cache: &ValueCache,
    ) -> Result<HashMap<String, Value>, ResolveError> {
        let mut resolved = HashMap::new();
        let mut pending: Vec<String> = Vec::new();
        for r in refs {
            if let Some(cached) = cache.get(&r.key) {
                resolved.insert(r.key.clone(), cached);
            } else if !pending.contains(&r.key) {
                pending.push(r.key.clone());
            }
        }

        if !pending.is_empty() {
            let mut fetched: HashMap<String, dagflow_types::Lattice> = HashMap::new();
            while !pending.is_empty() {
                let got = self.kvs.get(&pending).await?;
                let mut still_missing = Vec::new();
                for key in &pending {
                    match got.get(key).and_then(|v| v.clone()) {
                        Some(lattice) => {
                            fetched.insert(key.clone(), lattice);
                        }
                        None => still_missing.push(key.clone()),
                    }
                }
                pending = still_missing;
            }

            for r in refs {
                if let Some(lattice) = fetched.get(&r.key) {
                    let value = if r.deserialize {
                        dagflow_serde::load_lattice(lattice)?
                    } else {
                        dagflow_serde::reveal(lattice)?
                    };
                    cache.insert(r.key.clone(), value.clone());
                    resolved.insert(r.key.clone(), value);
                }
            }
        }

        Ok(resolved)
    }

    async fn resolve_causal(
        &self,
        refs: &[Reference],
        t_low: u64,
        t_high: u64,
        client_id: ClientId,
        consistency: Consistency,
    ) -> Result<(HashMap<String, Value>, u64, u64), ResolveError> {
        let mut resolved = HashMap::new();
        let mut keys: Vec<String> = Vec::new();
        for r in refs {
            if !keys.contains(&r.key) {
                keys.push(r.key.clone());
            }
        }
        if keys.is_empty() {
            return Ok((resolved, t_low, t_high));
        }

        let mut tuples: HashMap<String, dagflow_types::CausalTuple> = HashMap::new();
        let mut pending = keys;
        while !pending.is_empty() {
            let got = self.kvs.causal_get(&pending, t_low, t_high, consistency, client_id).await?;
            let mut still_missing = Vec::new();
            for key in &pending {
                match got.get(key).and_then(|v| v.clone()) {
                    Some(tuple) => {
                        tuples.insert(key.clone(), tuple);
                    }
                    None => still_missing.push(key.clone()),
                }
            }
            pending = still_missing;
        }

        let mut new_low = t_low;
        let mut new_high = t_high;
        for r in refs {
            let tuple = tuples.get(&r.key).expect("resolved by the retry loop above");
            if tuple.lattice_type != LatticeType::Wren {
                return Err(ResolveError::InvalidCausalLattice);
            }
            new_low = new_low.max(tuple.ts);
            new_high = new_high.min(tuple.promise);
            if new_low > new_high {
                return Err(ResolveError::SnapshotCollapse);
            }

            let value = if r.deserialize {
                dagflow_serde::load(&tuple.payload)?
            } else {
                Value::Bytes(tuple.payload.clone())
            };
            resolved.insert(r.key.clone(), value);
        }

        Ok((resolved, new_low, new_high))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagflow_kvs_memory::{FlakyKvs, InMemoryKvs};
    use dagflow_types::{CausalDep, Lattice, VectorClock};
    use std::sync::Arc;

    #[tokio::test]
    async fn normal_resolve_caches_and_dedupes() {
        let kvs = InMemoryKvs::new();
        let value = dagflow_serde::dump(&Value::Int(42)).unwrap();
        kvs.seed("k1", Lattice::Lww { ts: 1, value });
        let resolver = KvsReferenceResolver::new(Arc::new(kvs));
        let cache = ValueCache::new();

        let refs = vec![Reference::new("k1", true), Reference::new("k1", true)];
        let resolved = resolver.resolve_normal(&refs, &cache).await.unwrap();
        assert_eq!(resolved["k1"], Value::Int(42));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn normal_resolve_prefers_cache_over_kvs() {
        let kvs = InMemoryKvs::new();
        let resolver = KvsReferenceResolver::new(Arc::new(kvs));
        let cache = ValueCache::new();
        cache.insert("cached".into(), Value::Str("hit".into()));

        let refs = vec![Reference::new("cached", true)];
        let resolved = resolver.resolve_normal(&refs, &cache).await.unwrap();
        assert_eq!(resolved["cached"], Value::Str("hit".into()));
    }

    #[tokio::test]
    async fn normal_resolve_retries_through_flaky_kvs() {
        let inner = InMemoryKvs::new();
        let value = dagflow_serde::dump(&Value::Bool(true)).unwrap();
        inner.seed("flaky", Lattice::Lww { ts: 1, value });
        let flaky = FlakyKvs::new(inner, 2);
        let resolver = KvsReferenceResolver::new(Arc::new(flaky));
        let cache = ValueCache::new();

        let refs = vec![Reference::new("flaky", true)];
        let resolved = resolver.resolve_normal(&refs, &cache).await.unwrap();
        assert_eq!(resolved["flaky"], Value::Bool(true));
    }

    #[tokio::test]
    async fn causal_resolve_tightens_interval() {
        let kvs = InMemoryKvs::new();
        let value = dagflow_serde::dump(&Value::Int(7)).unwrap();
        kvs.seed("c1", Lattice::Wren { ts: 10, promise: 90, value });
        let resolver = KvsReferenceResolver::new(Arc::new(kvs));

        let refs = vec![Reference::new("c1", true)];
        let (resolved, low, high) = resolver
            .resolve_causal(&refs, 0, u64::MAX, 1, Consistency::Multi)
            .await
            .unwrap();
        assert_eq!(resolved["c1"], Value::Int(7));
        assert_eq!(low, 10);
        assert_eq!(high, 90);
    }

    #[tokio::test]
    async fn causal_resolve_rejects_non_wren_lattice() {
        let kvs = InMemoryKvs::new();
        kvs.seed(
            "bad",
            Lattice::MultiKeyCausal {
                vclock: VectorClock::new(),
                deps: vec![CausalDep { key: "x".into(), vclock: VectorClock::new() }],
                values: vec![b"v".to_vec()],
            },
        );
        let resolver = KvsReferenceResolver::new(Arc::new(kvs));

        let refs = vec![Reference::new("bad", true)];
        let err = resolver.resolve_causal(&refs, 0, u64::MAX, 1, Consistency::Multi).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidCausalLattice));
    }

    #[tokio::test]
    async fn causal_resolve_detects_snapshot_collapse() {
        let kvs = InMemoryKvs::new();
        let value = dagflow_serde::dump(&Value::Int(1)).unwrap();
        kvs.seed("late", Lattice::Wren { ts: 100, promise: 200, value });
        let resolver = KvsReferenceResolver::new(Arc::new(kvs));

        let refs = vec![Reference::new("late", true)];
        // An incoming high bound of 50 can never admit a write pinned at ts=100.
        let err = resolver.resolve_causal(&refs, 0, 50, 1, Consistency::Multi).await.unwrap_err();
        assert!(matches!(err, ResolveError::SnapshotCollapse));
    }
}
