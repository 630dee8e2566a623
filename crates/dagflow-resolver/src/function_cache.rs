//! User-function cache and the capability handle passed to every invocation.

use std::sync::Arc;

use dagflow_kvs_core::KvsClient;
use dagflow_serde::Value;
use dagflow_types::{ClientId, Consistency};
use dashmap::DashMap;

use crate::ResolveError;

/// A registered user function: the same shape every invocation is called
/// through, whether resolved from a fresh KVS lookup or a cache hit.
///
/// Rust has no runtime `eval`, so unlike the dynamic `exec(code)` the
/// original system relies on, a [`FunctionLoader`] maps looked-up bytes to
/// one of a fixed set of natively compiled closures (a plugin registry)
/// rather than compiling code on the fly.
pub type UserFunction = dyn Fn(&UserLibrary, &[Value]) -> Result<Value, anyhow::Error> + Send + Sync;

/// Capability handle prepended as the first positional argument to every
/// user function invocation, standing in for the ambient `user_library`
/// module the original executor imports as a global.
pub struct UserLibrary {
    kvs: Arc<dyn KvsClient>,
}

impl UserLibrary {
    /// Build a library handle backed by `kvs`.
    pub fn new(kvs: Arc<dyn KvsClient>) -> Self {
        Self { kvs }
    }

    /// Emit a diagnostic message on behalf of a running user function.
    pub fn log(&self, msg: &str) {
        tracing::info!(target: "user_function", "{msg}");
    }

    /// Incidental KVS access available to a user function without going
    /// through the reference resolver.
    pub fn kvs(&self) -> &dyn KvsClient {
        self.kvs.as_ref()
    }
}

/// Resolves looked-up function bytes into a callable [`UserFunction`].
///
/// A capability supplied at executor construction, not a global singleton —
/// keeping the function-lookup policy decoupled from the cache itself.
pub trait FunctionLoader: Send + Sync {
    /// Decode `bytes` (as fetched from the KVS) into a callable function.
    fn load(&self, bytes: &[u8]) -> Result<Arc<UserFunction>, ResolveError>;
}

/// Concurrent cache of resolved user functions, keyed by name.
///
/// Unlike [`crate::ValueCache`], this is genuinely multi-writer: concurrent
/// first-lookups of the same function name may race, and the race is
/// resolved by `DashMap`'s idempotent `or_insert_with`, not by serializing
/// callers.
#[derive(Default)]
pub struct FunctionCache {
    entries: DashMap<String, Arc<UserFunction>>,
}

impl FunctionCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of functions currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Fetch `name`, loading it from `kvs` via `loader` on a cache miss.
    pub async fn get_or_load(
        &self,
        name: &str,
        kvs: &dyn KvsClient,
        consistency: Consistency,
        client_id: ClientId,
        loader: &dyn FunctionLoader,
    ) -> Result<Arc<UserFunction>, ResolveError> {
        if let Some(hit) = self.entries.get(name) {
            return Ok(hit.clone());
        }

        let bytes = match consistency {
            Consistency::Normal => {
                let got = kvs.get(&[name.to_string()]).await?;
                match got.get(name).and_then(|v| v.clone()) {
                    Some(lattice) => lattice.reveal(),
                    None => return Err(ResolveError::FuncNotFound(name.to_string())),
                }
            }
            Consistency::Multi => {
                let got = kvs.causal_get(&[name.to_string()], 0, u64::MAX, consistency, client_id).await?;
                match got.get(name).and_then(|v| v.clone()) {
                    Some(tuple) => tuple.payload,
                    None => return Err(ResolveError::FuncNotFound(name.to_string())),
                }
            }
        };

        let loaded = loader.load(&bytes)?;
        let entry = self.entries.entry(name.to_string()).or_insert_with(|| loaded);
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagflow_kvs_memory::InMemoryKvs;
    use dagflow_types::Lattice;

    struct EchoLoader;

    impl FunctionLoader for EchoLoader {
        fn load(&self, bytes: &[u8]) -> Result<Arc<UserFunction>, ResolveError> {
            let marker = String::from_utf8_lossy(bytes).to_string();
            Ok(Arc::new(move |_lib: &UserLibrary, args: &[Value]| {
                let _ = &marker;
                Ok(args.first().cloned().unwrap_or(Value::Null))
            }))
        }
    }

    #[tokio::test]
    async fn missing_function_reports_func_not_found() {
        let kvs = InMemoryKvs::new();
        let cache = FunctionCache::new();
        let err = match cache.get_or_load("missing", &kvs, Consistency::Normal, 0, &EchoLoader).await {
            Ok(_) => panic!("expected ResolveError::FuncNotFound"),
            Err(e) => e,
        };
        assert!(matches!(err, ResolveError::FuncNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn second_lookup_hits_cache_without_touching_kvs() {
        let kvs = InMemoryKvs::new();
        kvs.seed("double", Lattice::Lww { ts: 1, value: b"marker".to_vec() });
        let cache = FunctionCache::new();

        let first = cache.get_or_load("double", &kvs, Consistency::Normal, 0, &EchoLoader).await.unwrap();
        assert_eq!(cache.len(), 1);

        let library = UserLibrary::new(Arc::new(kvs));
        let result = first(&library, &[Value::Int(9)]).unwrap();
        assert_eq!(result, Value::Int(9));
    }
}
