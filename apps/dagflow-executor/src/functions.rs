//! A small fixed registry of user functions, standing in for the dynamic
//! code the original executor `exec`s on the fly (see
//! `dagflow_resolver::function_cache`'s doc comment for why Rust can't do
//! the same).

use std::sync::Arc;

use dagflow_kvs_memory::InMemoryKvs;
use dagflow_resolver::{FunctionLoader, ResolveError, UserFunction, UserLibrary};
use dagflow_serde::Value;
use dagflow_types::Lattice;

/// Names this loader recognizes, also used to seed a fresh KVS so
/// `FunctionCache::get_or_load`'s normal-mode lookup has something to find.
pub const BUILTIN_NAMES: &[&str] = &["identity", "increment", "sum"];

/// Resolves a function name (as fetched from the KVS) to one of a fixed set
/// of built-in closures.
pub struct BuiltinLoader;

impl FunctionLoader for BuiltinLoader {
    fn load(&self, bytes: &[u8]) -> Result<Arc<UserFunction>, ResolveError> {
        let name = String::from_utf8_lossy(bytes).to_string();
        let func: Arc<UserFunction> = match name.as_str() {
            "identity" => Arc::new(|_lib: &UserLibrary, args: &[Value]| Ok(args.first().cloned().unwrap_or(Value::Null))),
            "increment" => Arc::new(|_lib: &UserLibrary, args: &[Value]| match args.first() {
                Some(Value::Int(n)) => Ok(Value::Int(n + 1)),
                Some(Value::List(items)) => Ok(Value::List(items.iter().map(increment_one).collect())),
                Some(other) => Ok(other.clone()),
                None => Ok(Value::Null),
            }),
            "sum" => Arc::new(|_lib: &UserLibrary, args: &[Value]| {
                let total: i64 = args
                    .iter()
                    .flat_map(|v| v.clone().flatten_tuple())
                    .filter_map(|v| match v {
                        Value::Int(n) => Some(n),
                        _ => None,
                    })
                    .sum();
                Ok(Value::Int(total))
            }),
            other => return Err(ResolveError::FuncNotFound(other.to_string())),
        };
        Ok(func)
    }
}

/// `increment`'s per-element rule, shared between the scalar and batched
/// (`Value::List`) call shapes so the two stay in lockstep.
fn increment_one(value: &Value) -> Value {
    match value {
        Value::Int(n) => Value::Int(n + 1),
        other => other.clone(),
    }
}

/// Seed `kvs` so every name in [`BUILTIN_NAMES`] resolves through the normal
/// function-lookup path (a function's KVS entry is its own name as bytes).
pub fn seed_builtins(kvs: &InMemoryKvs) {
    for name in BUILTIN_NAMES {
        kvs.seed(*name, Lattice::Lww { ts: 0, value: name.as_bytes().to_vec() });
    }
}
