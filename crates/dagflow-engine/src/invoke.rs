//! Single-function invocation: reference extraction, resolution, argument
//! substitution, and crash-contained invocation of a [`UserFunction`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use dagflow_resolver::{ReferenceResolver, UserFunction, UserLibrary, ValueCache};
use dagflow_serde::Value;
use dagflow_types::{ClientId, Consistency, Reference};

use crate::EngineError;

fn run_user_function(
    func: &UserFunction,
    library: &UserLibrary,
    args: &[Value],
) -> Result<Value, EngineError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| func(library, args))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(EngineError::ExecutionError(err.to_string())),
        Err(panic) => Err(EngineError::ExecutionError(panic_message(&panic))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    eprintln!("DEBUG type_id={:?}", payload.type_id());
    eprintln!("DEBUG is_str={}", payload.is::<&str>());
    eprintln!("DEBUG is_string={}", payload.is::<String>());
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "user function panicked".to_string()
    }
}

/// Execute a normal-mode function invocation: tuple-flatten the incoming
/// argument list, recognize a transposed batching request, resolve every
/// embedded reference, substitute resolved values back in, and invoke.
pub async fn exec_func_normal(
    resolver: &dyn ReferenceResolver,
    cache: &ValueCache,
    library: &UserLibrary,
    func: &UserFunction,
    args: Vec<Value>,
) -> Result<Value, EngineError> {
    let args: Vec<Value> = args.into_iter().flat_map(Value::flatten_tuple).collect();
    let is_batch = !args.is_empty() && args.iter().all(Value::is_list);

    let refs: Vec<Reference> = if is_batch {
        args.iter()
            .filter_map(|a| match a {
                Value::List(items) => Some(items),
                _ => None,
            })
            .flatten()
            .filter_map(Value::as_reference)
            .cloned()
            .collect()
    } else {
        args.iter().filter_map(Value::as_reference).cloned().collect()
    };

    let resolved: HashMap<String, Value> =
        if refs.is_empty() { HashMap::new() } else { resolver.resolve_normal(&refs, cache).await? };

    let substituted: Vec<Value> = args
        .into_iter()
        .map(|arg| substitute(arg, &resolved))
        .collect();

    run_user_function(func, library, &substituted)
}

fn substitute(arg: Value, resolved: &HashMap<String, Value>) -> Value {
    match arg {
        Value::Reference(r) => resolved.get(&r.key).cloned().unwrap_or(Value::Reference(r)),
        Value::List(items) => Value::List(items.into_iter().map(|v| substitute(v, resolved)).collect()),
        other => other,
    }
}

/// Execute a causal-mode function invocation. Unlike the normal-mode path,
/// causal invocations never batch: arguments are substituted positionally
/// with no tuple-flattening or transpose step.
pub async fn exec_func_causal(
    resolver: &dyn ReferenceResolver,
    library: &UserLibrary,
    func: &UserFunction,
    args: Vec<Value>,
    t_low: u64,
    t_high: u64,
    client_id: ClientId,
    consistency: Consistency,
) -> Result<(Value, u64, u64), EngineError> {
    let refs: Vec<Reference> = args.iter().filter_map(Value::as_reference).cloned().collect();

    let (resolved, new_low, new_high) = if refs.is_empty() {
        (HashMap::new(), t_low, t_high)
    } else {
        resolver.resolve_causal(&refs, t_low, t_high, client_id, consistency).await?
    };

    let substituted: Vec<Value> = args.into_iter().map(|arg| substitute(arg, &resolved)).collect();
    let result = run_user_function(func, library, &substituted)?;
    Ok((result, new_low, new_high))
}
