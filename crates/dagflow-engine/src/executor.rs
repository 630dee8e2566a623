//! The `Executor`: owns the per-loop caches and the handles to the KVS,
//! resolver, and trigger transport, and drives a single DAG hop at a time.

use std::sync::Arc;

use dagflow_bus::TriggerSink;
use dagflow_kvs_core::KvsClient;
use dagflow_resolver::{FunctionCache, FunctionLoader, ReferenceResolver, UserLibrary, ValueCache};
use dagflow_serde::Value;
use dagflow_types::{
    Consistency, Continuation, DagTrigger, FunctionCall, FunctionKind, Schedule, UNBOUNDED_T_HIGH,
};
use tracing::instrument;

use crate::invoke::{exec_func_causal, exec_func_normal};
use crate::{EngineError, StepOutcome};

const ERROR_TAG: &str = "ERROR";

/// Drives function invocation, reference resolution, and sink/trigger
/// dispatch for one executor's share of the DAG workload.
///
/// `value_cache` is owned rather than shared: it is written only by this
/// struct's own methods, which the embedding process must never call
/// concurrently with itself (the "single-writer loop" the resolver's value
/// cache is grounded on). `function_cache` and `kvs` are safe to share
/// across concurrently-running `Executor`s because they're internally
/// synchronized.
pub struct Executor {
    kvs: Arc<dyn KvsClient>,
    resolver: Arc<dyn ReferenceResolver>,
    function_cache: Arc<FunctionCache>,
    function_loader: Arc<dyn FunctionLoader>,
    value_cache: ValueCache,
    triggers: Arc<dyn TriggerSink>,
    scheduler_continuation_addr: String,
    user_library: UserLibrary,
}

impl Executor {
    /// Build an executor over the given shared resources.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kvs: Arc<dyn KvsClient>,
        resolver: Arc<dyn ReferenceResolver>,
        function_cache: Arc<FunctionCache>,
        function_loader: Arc<dyn FunctionLoader>,
        triggers: Arc<dyn TriggerSink>,
        scheduler_continuation_addr: impl Into<String>,
    ) -> Self {
        let user_library = UserLibrary::new(kvs.clone());
        Self {
            kvs,
            resolver,
            function_cache,
            function_loader,
            value_cache: ValueCache::new(),
            triggers,
            scheduler_continuation_addr: scheduler_continuation_addr.into(),
            user_library,
        }
    }

    fn decode_args(raw: &[Vec<u8>]) -> Result<Vec<Value>, EngineError> {
        raw.iter().map(|bytes| Ok(dagflow_serde::load(bytes)?)).collect()
    }

    /// Step every pending invocation of one normal-mode function, batching
    /// them into a single call when more than one schedule is supplied.
    ///
    /// `batch` pairs each schedule with the trigger set that unblocked it.
    /// All schedules must target the same function of the same DAG shape;
    /// the caller (the trigger-set accumulator above this engine) only ever
    /// groups schedules that satisfy this.
    #[instrument(skip_all, fields(count = batch.len()))]
    pub async fn step_normal(&mut self, batch: Vec<(Schedule, Vec<DagTrigger>)>) -> Result<StepOutcome, EngineError> {
        let fname = batch[0].0.target_function.clone();
        let is_batch = batch.len() > 1;

        let mut farg_sets = Vec::with_capacity(batch.len());
        for (schedule, triggers) in &batch {
            let mut raw: Vec<Vec<u8>> = schedule.arguments.get(&fname).map(|a| a.0.clone()).unwrap_or_default();
            for trigger in triggers {
                raw.extend(trigger.arguments.iter().cloned());
            }
            farg_sets.push(Self::decode_args(&raw)?);
        }

        let fargs: Vec<Value> = if is_batch {
            let arity = farg_sets[0].len();
            (0..arity)
                .map(|idx| Value::List(farg_sets.iter().map(|set| set[idx].clone()).collect()))
                .collect()
        } else {
            std::mem::take(&mut farg_sets[0])
        };

        let func = self
            .function_cache
            .get_or_load(&fname, self.kvs.as_ref(), Consistency::Normal, batch[0].0.client_id, self.function_loader.as_ref())
            .await?;

        let invoked = exec_func_normal(self.resolver.as_ref(), &self.value_cache, &self.user_library, func.as_ref(), fargs).await?;

        let result_list: Vec<Value> = if is_batch {
            match invoked {
                Value::List(items) => items,
                other => vec![other],
            }
        } else {
            vec![invoked]
        };

        let dag = batch[0].0.dag.clone();
        let this_node = dag.function(&fname).expect("schedule targets a node present in its own dag");
        let is_sink = dag.outgoing(&fname).next().is_none();

        let mut successes = Vec::with_capacity(batch.len());
        let mut sink_writes: Vec<(String, dagflow_types::Lattice)> = Vec::new();

        for ((schedule, _), result) in batch.into_iter().zip(result_list) {
            if this_node.kind == FunctionKind::MultiExec {
                let dumped = dagflow_serde::dump(&result)?;
                if this_node.invalid_results.iter().any(|invalid| invalid == &dumped) {
                    successes.push(false);
                    continue;
                }
            }
            successes.push(true);

            if !is_sink {
                let args: Vec<Vec<u8>> =
                    result.flatten_tuple().into_iter().map(|v| dagflow_serde::dump(&v)).collect::<Result<_, _>>()?;
                for conn in dag.outgoing(&fname) {
                    let trigger = DagTrigger {
                        id: schedule.id,
                        source: fname.clone(),
                        target_function: conn.sink.clone(),
                        arguments: args.clone(),
                        t_low: 0,
                        t_high: 0,
                    };
                    let dest = schedule.locations.get(&conn.sink).expect("schedule places every successor");
                    self.triggers.send_trigger(dest, trigger).await?;
                }
                continue;
            }

            if let Some(continuation) = &schedule.continuation {
                let filled = Continuation {
                    name: continuation.name.clone(),
                    id: Some(schedule.id),
                    result: Some(dagflow_serde::dump(&result)?),
                };
                self.triggers.send_continuation(&self.scheduler_continuation_addr, filled).await?;
            } else if let Some(addr) = &schedule.response_address {
                self.triggers.send_response(addr, dagflow_serde::dump(&result)?).await?;
            } else {
                let ts = chrono::Utc::now().timestamp_millis().max(0) as u64;
                sink_writes.push((schedule.effective_output_key(), dagflow_serde::dump_lattice_lww(&result, ts)?));
            }
        }

        if !sink_writes.is_empty() {
            let keys: Vec<String> = sink_writes.iter().map(|(k, _)| k.clone()).collect();
            let lattices: Vec<dagflow_types::Lattice> = sink_writes.into_iter().map(|(_, v)| v).collect();
            self.kvs.put(&keys, &lattices).await?;
        }

        Ok(StepOutcome { is_sink, successes })
    }

    /// Step one pending invocation of a causal-mode function. Causal mode
    /// never batches multiple schedules into one call.
    #[instrument(skip_all, fields(schedule = %schedule.id))]
    pub async fn step_causal(&mut self, schedule: Schedule, triggers: Vec<DagTrigger>) -> Result<StepOutcome, EngineError> {
        let fname = schedule.target_function.clone();

        let mut raw: Vec<Vec<u8>> = schedule.arguments.get(&fname).map(|a| a.0.clone()).unwrap_or_default();
        for trigger in &triggers {
            raw.extend(trigger.arguments.iter().cloned());
        }
        let fargs = Self::decode_args(&raw)?;

        let (t_low, incoming_t_high) = triggers.first().map(|t| (t.t_low, t.t_high)).unwrap_or((0, 0));
        let t_high = if incoming_t_high == 0 { UNBOUNDED_T_HIGH } else { incoming_t_high };

        let func = self
            .function_cache
            .get_or_load(&fname, self.kvs.as_ref(), Consistency::Multi, schedule.client_id, self.function_loader.as_ref())
            .await?;

        let (result, new_low, new_high) = exec_func_causal(
            self.resolver.as_ref(),
            &self.user_library,
            func.as_ref(),
            fargs,
            t_low,
            t_high,
            schedule.client_id,
            Consistency::Multi,
        )
        .await?;

        let this_node = schedule.dag.function(&fname).expect("schedule targets a node present in its own dag");
        if this_node.kind == FunctionKind::MultiExec {
            let dumped = dagflow_serde::dump(&result)?;
            if this_node.invalid_results.iter().any(|invalid| invalid == &dumped) {
                return Ok(StepOutcome { is_sink: false, successes: vec![false] });
            }
        }

        let args: Vec<Vec<u8>> =
            result.clone().flatten_tuple().into_iter().map(|v| dagflow_serde::dump(&v)).collect::<Result<_, _>>()?;

        // Pinning: the first real step of a causal DAG observes an unbounded
        // incoming t_high; from then on the interval collapses to a single
        // point and every later hop simply forwards it unchanged.
        let (out_low, out_high) = if t_high == UNBOUNDED_T_HIGH { (new_high, new_high) } else { (t_low, t_high) };

        let mut is_sink = true;
        for conn in schedule.dag.outgoing(&fname) {
            is_sink = false;
            let trigger = DagTrigger {
                id: schedule.id,
                source: fname.clone(),
                target_function: conn.sink.clone(),
                arguments: args.clone(),
                t_low: out_low,
                t_high: out_high,
            };
            let dest = schedule.locations.get(&conn.sink).expect("schedule places every successor");
            self.triggers.send_trigger(dest, trigger).await?;
        }

        if is_sink {
            let lattice = dagflow_serde::dump_lattice_wren(&result, out_low, out_high)?;
            while !self.kvs.causal_put(&schedule.effective_output_key(), lattice.clone(), schedule.client_id).await? {}

            if let Some(addr) = &schedule.response_address {
                self.triggers.send_response(addr, dagflow_serde::dump(&result)?).await?;
            }
        }

        Ok(StepOutcome { is_sink, successes: vec![true] })
    }

    /// Execute a one-shot [`FunctionCall`], writing either the result or a
    /// serialized [`dagflow_types::BoundaryError`] to `call.response_key`.
    /// Never returns an error for a failed *user* function: failures are
    /// reported through the KVS response, matching `FunctionCall`'s role as
    /// an external request/response boundary rather than a DAG hop. Only a
    /// KVS or transport fault propagates as `Err`.
    #[instrument(skip_all, fields(function = %call.name))]
    pub async fn exec_single_call(&mut self, call: &FunctionCall) -> Result<(), EngineError> {
        let fargs = Self::decode_args(&call.arguments)?;

        let func = match self
            .function_cache
            .get_or_load(&call.name, self.kvs.as_ref(), call.consistency, 0, self.function_loader.as_ref())
            .await
        {
            Ok(f) => f,
            Err(dagflow_resolver::ResolveError::FuncNotFound(name)) => {
                return self.write_call_error(call, EngineError::FuncNotFound(name).as_boundary_error()).await;
            }
            Err(other) => return Err(other.into()),
        };

        match call.consistency {
            Consistency::Normal => {
                match exec_func_normal(self.resolver.as_ref(), &self.value_cache, &self.user_library, func.as_ref(), fargs).await {
                    Ok(result) => {
                        let ts = chrono::Utc::now().timestamp_millis().max(0) as u64;
                        let lattice = dagflow_serde::dump_lattice_lww(&result, ts)?;
                        self.kvs.put(&[call.response_key.clone()], &[lattice]).await?;
                        Ok(())
                    }
                    Err(err) => self.write_call_error(call, err.as_boundary_error()).await,
                }
            }
            Consistency::Multi => {
                match exec_func_causal(
                    self.resolver.as_ref(),
                    &self.user_library,
                    func.as_ref(),
                    fargs,
                    0,
                    UNBOUNDED_T_HIGH,
                    0, // a bare FunctionCall carries no client id; scope as client 0, matching
                       // the original's schedule=None default in its causal resolve path
                    Consistency::Multi,
                )
                .await
                {
                    Ok((result, ts, promise)) => {
                        let lattice = dagflow_serde::dump_lattice_wren(&result, ts, promise)?;
                        while !self.kvs.causal_put(&call.response_key, lattice.clone(), 0).await? {}
                        Ok(())
                    }
                    Err(err) => self.write_call_error(call, err.as_boundary_error()).await,
                }
            }
        }
    }

    async fn write_call_error(&self, call: &FunctionCall, boundary_error: dagflow_types::BoundaryError) -> Result<(), EngineError> {
        let error_value = Value::Tuple(vec![Value::Str(ERROR_TAG.to_string()), Value::Str(boundary_error.to_string())]);
        match call.consistency {
            Consistency::Normal => {
                let lattice = dagflow_serde::dump_lattice_lww(&error_value, 0)?;
                self.kvs.put(&[call.response_key.clone()], &[lattice]).await?;
            }
            Consistency::Multi => {
                let lattice = dagflow_serde::dump_lattice_wren(&error_value, 0, 0)?;
                while !self.kvs.causal_put(&call.response_key, lattice.clone(), 0).await? {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagflow_bus::InMemoryMesh;
    use dagflow_kvs_memory::InMemoryKvs;
    use dagflow_resolver::{KvsReferenceResolver, ResolveError, UserFunction};
    use dagflow_types::{ArgList, Connection, Dag, FunctionNode, Lattice};
    use std::collections::{BTreeMap, HashMap};

    struct RegistryLoader {
        functions: HashMap<String, Arc<UserFunction>>,
    }

    impl FunctionLoader for RegistryLoader {
        fn load(&self, bytes: &[u8]) -> Result<Arc<UserFunction>, ResolveError> {
            let name = String::from_utf8_lossy(bytes).to_string();
            self.functions.get(&name).cloned().ok_or(ResolveError::FuncNotFound(name))
        }
    }

    fn increment() -> Arc<UserFunction> {
        Arc::new(|_lib: &UserLibrary, args: &[Value]| match &args[0] {
            Value::Int(n) => Ok(Value::Int(n + 1)),
            other => Ok(other.clone()),
        })
    }

    fn build_executor(kvs: InMemoryKvs, functions: HashMap<String, Arc<UserFunction>>, mesh: InMemoryMesh) -> Executor {
        let kvs: Arc<dyn KvsClient> = Arc::new(kvs);
        let resolver: Arc<dyn ReferenceResolver> = Arc::new(KvsReferenceResolver::new(kvs.clone()));
        Executor::new(
            kvs,
            resolver,
            Arc::new(FunctionCache::new()),
            Arc::new(RegistryLoader { functions }),
            Arc::new(mesh),
            "scheduler-continuation",
        )
    }

    fn single_node_schedule(id: uuid::Uuid, arg: Value) -> Schedule {
        let mut arguments = BTreeMap::new();
        arguments.insert("a".to_string(), ArgList(vec![dagflow_serde::dump(&arg).unwrap()]));
        Schedule {
            id,
            dag: Dag { name: "single".into(), functions: vec![FunctionNode::normal("a")], connections: vec![] },
            target_function: "a".into(),
            arguments,
            locations: BTreeMap::new(),
            output_key: None,
            response_address: None,
            continuation: None,
            client_id: 0,
            consistency: Consistency::Normal,
            start_time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn single_node_sink_writes_result_to_kvs() {
        let kvs = InMemoryKvs::new();
        kvs.seed("a", Lattice::Lww { ts: 1, value: b"a".to_vec() });
        let functions: HashMap<String, Arc<UserFunction>> = HashMap::from([("a".to_string(), increment())]);
        let shared_kvs: Arc<dyn KvsClient> = Arc::new(kvs.clone());
        let mut executor = build_executor(kvs.clone(), functions, InMemoryMesh::new());

        let id = uuid::Uuid::new_v4();
        let schedule = single_node_schedule(id, Value::Int(5));
        let outcome = executor.step_normal(vec![(schedule, vec![])]).await.unwrap();

        assert!(outcome.is_sink);
        assert_eq!(outcome.successes, vec![true]);

        let got = shared_kvs.get(&[id.to_string()]).await.unwrap();
        let lattice = got[&id.to_string()].clone().unwrap();
        assert_eq!(dagflow_serde::load_lattice(&lattice).unwrap(), Value::Int(6));
    }

    #[tokio::test]
    async fn two_node_dag_forwards_trigger_through_mesh() {
        let kvs = InMemoryKvs::new();
        kvs.seed("a", Lattice::Lww { ts: 1, value: b"a".to_vec() });
        kvs.seed("b", Lattice::Lww { ts: 1, value: b"b".to_vec() });
        let functions: HashMap<String, Arc<UserFunction>> =
            HashMap::from([("a".to_string(), increment()), ("b".to_string(), increment())]);
        let mesh = InMemoryMesh::new();
        let mut rx = mesh.register("node-b");
        let mut executor = build_executor(kvs, functions, mesh);

        let id = uuid::Uuid::new_v4();
        let mut schedule = single_node_schedule(id, Value::Int(1));
        schedule.dag = Dag {
            name: "chain".into(),
            functions: vec![FunctionNode::normal("a"), FunctionNode::normal("b")],
            connections: vec![Connection { source: "a".into(), sink: "b".into() }],
        };
        schedule.locations.insert("b".into(), "node-b".into());

        let outcome = executor.step_normal(vec![(schedule, vec![])]).await.unwrap();
        assert!(!outcome.is_sink);
        assert_eq!(outcome.successes, vec![true]);

        match rx.try_recv().unwrap() {
            dagflow_bus::Envelope::Trigger(trigger) => {
                assert_eq!(trigger.source, "a");
                assert_eq!(trigger.target_function, "b");
                let value: Value = dagflow_serde::load(&trigger.arguments[0]).unwrap();
                assert_eq!(value, Value::Int(2));
            }
            _ => panic!("expected a trigger envelope"),
        }
    }

    #[tokio::test]
    async fn multiexec_abort_suppresses_downstream_trigger() {
        let kvs = InMemoryKvs::new();
        kvs.seed("guard", Lattice::Lww { ts: 1, value: b"guard".to_vec() });
        let functions: HashMap<String, Arc<UserFunction>> = HashMap::from([(
            "guard".to_string(),
            Arc::new(|_lib: &UserLibrary, _args: &[Value]| Ok(Value::Bool(false))) as Arc<UserFunction>,
        )]);
        let mesh = InMemoryMesh::new();
        let mut rx = mesh.register("node-next");
        let mut executor = build_executor(kvs, functions, mesh);

        let id = uuid::Uuid::new_v4();
        let mut arguments = BTreeMap::new();
        arguments.insert("guard".to_string(), ArgList(vec![dagflow_serde::dump(&Value::Null).unwrap()]));
        let invalid = dagflow_serde::dump(&Value::Bool(false)).unwrap();
        let schedule = Schedule {
            id,
            dag: Dag {
                name: "guarded".into(),
                functions: vec![
                    FunctionNode::multi_exec("guard", vec![invalid]),
                    FunctionNode::normal("next"),
                ],
                connections: vec![Connection { source: "guard".into(), sink: "next".into() }],
            },
            target_function: "guard".into(),
            arguments,
            locations: BTreeMap::from([("next".to_string(), "node-next".to_string())]),
            output_key: None,
            response_address: None,
            continuation: None,
            client_id: 0,
            consistency: Consistency::Normal,
            start_time: chrono::Utc::now(),
        };

        let outcome = executor.step_normal(vec![(schedule, vec![])]).await.unwrap();
        assert_eq!(outcome.successes, vec![false]);
        assert!(rx.try_recv().is_err(), "an aborted MULTIEXEC node must not forward a trigger");
    }

    #[tokio::test]
    async fn causal_sink_pins_snapshot_and_writes_wren() {
        let kvs = InMemoryKvs::new();
        kvs.seed("causal_fn", Lattice::Lww { ts: 1, value: b"causal_fn".to_vec() });
        let functions: HashMap<String, Arc<UserFunction>> =
            HashMap::from([("causal_fn".to_string(), increment())]);
        let shared_kvs: Arc<dyn KvsClient> = Arc::new(kvs.clone());
        let mut executor = build_executor(kvs, functions, InMemoryMesh::new());

        let id = uuid::Uuid::new_v4();
        let mut arguments = BTreeMap::new();
        arguments.insert("causal_fn".to_string(), ArgList(vec![dagflow_serde::dump(&Value::Int(10)).unwrap()]));
        let schedule = Schedule {
            id,
            dag: Dag { name: "causal".into(), functions: vec![FunctionNode::normal("causal_fn")], connections: vec![] },
            target_function: "causal_fn".into(),
            arguments,
            locations: BTreeMap::new(),
            output_key: None,
            response_address: None,
            continuation: None,
            client_id: 7,
            consistency: Consistency::Multi,
            start_time: chrono::Utc::now(),
        };

        // First hop: no incoming trigger, so t_high starts unbounded and the
        // sink write pins the snapshot to a single point.
        let outcome = executor.step_causal(schedule.clone(), vec![]).await.unwrap();
        assert!(outcome.is_sink);

        let got = shared_kvs.causal_get(&[id.to_string()], 0, u64::MAX, Consistency::Multi, 7).await.unwrap();
        let tuple = got[&id.to_string()].as_ref().unwrap();
        assert_eq!(tuple.ts, tuple.promise, "a sink write pins ts == promise");
        let value: Value = dagflow_serde::load(&tuple.payload).unwrap();
        assert_eq!(value, Value::Int(11));
    }
}
