#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-executor** – the process that hosts [`dagflow_engine::Executor`],
//! pulling triggers and one-shot function calls off an [`InMemoryMesh`] and
//! driving them through the DAG step engine.
//!
//! All of the logic lives here so it can be exercised directly in tests,
//! constructing [`ExecutorApp`] and calling its methods without going through
//! a spawned process.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dagflow_bus::{BusError, Envelope, InMemoryMesh, TriggerSink};
use dagflow_engine::{EngineError, Executor};
use dagflow_kvs_core::{KvsClient, DEFAULT_RECV_TIMEOUT};
use dagflow_kvs_memory::InMemoryKvs;
use dagflow_metrics::DagRuntimeRecorder;
use dagflow_resolver::{FunctionCache, FunctionLoader, KvsReferenceResolver, ReferenceResolver};
use dagflow_types::{Consistency, DagTrigger, FunctionCall, Schedule};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Command-line interface and CLI-facing types.
pub mod cli;
/// Built-in user-function registry.
pub mod functions;

pub use cli::{Cli, CliConsistency, Commands};

/// How often a running [`ExecutorApp::serve`] loop flushes accumulated
/// latency samples to the scheduler.
const METRICS_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Errors surfaced at the process boundary: anything the engine or transport
/// raised while driving a hop or a one-shot call.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The step engine failed to execute a hop or call.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Trigger, schedule, or metrics delivery failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Runtime configuration for one executor process.
///
/// Every field has a sane standalone default, and the CLI only overrides what
/// the operator actually passed.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// This process's own inbound trigger/schedule address.
    pub bind_addr: String,
    /// Address the scheduler's continuation and metrics endpoint listens on.
    pub scheduler_continuation_addr: String,
    /// Receive timeout applied to outbound KVS round-trips.
    pub kvs_recv_timeout: Duration,
    /// Whether normal-mode hops ready at the same moment for the same
    /// function should be folded into one batched invocation.
    pub batching_enabled: bool,
    /// Capacity hint for the trigger bus (unused by the unbounded in-memory
    /// mesh; carried for a future bounded-channel transport).
    pub bus_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "local-executor".to_string(),
            scheduler_continuation_addr: "scheduler-continuation".to_string(),
            kvs_recv_timeout: DEFAULT_RECV_TIMEOUT,
            batching_enabled: true,
            bus_capacity: 1024,
        }
    }
}

struct PendingInvocation {
    schedule: Schedule,
    triggers: Vec<DagTrigger>,
}

/// Owns one executor's share of the workload: the step engine, the trigger
/// mesh endpoint, and the trigger-set accumulator that turns scattered
/// `DagTrigger`s into a ready `(Schedule, Vec<DagTrigger>)` hop.
pub struct ExecutorApp {
    config: ExecutorConfig,
    mesh: InMemoryMesh,
    kvs: InMemoryKvs,
    executor: Executor,
    schedule_store: DashMap<Uuid, Schedule>,
    pending: DashMap<(Uuid, String), PendingInvocation>,
    metrics: DagRuntimeRecorder,
    inbound: mpsc::UnboundedReceiver<Envelope>,
    calls: mpsc::UnboundedReceiver<Envelope>,
    flush: tokio::time::Interval,
}

impl ExecutorApp {
    /// Build an executor over a fresh in-memory KVS and the given mesh,
    /// registering its trigger/schedule and call-pull addresses immediately.
    /// Multiple `ExecutorApp`s sharing one cloned `mesh` (it is
    /// reference-counted internally) simulate distinct executor processes
    /// in a test without a network.
    pub fn new(config: ExecutorConfig, mesh: InMemoryMesh, kvs: InMemoryKvs, function_loader: Arc<dyn FunctionLoader>) -> Self {
        let kvs_client: Arc<dyn KvsClient> = Arc::new(kvs.clone());
        let resolver: Arc<dyn ReferenceResolver> = Arc::new(KvsReferenceResolver::new(kvs_client.clone()));
        let triggers: Arc<dyn TriggerSink> = Arc::new(mesh.clone());
        let executor = Executor::new(
            kvs_client,
            resolver,
            Arc::new(FunctionCache::new()),
            function_loader,
            triggers,
            config.scheduler_continuation_addr.clone(),
        );
        let inbound = mesh.register(config.bind_addr.clone());
        let calls = mesh.register(format!("{}#calls", config.bind_addr));
        let flush = tokio::time::interval_at(tokio::time::Instant::now() + METRICS_FLUSH_INTERVAL, METRICS_FLUSH_INTERVAL);
        Self {
            config,
            mesh,
            kvs,
            executor,
            schedule_store: DashMap::new(),
            pending: DashMap::new(),
            metrics: DagRuntimeRecorder::new(),
            inbound,
            calls,
            flush,
        }
    }

    /// The in-memory KVS backing this executor, for test fixtures that need
    /// to seed function bytes or inspect written results.
    pub fn kvs(&self) -> &InMemoryKvs {
        &self.kvs
    }

    /// Launch a brand-new DAG invocation: push `schedule` to every address
    /// named in its placement. If `schedule.locations` doesn't yet name a
    /// host for `schedule.target_function`, this process claims it.
    ///
    /// The source hop itself runs later, when each recipient (including
    /// this process, if it's also a host) pumps the `Schedule` envelope off
    /// its own inbound queue — the same path every other hop takes. This
    /// process must still be pumping (directly or via `serve`) for its own
    /// source hop to execute.
    #[tracing::instrument(skip_all, fields(id = %schedule.id, dag = %schedule.dag.name))]
    pub async fn submit_dag(&mut self, mut schedule: Schedule) -> Result<(), AppError> {
        schedule.locations.entry(schedule.target_function.clone()).or_insert_with(|| self.config.bind_addr.clone());

        let mut addrs: Vec<String> = schedule.locations.values().cloned().collect();
        addrs.sort();
        addrs.dedup();
        for addr in &addrs {
            self.mesh.send_schedule(addr, schedule.clone())?;
        }
        Ok(())
    }

    /// Execute a one-shot [`FunctionCall`] directly, without going through
    /// the trigger mesh. Used by the `SubmitCall` CLI subcommand for local
    /// smoke-testing.
    pub async fn submit_call(&mut self, call: FunctionCall) -> Result<(), AppError> {
        self.executor.exec_single_call(&call).await.map_err(Into::into)
    }

    /// Run `schedule`'s hop locally if this process has no predecessor to
    /// wait on (the target has no incoming edges) *and* is the node named
    /// as `target_function`'s host. Every process named in a schedule's
    /// `locations` receives the same broadcast `Schedule`, so the location
    /// check is what keeps only one of them from double-running the source.
    async fn maybe_run_source(&mut self, schedule: Schedule) -> Result<(), AppError> {
        let incoming = schedule.dag.connections.iter().filter(|c| c.sink == schedule.target_function).count();
        let hosts_target =
            schedule.locations.get(&schedule.target_function).is_some_and(|addr| addr == &self.config.bind_addr);
        if incoming == 0 && hosts_target {
            self.run_hop(schedule, Vec::new()).await?;
        }
        Ok(())
    }

    /// Run the main loop: pull triggers, schedules, and calls off this
    /// process's registered addresses until the mesh is torn down.
    pub async fn serve(mut self) -> Result<(), AppError> {
        while self.pump().await? {}
        Ok(())
    }

    /// Process one inbound envelope or metrics flush tick, then opportunistically
    /// drain whatever else is already queued before dispatching.
    ///
    /// Exposed so tests can drive an `ExecutorApp` deterministically, message
    /// by message, instead of spawning a process. Returns `false` once both
    /// registered channels have been torn down.
    pub async fn pump(&mut self) -> Result<bool, AppError> {
        let progressed = tokio::select! {
            envelope = self.inbound.recv() => match envelope {
                Some(envelope) => {
                    self.handle_envelope(envelope).await?;
                    true
                }
                None => false,
            },
            envelope = self.calls.recv() => match envelope {
                Some(envelope) => {
                    self.handle_envelope(envelope).await?;
                    true
                }
                None => false,
            },
            _ = self.flush.tick() => {
                self.flush_metrics().await?;
                true
            }
        };
        if !progressed {
            return Ok(false);
        }

        // Triggers arriving in the same tick accumulate here before anything
        // dispatches, so same-function normal-consistency hops that are all
        // ready at once get folded into a single batched step.
        while let Ok(envelope) = self.inbound.try_recv() {
            self.handle_envelope(envelope).await?;
        }
        while let Ok(envelope) = self.calls.try_recv() {
            self.handle_envelope(envelope).await?;
        }
        self.dispatch_all_ready().await?;
        Ok(true)
    }

    async fn flush_metrics(&mut self) -> Result<(), AppError> {
        let report = self.metrics.drain_report();
        if report.dag_latencies.is_empty() {
            return Ok(());
        }
        dagflow_metrics::send_metrics_report(&self.mesh, &self.config.scheduler_continuation_addr, &report).await.map_err(|err| match err {
            dagflow_metrics::MetricsError::Delivery(bus) => AppError::Bus(bus),
            dagflow_metrics::MetricsError::Encode(_) => {
                // A report built entirely from already-valid types never fails to encode.
                unreachable!("MetricsReport always encodes")
            }
        })
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> Result<(), AppError> {
        match envelope {
            Envelope::Schedule(schedule) => {
                self.schedule_store.insert(schedule.id, schedule.clone());
                self.maybe_run_source(schedule).await?;
            }
            Envelope::Trigger(trigger) => self.handle_trigger(trigger).await?,
            Envelope::Call(call) => self.submit_call(call).await?,
            Envelope::Continuation(_) | Envelope::Response(_) => {
                tracing::warn!("dropped a continuation/response envelope on an executor's inbound address");
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(id = %trigger.id, target = %trigger.target_function))]
    async fn handle_trigger(&mut self, trigger: DagTrigger) -> Result<(), AppError> {
        let Some(stored) = self.schedule_store.get(&trigger.id).map(|entry| entry.value().clone()) else {
            tracing::warn!("trigger arrived before its schedule; dropping");
            return Ok(());
        };

        let mut schedule = stored;
        schedule.target_function = trigger.target_function.clone();
        let key = (trigger.id, trigger.target_function.clone());
        self.pending.entry(key).or_insert_with(|| PendingInvocation { schedule, triggers: Vec::new() }).triggers.push(trigger);
        Ok(())
    }

    /// Pull every invocation whose expected predecessor count has now been
    /// met out of `pending` and run it. Causal-mode invocations always run
    /// one at a time; normal-mode invocations for the same function name are
    /// folded into a single batched [`Executor::step_normal`] call when
    /// `batching_enabled`, so hops that became ready in the same tick share
    /// one pass over the KVS instead of one each.
    async fn dispatch_all_ready(&mut self) -> Result<(), AppError> {
        let ready_keys: Vec<(Uuid, String)> = self
            .pending
            .iter()
            .filter(|entry| {
                let candidate = entry.value();
                let expected = candidate
                    .schedule
                    .dag
                    .connections
                    .iter()
                    .filter(|c| c.sink == candidate.schedule.target_function)
                    .count()
                    .max(1);
                candidate.triggers.len() >= expected
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut ready = Vec::with_capacity(ready_keys.len());
        for key in ready_keys {
            if let Some((_, invocation)) = self.pending.remove(&key) {
                ready.push(invocation);
            }
        }

        let mut causal = Vec::new();
        let mut normal_by_function: BTreeMap<String, Vec<(Schedule, Vec<DagTrigger>)>> = BTreeMap::new();
        for PendingInvocation { schedule, triggers } in ready {
            if schedule.consistency == Consistency::Multi {
                causal.push((schedule, triggers));
            } else {
                normal_by_function.entry(schedule.target_function.clone()).or_default().push((schedule, triggers));
            }
        }

        for (schedule, triggers) in causal {
            self.run_causal(schedule, triggers).await?;
        }
        for (_, batch) in normal_by_function {
            if self.config.batching_enabled {
                self.run_normal_batch(batch).await?;
            } else {
                for invocation in batch {
                    self.run_normal_batch(vec![invocation]).await?;
                }
            }
        }
        Ok(())
    }

    async fn run_hop(&mut self, schedule: Schedule, triggers: Vec<DagTrigger>) -> Result<(), AppError> {
        match schedule.consistency {
            Consistency::Multi => self.run_causal(schedule, triggers).await,
            Consistency::Normal => self.run_normal_batch(vec![(schedule, triggers)]).await,
        }
    }

    async fn run_causal(&mut self, schedule: Schedule, triggers: Vec<DagTrigger>) -> Result<(), AppError> {
        let dag_name = schedule.dag.name.clone();
        let outcome = self.executor.step_causal(schedule.clone(), triggers).await?;
        if outcome.is_sink && outcome.successes.first().copied().unwrap_or(false) {
            self.metrics.record(&dag_name, &schedule);
        }
        Ok(())
    }

    async fn run_normal_batch(&mut self, batch: Vec<(Schedule, Vec<DagTrigger>)>) -> Result<(), AppError> {
        let schedules: Vec<Schedule> = batch.iter().map(|(schedule, _)| schedule.clone()).collect();
        let outcome = self.executor.step_normal(batch).await?;
        if outcome.is_sink {
            for (schedule, success) in schedules.into_iter().zip(outcome.successes) {
                if success {
                    self.metrics.record(&schedule.dag.name, &schedule);
                }
            }
        }
        Ok(())
    }
}

/// Decode a `FunctionCall`'s raw result or serialized `BoundaryError` from
/// `response_key`, for `SubmitCall`'s own reporting. Returns `None` if
/// nothing has been written yet.
pub async fn read_call_result(kvs: &dyn KvsClient, response_key: &str, consistency: Consistency) -> Result<Option<dagflow_serde::Value>, AppError> {
    match consistency {
        Consistency::Normal => {
            let got = kvs.get(&[response_key.to_string()]).await.map_err(EngineError::from)?;
            match got.get(response_key).and_then(|v| v.clone()) {
                Some(lattice) => Ok(Some(dagflow_serde::load_lattice(&lattice).map_err(EngineError::from)?)),
                None => Ok(None),
            }
        }
        Consistency::Multi => {
            let got = kvs
                .causal_get(&[response_key.to_string()], 0, u64::MAX, Consistency::Multi, 0)
                .await
                .map_err(EngineError::from)?;
            match got.get(response_key).and_then(|v| v.clone()) {
                Some(tuple) => Ok(Some(dagflow_serde::load(&tuple.payload).map_err(EngineError::from)?)),
                None => Ok(None),
            }
        }
    }
}

/// Build the positional [`dagflow_serde::Value`] arguments for a
/// `SubmitCall`, parsing each raw string as an integer, then a boolean,
/// falling back to a string literal.
pub fn parse_cli_args(raw: &[String]) -> Vec<dagflow_serde::Value> {
    raw.iter()
        .map(|arg| {
            if let Ok(n) = arg.parse::<i64>() {
                dagflow_serde::Value::Int(n)
            } else if let Ok(b) = arg.parse::<bool>() {
                dagflow_serde::Value::Bool(b)
            } else {
                dagflow_serde::Value::Str(arg.clone())
            }
        })
        .collect()
}

/// Encode parsed CLI arguments into the wire form a [`FunctionCall`] expects.
pub fn encode_call_args(values: &[dagflow_serde::Value]) -> Result<Vec<Vec<u8>>, AppError> {
    values
        .iter()
        .map(|v| dagflow_serde::dump(v).map_err(EngineError::from).map_err(Into::into))
        .collect()
}

