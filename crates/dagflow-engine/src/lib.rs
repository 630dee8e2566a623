#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-engine** – the DAG step engine: invokes a single function hop,
//! fans its result out to successors or dispatches it to a sink, and
//! computes the future read-set of a schedule's not-yet-run descendants.
//!
//! This is the crate everything else in the workspace builds up to: it
//! consumes [`dagflow_resolver::ReferenceResolver`] and
//! [`dagflow_bus::TriggerSink`] to turn a [`dagflow_types::Schedule`] plus
//! its accumulated [`dagflow_types::DagTrigger`]s into either more triggers
//! or a terminal write.

use dagflow_bus::BusError;
use dagflow_kvs_core::KvsError;
use dagflow_resolver::ResolveError;
use dagflow_types::BoundaryError;

mod executor;
mod invoke;
mod read_set;

pub use executor::Executor;
pub use read_set::compute_future_read_set;

/// Outcome of one [`Executor::step_normal`] or [`Executor::step_causal`]
/// call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// True if this hop had no outgoing connections in the DAG (i.e. it
    /// dispatched to a sink rather than forwarding a trigger).
    pub is_sink: bool,
    /// Per-schedule success flags, in the same order schedules were
    /// supplied. A `false` entry marks a `MultiExec` controlled abort, not
    /// an error: the schedule simply produced no downstream effect.
    pub successes: Vec<bool>,
}

/// Errors raised while stepping a DAG or executing a single function call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Neither the function cache nor the KVS had the named function.
    #[error("function {0} not found")]
    FuncNotFound(String),
    /// The user function raised (or panicked) during invocation.
    #[error("user function raised: {0}")]
    ExecutionError(String),
    /// Reference resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Trigger or response delivery failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The underlying KVS request failed.
    #[error(transparent)]
    Kvs(#[from] KvsError),
    /// A value failed to encode or decode.
    #[error(transparent)]
    Serde(#[from] dagflow_serde::SerdeError),
}

impl EngineError {
    /// Project this error onto the external-boundary error enumeration
    /// written to a `response_key`, never propagated as a downstream
    /// trigger.
    pub fn as_boundary_error(&self) -> BoundaryError {
        match self {
            EngineError::FuncNotFound(_) => BoundaryError::FuncNotFound,
            EngineError::Resolve(ResolveError::FuncNotFound(_)) => BoundaryError::FuncNotFound,
            other => BoundaryError::ExecutionError(other.to_string()),
        }
    }
}
