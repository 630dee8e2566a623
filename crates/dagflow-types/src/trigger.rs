//! Inter-executor messages: triggers carrying one function's output, and
//! continuations handed back to the scheduler.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inter-executor message carrying one function's output plus causal
/// snapshot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagTrigger {
    /// The DAG invocation this trigger belongs to.
    pub id: Uuid,
    /// The node that produced this trigger.
    pub source: String,
    /// The node this trigger is destined for.
    pub target_function: String,
    /// Serialized result values (a tuple result is splatted into multiple
    /// entries).
    pub arguments: Vec<Vec<u8>>,
    /// Lower bound of the causal snapshot interval. Unused in normal mode.
    pub t_low: u64,
    /// Upper bound of the causal snapshot interval. `0` means "not yet
    /// initialized"; the first hop of a causal DAG treats that as
    /// unbounded (`2^64 - 1`).
    pub t_high: u64,
}

/// Value `t_high` takes on the incoming trigger of the first real step of a
/// causal DAG, meaning "no upper bound has been observed yet".
pub const UNBOUNDED_T_HIGH: u64 = u64::MAX;

/// A deferred sink path: the scheduler is asked to reschedule follow-on
/// work with the DAG's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    /// Name of the follow-on work to reschedule.
    pub name: String,
    /// Filled in by the executor: the DAG invocation id that completed.
    pub id: Option<Uuid>,
    /// Filled in by the executor: the serialized sink result.
    pub result: Option<Vec<u8>>,
}

impl Continuation {
    /// A continuation as set up by the scheduler, before the executor fills
    /// in `id`/`result`.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), id: None, result: None }
    }
}
