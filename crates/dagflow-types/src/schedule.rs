//! DAG definitions and the per-request `Schedule` that threads through
//! every hop of an invocation.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lattice::ClientId;
use crate::trigger::Continuation;

/// A list of serialized argument values, as they arrive on the wire before
/// being loaded into [`crate::Value`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgList(pub Vec<Vec<u8>>);

impl Deref for ArgList {
    type Target = Vec<Vec<u8>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ArgList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<Vec<u8>> for ArgList {
    fn from_iter<T: IntoIterator<Item = Vec<u8>>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Consistency mode an invocation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    /// Last-writer-wins / lattice-merge semantics, no cross-step snapshot.
    Normal,
    /// Transactional causal mode: a single `[t_low, t_high]` snapshot is
    /// carried and tightened across every hop of the DAG.
    Multi,
}

/// Attribute determining a DAG node's output-acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Ordinary node: every result is accepted and forwarded.
    Normal,
    /// A result matching `invalid_results` is a controlled abort, not a
    /// downstream trigger.
    MultiExec,
}

/// A node in a DAG definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionNode {
    /// Function name, unique within the DAG.
    pub name: String,
    /// Output-acceptance rule for this node.
    pub kind: FunctionKind,
    /// Serialized results that, for a `MultiExec` node, cause a controlled
    /// abort instead of a downstream trigger.
    pub invalid_results: Vec<Vec<u8>>,
}

impl FunctionNode {
    /// A plain, always-forwarding node.
    pub fn normal(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FunctionKind::Normal, invalid_results: Vec::new() }
    }

    /// A `MultiExec` node that aborts on any of `invalid_results`.
    pub fn multi_exec(name: impl Into<String>, invalid_results: Vec<Vec<u8>>) -> Self {
        Self { name: name.into(), kind: FunctionKind::MultiExec, invalid_results }
    }
}

/// A directed edge from one DAG node's output to another's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Upstream node name.
    pub source: String,
    /// Downstream node name.
    pub sink: String,
}

/// A user-registered directed acyclic graph of functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dag {
    /// DAG name, used to key reported runtimes.
    pub name: String,
    /// Every node in the DAG.
    pub functions: Vec<FunctionNode>,
    /// Every edge in the DAG.
    pub connections: Vec<Connection>,
}

impl Dag {
    /// Look up a node by name. DAG construction guarantees exactly one
    /// match per name; callers may `expect` on this in the engine since a
    /// schedule is only ever built against a dag that names its own nodes.
    pub fn function(&self, name: &str) -> Option<&FunctionNode> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Every outgoing connection whose source is `name`.
    pub fn outgoing<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a Connection> + 'b
    where
        'a: 'b,
    {
        self.connections.iter().filter(move |c| c.source == name)
    }
}

/// Request-scoped plan threaded through every hop of a DAG invocation.
///
/// Immutable per request except at the emitting side of a [`Continuation`],
/// where a new schedule is constructed by the scheduler for follow-on work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique id for this DAG invocation.
    pub id: Uuid,
    /// The DAG being executed.
    pub dag: Dag,
    /// The node this schedule currently targets.
    pub target_function: String,
    /// Static arguments for every node, keyed by node name.
    pub arguments: BTreeMap<String, ArgList>,
    /// Executor address each node is placed on, keyed by node name.
    pub locations: BTreeMap<String, String>,
    /// KVS key the sink result is written to, if no continuation or
    /// response address is set. Defaults to `id` when absent.
    pub output_key: Option<String>,
    /// Address to send the sink result to directly, if set.
    pub response_address: Option<String>,
    /// Deferred sink path: ask the scheduler to reschedule follow-on work.
    pub continuation: Option<Continuation>,
    /// Requesting client, used to scope causal reads/writes.
    pub client_id: ClientId,
    /// Consistency mode this invocation runs under.
    pub consistency: Consistency,
    /// Wall-clock time the request was created, used to compute end-to-end
    /// DAG latency at the sink.
    pub start_time: DateTime<Utc>,
}

impl Schedule {
    /// The KVS key a sink write targets: `output_key` if set, else `id`.
    pub fn effective_output_key(&self) -> String {
        self.output_key.clone().unwrap_or_else(|| self.id.to_string())
    }
}
