#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-types** – Shared wire and data model types for dagflow.
//!
//! This crate sits at the bottom of the dagflow crate graph: it defines the
//! `Reference`, `Lattice`, `Schedule`, `DagTrigger` and related wire shapes
//! every other dagflow crate builds on, and makes no assumptions about I/O,
//! serialization format, or storage.

/// One-shot function invocation request.
pub mod call;
/// Value envelopes produced by the KVS.
pub mod lattice;
/// Lazy pointer-to-key values.
pub mod reference;
/// DAG definitions and the per-request schedule.
pub mod schedule;
/// Inter-executor trigger and continuation messages.
pub mod trigger;
/// KVS transport wire messages and boundary errors.
pub mod wire;

pub use call::FunctionCall;
pub use lattice::{CausalDep, ClientId, Lattice, VectorClock};
pub use reference::Reference;
pub use schedule::{ArgList, Connection, Consistency, Dag, FunctionKind, FunctionNode, Schedule};
pub use trigger::{Continuation, DagTrigger, UNBOUNDED_T_HIGH};
pub use wire::{BoundaryError, CausalRequest, CausalResponse, CausalTuple, KvsError, LatticeType};

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{
        ArgList, BoundaryError, CausalDep, CausalRequest, CausalResponse, CausalTuple, ClientId,
        Connection, Consistency, Continuation, Dag, DagTrigger, FunctionCall, FunctionKind,
        FunctionNode, KvsError, Lattice, LatticeType, Reference, Schedule, VectorClock,
        UNBOUNDED_T_HIGH,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn schedule_output_key_defaults_to_id() {
        let schedule = Schedule {
            id: uuid::Uuid::nil(),
            dag: Dag { name: "d".into(), functions: vec![], connections: vec![] },
            target_function: "f".into(),
            arguments: Default::default(),
            locations: Default::default(),
            output_key: None,
            response_address: None,
            continuation: None,
            client_id: 0,
            consistency: Consistency::Normal,
            start_time: chrono::Utc::now(),
        };
        assert_eq!(schedule.effective_output_key(), uuid::Uuid::nil().to_string());
    }

    #[test]
    fn dag_outgoing_filters_by_source() {
        let dag = Dag {
            name: "chain".into(),
            functions: vec![FunctionNode::normal("a"), FunctionNode::normal("b")],
            connections: vec![Connection { source: "a".into(), sink: "b".into() }],
        };
        let out: Vec<_> = dag.outgoing("a").collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sink, "b");
        assert_eq!(dag.outgoing("b").count(), 0);
    }
}
