//! KVS transport wire messages and boundary error enumerations.

use serde::{Deserialize, Serialize};

use crate::lattice::ClientId;
use crate::schedule::Consistency;

/// Tag identifying which [`crate::Lattice`] variant a [`CausalTuple`]'s
/// payload decodes to, carried alongside the payload so a receiver doesn't
/// need to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LatticeType {
    /// [`crate::Lattice::Lww`]
    Lww,
    /// [`crate::Lattice::SetOf`]
    SetOf,
    /// [`crate::Lattice::MapOf`]
    MapOf,
    /// [`crate::Lattice::SingleKeyCausal`]
    SingleKeyCausal,
    /// [`crate::Lattice::MultiKeyCausal`]
    MultiKeyCausal,
    /// [`crate::Lattice::Wren`]
    Wren,
}

/// Per-key error reported by the KVS transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvsError {
    /// No error: the tuple carries a valid payload.
    NoError,
    /// The key does not exist in the KVS.
    KeyDoesNotExist,
}

/// A single key/value tuple as it appears on the causal KVS wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalTuple {
    /// The key this tuple answers for.
    pub key: String,
    /// Serialized lattice payload. Empty when `error != NoError`.
    pub payload: Vec<u8>,
    /// Which lattice variant `payload` decodes to.
    pub lattice_type: LatticeType,
    /// Lower timestamp bound, valid for `Wren`/LWW-pair payloads.
    pub ts: u64,
    /// Upper promise bound, valid for `Wren`/LWW-pair payloads.
    pub promise: u64,
    /// Per-key error status.
    pub error: KvsError,
}

/// A causal read/write request sent to the KVS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalRequest {
    /// Requesting client, used to scope the transaction.
    pub id: String,
    /// Consistency mode requested.
    pub consistency: Consistency,
    /// Lower bound of the snapshot interval.
    pub t_low: u64,
    /// Upper bound of the snapshot interval.
    pub t_high: u64,
    /// Keys (and, for puts, payloads) this request concerns.
    pub tuples: Vec<CausalTuple>,
    /// Address the response should be delivered to.
    pub response_address: String,
}

impl CausalRequest {
    /// Build a read request for `keys` scoped to `client_id`, within
    /// `[t_low, t_high]`.
    pub fn read(client_id: ClientId, keys: &[String], consistency: Consistency, t_low: u64, t_high: u64) -> Self {
        Self {
            id: client_id.to_string(),
            consistency,
            t_low,
            t_high,
            tuples: keys
                .iter()
                .map(|k| CausalTuple {
                    key: k.clone(),
                    payload: Vec::new(),
                    lattice_type: LatticeType::Wren,
                    ts: 0,
                    promise: 0,
                    error: KvsError::NoError,
                })
                .collect(),
            response_address: String::new(),
        }
    }
}

/// Response to a [`CausalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalResponse {
    /// One tuple per requested key.
    pub tuples: Vec<CausalTuple>,
}

/// Error enumeration surfaced at the executor's external boundary (written
/// to a `response_key`, never propagated as a downstream trigger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryError {
    /// The function was absent from both the function cache and the KVS.
    FuncNotFound,
    /// The user function raised during invocation.
    ExecutionError(String),
    /// A KVS read missed; recoverable via retry at the resolver layer.
    KeyDoesNotExist,
    /// No error: a put succeeded.
    NoError,
}

impl std::fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundaryError::FuncNotFound => write!(f, "FUNC_NOT_FOUND"),
            BoundaryError::ExecutionError(msg) => write!(f, "EXECUTION_ERROR: {msg}"),
            BoundaryError::KeyDoesNotExist => write!(f, "KEY_DNE"),
            BoundaryError::NoError => write!(f, "NO_ERROR"),
        }
    }
}
