//! One-shot function invocation request.

use serde::{Deserialize, Serialize};

use crate::schedule::Consistency;

/// A one-shot request for a single function invocation, outside of any DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name to invoke.
    pub name: String,
    /// Serialized positional arguments.
    pub arguments: Vec<Vec<u8>>,
    /// KVS key the result (or error payload) is written to.
    pub response_key: String,
    /// Consistency mode to execute under.
    pub consistency: Consistency,
}
