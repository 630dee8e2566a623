//! Lazy pointer-to-key values embedded in function arguments.

use serde::{Deserialize, Serialize};

/// A lazy pointer to a KVS key, embedded in a function's arguments and
/// replaced by its resolved value before user code runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// KVS key this reference points at.
    pub key: String,
    /// Whether the resolved value should be deserialized (as opposed to
    /// revealed raw from its lattice envelope).
    pub deserialize: bool,
}

impl Reference {
    /// Construct a new reference.
    pub fn new(key: impl Into<String>, deserialize: bool) -> Self {
        Self { key: key.into(), deserialize }
    }
}
