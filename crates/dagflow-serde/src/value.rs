//! The dynamic, user-visible value type function arguments and results are
//! expressed in.

use dagflow_types::Reference;
use serde::{Deserialize, Serialize};

/// A user-visible value. Function arguments, results, and everything
/// stored in the KVS is ultimately one of these.
///
/// `Reference` is recognized specially wherever a function's arguments are
/// walked: by the reference resolver (extraction + substitution), and by
/// tuple-flattening / batching in the DAG step engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "v")]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// A homogeneous or heterogeneous list.
    List(Vec<Value>),
    /// A fixed-arity tuple. Tuple-flattening splices these into the
    /// surrounding argument or trigger-argument list.
    Tuple(Vec<Value>),
    /// A lazy pointer to a KVS key, to be resolved before user code runs.
    Reference(Reference),
}

impl Value {
    /// Borrow this value as a [`Reference`], if it is one.
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// True if every element of `self` is a [`Value::List`]. Used by the
    /// step engine to recognize a batching request, where argument `i`
    /// across requests has already been transposed into `List`s.
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Splice a top-level [`Value::Tuple`] into its members; any other
    /// value is returned as a single-element vector. Implements
    /// tuple-flattening (spec: "if a user-visible argument is itself a
    /// tuple, splice its members into the argument list").
    pub fn flatten_tuple(self) -> Vec<Value> {
        match self {
            Value::Tuple(members) => members,
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_tuple_splices_members() {
        let v = Value::Tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(v.flatten_tuple(), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn flatten_tuple_wraps_non_tuple() {
        let v = Value::Int(7);
        assert_eq!(v.flatten_tuple(), vec![Value::Int(7)]);
    }

    #[test]
    fn as_reference_only_matches_reference_variant() {
        let r = Value::Reference(Reference::new("k", true));
        assert!(r.as_reference().is_some());
        assert!(Value::Int(1).as_reference().is_none());
    }
}
