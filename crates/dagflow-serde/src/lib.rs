#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-serde** – converts between dagflow's user-visible [`Value`]
//! type, [`Lattice`] envelopes, and wire bytes.
//!
//! Wire encoding is msgpack via `rmp-serde`, matching the encoding the
//! teacher workspace's storage layer uses for event payloads.

/// The dynamic, user-visible value type.
pub mod value;

pub use value::Value;

use dagflow_types::Lattice;

/// Errors raised while encoding or decoding values.
#[derive(Debug, thiserror::Error)]
pub enum SerdeError {
    /// Failed to encode a value to wire bytes.
    #[error("failed to encode value: {0}")]
    Encode(String),
    /// Failed to decode a value from wire bytes.
    #[error("failed to decode value: {0}")]
    Decode(String),
    /// A lattice variant was passed to an operation that doesn't support
    /// it (e.g. loading a non-LWW/Wren lattice as a plain value).
    #[error("unsupported lattice variant for this operation")]
    UnsupportedLattice,
}

/// Serialize any serializable type to wire bytes.
pub fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, SerdeError> {
    rmp_serde::to_vec_named(value).map_err(|e| SerdeError::Encode(e.to_string()))
}

/// Deserialize wire bytes into a concrete type.
pub fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, SerdeError> {
    rmp_serde::from_slice(bytes).map_err(|e| SerdeError::Decode(e.to_string()))
}

/// Serialize a [`Value`] to wire bytes. Convenience wrapper over
/// [`serialize`] for the common case.
pub fn dump(value: &Value) -> Result<Vec<u8>, SerdeError> {
    serialize(value)
}

/// Deserialize wire bytes into a [`Value`].
pub fn load(bytes: &[u8]) -> Result<Value, SerdeError> {
    deserialize(bytes)
}

/// Wrap a value in a normal-mode lattice envelope (last-writer-wins),
/// stamped with `ts`.
pub fn dump_lattice_lww(value: &Value, ts: u64) -> Result<Lattice, SerdeError> {
    Ok(Lattice::Lww { ts, value: dump(value)? })
}

/// Wrap a value in the causal-sink lattice envelope, carrying the pinned
/// snapshot bounds.
pub fn dump_lattice_wren(value: &Value, ts: u64, promise: u64) -> Result<Lattice, SerdeError> {
    Ok(Lattice::Wren { ts, promise, value: dump(value)? })
}

/// Unwrap a lattice produced by [`dump_lattice_lww`] or
/// [`dump_lattice_wren`] back into a [`Value`], deserializing its payload.
///
/// Any other lattice variant is [`SerdeError::UnsupportedLattice`]: the
/// resolver's causal path only ever deserializes `Wren`-family envelopes
/// (spec: "required type is `LWWPairLattice`"), and the normal path only
/// deserializes `Lww`.
pub fn load_lattice(lattice: &Lattice) -> Result<Value, SerdeError> {
    match lattice {
        Lattice::Lww { value, .. } | Lattice::Wren { value, .. } => load(value),
        _ => Err(SerdeError::UnsupportedLattice),
    }
}

/// Unwrap a lattice's raw bytes and deserialize them, without restricting
/// which variant is allowed (the "reveal" path, used when a reference's
/// `deserialize` flag is false or the lattice isn't a `Lww`/`Wren`).
pub fn reveal(lattice: &Lattice) -> Result<Value, SerdeError> {
    load(&lattice.reveal())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_every_value_shape() {
        let samples = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(-7),
            Value::Float(3.5),
            Value::Str("hi".into()),
            Value::Bytes(vec![1, 2, 3]),
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::Tuple(vec![Value::Int(1), Value::Str("a".into())]),
            Value::Reference(dagflow_types::Reference::new("k", true)),
        ];
        for v in samples {
            let bytes = dump(&v).unwrap();
            let back = load(&bytes).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn lww_round_trip_through_lattice() {
        let v = Value::Int(42);
        let lattice = dump_lattice_lww(&v, 10).unwrap();
        assert_eq!(load_lattice(&lattice).unwrap(), v);
    }

    #[test]
    fn wren_round_trip_through_lattice() {
        let v = Value::Str("snapshot".into());
        let lattice = dump_lattice_wren(&v, 5, 50).unwrap();
        assert_eq!(load_lattice(&lattice).unwrap(), v);
        match lattice {
            Lattice::Wren { ts, promise, .. } => {
                assert_eq!(ts, 5);
                assert_eq!(promise, 50);
            }
            _ => panic!("expected Wren"),
        }
    }

    #[test]
    fn load_lattice_rejects_non_lww_wren_variants() {
        let lattice = Lattice::SetOf(Default::default());
        assert!(matches!(load_lattice(&lattice), Err(SerdeError::UnsupportedLattice)));
    }

    #[test]
    fn reveal_decodes_raw_bytes_regardless_of_variant() {
        let v = Value::Bool(true);
        let bytes = dump(&v).unwrap();
        let lattice = Lattice::SingleKeyCausal {
            vclock: Default::default(),
            values: vec![bytes],
        };
        assert_eq!(reveal(&lattice).unwrap(), v);
    }
}
