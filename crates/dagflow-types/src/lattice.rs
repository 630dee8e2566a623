//! Value envelopes produced by the KVS. Merges are associative, commutative
//! and idempotent; the KVS stores lattices, not raw bytes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Opaque client identifier used by vector clocks and causal requests.
pub type ClientId = u64;

/// A vector clock over client ids, used by the causal lattice variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(pub BTreeMap<ClientId, u64>);

impl VectorClock {
    /// An empty vector clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge two vector clocks by taking the pairwise maximum of each entry.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (client, &count) in &other.0 {
            let entry = merged.entry(*client).or_insert(0);
            *entry = (*entry).max(count);
        }
        Self(merged)
    }
}

/// A single dependency edge recorded by a `MultiKeyCausal` lattice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalDep {
    /// Key the dependency was read from.
    pub key: String,
    /// Vector clock of the dependency at the time it was read.
    pub vclock: VectorClock,
}

/// Value envelope returned by and written to the KVS.
///
/// Every variant mirrors a lattice family from the original Anna/Cloudburst
/// KVS: last-writer-wins, set and map CRDTs, and the two causal variants
/// used for multi-key transactions. `Wren` is the snapshot-pinned envelope
/// used at causal sinks, carrying the `(ts, promise)` pair the resolver uses
/// to tighten `[t_low, t_high]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Lattice {
    /// Last-writer-wins: a single timestamped value.
    Lww {
        /// Logical write timestamp.
        ts: u64,
        /// Serialized value bytes.
        value: Vec<u8>,
    },
    /// A grow-only/observed-remove set of serialized values.
    SetOf(BTreeSet<Vec<u8>>),
    /// A map from serialized keys to nested lattices.
    MapOf(BTreeMap<Vec<u8>, Lattice>),
    /// Single-key causal: a vector clock plus the concurrent values it
    /// dominates.
    SingleKeyCausal {
        /// Vector clock at the time of write.
        vclock: VectorClock,
        /// Concurrent values under this clock.
        values: Vec<Vec<u8>>,
    },
    /// Multi-key causal: as `SingleKeyCausal`, plus the read dependencies
    /// that produced this value.
    MultiKeyCausal {
        /// Vector clock at the time of write.
        vclock: VectorClock,
        /// Keys (and their clocks) this value causally depends on.
        deps: Vec<CausalDep>,
        /// Concurrent values under this clock.
        values: Vec<Vec<u8>>,
    },
    /// Causal snapshot envelope: a timestamp/promise pair bounding the
    /// interval in which `value` is valid to observe, plus the value
    /// itself.
    Wren {
        /// Lower bound of the validity interval.
        ts: u64,
        /// Upper bound of the validity interval.
        promise: u64,
        /// Serialized value bytes.
        value: Vec<u8>,
    },
}

impl Lattice {
    /// The [`crate::LatticeType`] tag for this variant, used when a lattice
    /// crosses the wire as a [`crate::CausalTuple`].
    pub fn type_tag(&self) -> crate::LatticeType {
        match self {
            Lattice::Lww { .. } => crate::LatticeType::Lww,
            Lattice::SetOf(_) => crate::LatticeType::SetOf,
            Lattice::MapOf(_) => crate::LatticeType::MapOf,
            Lattice::SingleKeyCausal { .. } => crate::LatticeType::SingleKeyCausal,
            Lattice::MultiKeyCausal { .. } => crate::LatticeType::MultiKeyCausal,
            Lattice::Wren { .. } => crate::LatticeType::Wren,
        }
    }

    /// Unwrap the lattice's raw bytes without consulting the `deserialize`
    /// flag of the reference that produced it. Concurrent values choose the
    /// first listed entry, matching the original KVS client's tie-break
    /// rule.
    pub fn reveal(&self) -> Vec<u8> {
        match self {
            Lattice::Lww { value, .. } => value.clone(),
            Lattice::Wren { value, .. } => value.clone(),
            Lattice::SetOf(set) => set.iter().next().cloned().unwrap_or_default(),
            Lattice::MapOf(map) => map.values().next().map(Lattice::reveal).unwrap_or_default(),
            Lattice::SingleKeyCausal { values, .. } => values.first().cloned().unwrap_or_default(),
            Lattice::MultiKeyCausal { values, .. } => values.first().cloned().unwrap_or_default(),
        }
    }

    /// Merge two lattices of the same variant. Mismatched variants panic in
    /// debug builds and take `self` in release; the resolver never merges
    /// across variants in practice (each key is owned by a single lattice
    /// family for its lifetime).
    pub fn merge(&self, other: &Self) -> Self {
        match (self, other) {
            (Lattice::Lww { ts: a, value: va }, Lattice::Lww { ts: b, value: vb }) => {
                if a >= b {
                    Lattice::Lww { ts: *a, value: va.clone() }
                } else {
                    Lattice::Lww { ts: *b, value: vb.clone() }
                }
            }
            (Lattice::SetOf(a), Lattice::SetOf(b)) => {
                Lattice::SetOf(a.union(b).cloned().collect())
            }
            (
                Lattice::SingleKeyCausal { vclock: ca, values: va },
                Lattice::SingleKeyCausal { vclock: cb, values: vb },
            ) => {
                let merged_clock = ca.merge(cb);
                let mut values: Vec<Vec<u8>> = va.iter().chain(vb.iter()).cloned().collect();
                values.sort();
                values.dedup();
                Lattice::SingleKeyCausal { vclock: merged_clock, values }
            }
            (
                Lattice::MultiKeyCausal { vclock: ca, deps: da, values: va },
                Lattice::MultiKeyCausal { vclock: cb, values: vb, .. },
            ) => {
                let merged_clock = ca.merge(cb);
                let mut values: Vec<Vec<u8>> = va.iter().chain(vb.iter()).cloned().collect();
                values.sort();
                values.dedup();
                Lattice::MultiKeyCausal { vclock: merged_clock, deps: da.clone(), values }
            }
            (Lattice::Wren { promise: pa, .. }, Lattice::Wren { promise: pb, .. }) => {
                if pa >= pb { self.clone() } else { other.clone() }
            }
            _ => self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lww_merge_keeps_latest() {
        let a = Lattice::Lww { ts: 1, value: b"a".to_vec() };
        let b = Lattice::Lww { ts: 2, value: b"b".to_vec() };
        assert_eq!(a.merge(&b), Lattice::Lww { ts: 2, value: b"b".to_vec() });
    }

    #[test]
    fn reveal_takes_first_concurrent_value() {
        let l = Lattice::SingleKeyCausal {
            vclock: VectorClock::new(),
            values: vec![b"first".to_vec(), b"second".to_vec()],
        };
        assert_eq!(l.reveal(), b"first".to_vec());
    }

    #[test]
    fn vector_clock_merge_is_pairwise_max() {
        let a = VectorClock(BTreeMap::from([(1, 3), (2, 1)]));
        let b = VectorClock(BTreeMap::from([(1, 1), (3, 5)]));
        let merged = a.merge(&b);
        assert_eq!(merged.0.get(&1), Some(&3));
        assert_eq!(merged.0.get(&2), Some(&1));
        assert_eq!(merged.0.get(&3), Some(&5));
    }
}
