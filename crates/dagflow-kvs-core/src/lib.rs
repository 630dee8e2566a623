#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-kvs-core** – KVS client contract consumed by the dagflow
//! executor.
//!
//! This crate defines the minimal read/write surface the DAG step engine
//! and reference resolver depend on (`get`/`put`/`causal_get`/`causal_put`),
//! plus the push/pull transport abstraction backing it. Concrete KVS
//! drivers (in-memory, and eventually a real Anna-style store) implement
//! [`KvsClient`] in separate crates.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dagflow_types::{CausalTuple, ClientId, Consistency, Lattice};

/// Default receive timeout for a KVS transport round-trip. A timeout
/// converts server unavailability into a retry opportunity at the resolver
/// layer, rather than a hard failure.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors raised by a [`KvsClient`] or its underlying [`KvsTransport`].
#[derive(Debug, thiserror::Error)]
pub enum KvsError {
    /// No response arrived within the transport's receive timeout.
    #[error("KVS request timed out after {0:?}")]
    Timeout(Duration),
    /// The transport's response channel was closed.
    #[error("KVS transport channel closed")]
    ChannelClosed,
    /// A response was malformed (e.g. referenced a key that wasn't
    /// requested).
    #[error("malformed KVS response: {0}")]
    MalformedResponse(String),
}

/// Uniform read/write interface over the KVS, spanning both consistency
/// regimes the executor needs: normal (last-writer-wins / lattice merge)
/// and causal (snapshot-scoped reads/writes).
///
/// All methods are idempotent at the level the executor relies on: repeated
/// `get`/`causal_get` calls for the same keys are safe to retry, and `put`
/// reports success per key so a caller can distinguish a partial failure.
#[async_trait]
pub trait KvsClient: Send + Sync {
    /// Fetch the current lattice for each key. Missing keys map to `None`.
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Option<Lattice>>, KvsError>;

    /// Write `values[i]` to `keys[i]` for each index, reporting per-key
    /// success.
    async fn put(&self, keys: &[String], values: &[Lattice]) -> Result<HashMap<String, bool>, KvsError>;

    /// Read `keys` within `[t_low, t_high]`, scoped to `client_id` under
    /// `consistency`. Each tuple carries `ts`/`promise` bounds the resolver
    /// uses to tighten the snapshot interval. A `KEY_DNE` tuple maps to
    /// `None`.
    async fn causal_get(
        &self,
        keys: &[String],
        t_low: u64,
        t_high: u64,
        consistency: Consistency,
        client_id: ClientId,
    ) -> Result<HashMap<String, Option<CausalTuple>>, KvsError>;

    /// Write a single key under causal semantics, scoped to `client_id`.
    async fn causal_put(&self, key: &str, value: Lattice, client_id: ClientId) -> Result<bool, KvsError>;
}

/// Push/pull transport pair modeling "a datagram-style socket with a
/// per-thread response endpoint". A [`KvsClient`] implementation that talks
/// to a remote KVS process is built over this; [`KvsClient`] implementations
/// that are themselves the store (e.g. an in-memory test double) don't need
/// one.
#[async_trait]
pub trait KvsTransport: Send + Sync {
    /// Send a causal-shaped request (used for both `get` and `causal_get`;
    /// normal-mode reads populate only `tuples[].key`).
    async fn send_get(&self, request: &dagflow_types::CausalRequest) -> Result<(), KvsError>;

    /// Block until a get response arrives or `timeout` elapses.
    async fn recv_get_response(&self, timeout: Duration) -> Result<dagflow_types::CausalResponse, KvsError>;

    /// Send a write request.
    async fn send_put(&self, request: &dagflow_types::CausalRequest) -> Result<(), KvsError>;

    /// Block until a put response arrives or `timeout` elapses.
    async fn recv_put_response(&self, timeout: Duration) -> Result<dagflow_types::CausalResponse, KvsError>;
}
