#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-bus** – trigger transport for the dagflow executor.
//!
//! Routes a function's output downstream, fire-and-forget, to the executor
//! hosting the successor node. [`TriggerSink`] is the transport-level
//! contract; [`PusherCache`] is the read-through, open-on-miss connection
//! cache described by the engine's "shared resources" rules; [`InMemoryMesh`]
//! is a [`TriggerSink`] wiring many in-process endpoints together, used for
//! end-to-end tests that exercise a real multi-hop DAG without a network.

use std::sync::Arc;

use async_trait::async_trait;
use dagflow_types::{Continuation, DagTrigger, FunctionCall, Schedule};
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Errors raised while delivering a trigger, continuation, or response.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The destination address has no registered endpoint.
    #[error("no endpoint registered for destination {0}")]
    Unreachable(String),
}

/// Fire-and-forget delivery of dagflow inter-executor messages.
///
/// Implementations must not block the caller on delivery confirmation
/// (spec: "Trigger sends are fire-and-forget at the transport layer").
#[async_trait]
pub trait TriggerSink: Send + Sync {
    /// Deliver a trigger to `destination`.
    async fn send_trigger(&self, destination: &str, trigger: DagTrigger) -> Result<(), BusError>;

    /// Deliver a completed continuation to the scheduler at `destination`.
    async fn send_continuation(&self, destination: &str, continuation: Continuation) -> Result<(), BusError>;

    /// Deliver a raw response payload to `destination` (used for
    /// `response_address` sink delivery).
    async fn send_response(&self, destination: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Read-through, open-on-miss cache of connection handles keyed by
/// destination address.
///
/// Sockets (or channel endpoints, in the in-process case) are never closed
/// during normal operation; reclamation happens at process exit, matching
/// the executor's "shared resources" rule.
pub struct PusherCache<T> {
    entries: DashMap<String, T>,
}

impl<T> Default for PusherCache<T> {
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<T: Clone> PusherCache<T> {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached connection for `destination`, opening and caching
    /// one via `open` on a miss.
    pub fn get_or_open(&self, destination: &str, open: impl FnOnce() -> T) -> T {
        if let Some(existing) = self.entries.get(destination) {
            return existing.clone();
        }
        let opened = open();
        self.entries.insert(destination.to_string(), opened.clone());
        opened
    }

    /// Number of destinations currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Envelope delivered to an [`InMemoryMesh`] endpoint.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// A downstream trigger.
    Trigger(DagTrigger),
    /// A completed continuation, destined for a scheduler endpoint.
    Continuation(Continuation),
    /// A raw response payload, destined for a requester's response address.
    Response(Vec<u8>),
    /// A DAG invocation plan, pushed once to every executor named in its
    /// `locations` before any trigger for that invocation is sent. Not part
    /// of [`TriggerSink`]: the engine never originates this message, only
    /// whatever placed the invocation does.
    Schedule(Schedule),
    /// A one-shot function call, pushed to an executor's call-pull endpoint.
    Call(FunctionCall),
}

/// An in-process mesh of named endpoints, used to exercise a real multi-hop
/// DAG in tests without a network. Each executor under test registers its
/// inbound address and drains the returned receiver in its own loop.
#[derive(Clone, Default)]
pub struct InMemoryMesh {
    endpoints: Arc<DashMap<String, mpsc::UnboundedSender<Envelope>>>,
}

impl InMemoryMesh {
    /// An empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` as a new inbound endpoint, returning its receiver.
    pub fn register(&self, address: impl Into<String>) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.insert(address.into(), tx);
        rx
    }

    fn send(&self, destination: &str, envelope: Envelope) -> Result<(), BusError> {
        let sender = self
            .endpoints
            .get(destination)
            .ok_or_else(|| BusError::Unreachable(destination.to_string()))?;
        // Fire-and-forget: an unbounded channel never blocks the sender, and
        // a dropped receiver is the in-process analogue of an unreachable
        // peer, which we've already guarded against above.
        let _ = sender.send(envelope);
        Ok(())
    }

    /// Push a DAG invocation's plan to `destination`, ahead of any trigger
    /// traffic for it.
    pub fn send_schedule(&self, destination: &str, schedule: Schedule) -> Result<(), BusError> {
        self.send(destination, Envelope::Schedule(schedule))
    }

    /// Push a one-shot function call to `destination`'s call-pull endpoint.
    pub fn send_call(&self, destination: &str, call: FunctionCall) -> Result<(), BusError> {
        self.send(destination, Envelope::Call(call))
    }
}

#[async_trait]
impl TriggerSink for InMemoryMesh {
    async fn send_trigger(&self, destination: &str, trigger: DagTrigger) -> Result<(), BusError> {
        self.send(destination, Envelope::Trigger(trigger))
    }

    async fn send_continuation(&self, destination: &str, continuation: Continuation) -> Result<(), BusError> {
        self.send(destination, Envelope::Continuation(continuation))
    }

    async fn send_response(&self, destination: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.send(destination, Envelope::Response(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagflow_types::DagTrigger;
    use uuid::Uuid;

    #[tokio::test]
    async fn mesh_delivers_trigger_to_registered_endpoint() {
        let mesh = InMemoryMesh::new();
        let mut rx = mesh.register("executor-b");

        let trigger = DagTrigger {
            id: Uuid::nil(),
            source: "a".into(),
            target_function: "b".into(),
            arguments: vec![],
            t_low: 0,
            t_high: 0,
        };
        mesh.send_trigger("executor-b", trigger.clone()).await.unwrap();

        match rx.recv().await.unwrap() {
            Envelope::Trigger(t) => assert_eq!(t, trigger),
            _ => panic!("expected trigger envelope"),
        }
    }

    #[tokio::test]
    async fn mesh_reports_unreachable_for_unregistered_destination() {
        let mesh = InMemoryMesh::new();
        let trigger = DagTrigger {
            id: Uuid::nil(),
            source: "a".into(),
            target_function: "b".into(),
            arguments: vec![],
            t_low: 0,
            t_high: 0,
        };
        let err = mesh.send_trigger("nowhere", trigger).await.unwrap_err();
        assert!(matches!(err, BusError::Unreachable(dest) if dest == "nowhere"));
    }

    #[test]
    fn pusher_cache_opens_once_per_destination() {
        let cache: PusherCache<u32> = PusherCache::new();
        let mut opens = 0;
        let a = cache.get_or_open("x", || {
            opens += 1;
            1
        });
        assert_eq!(a, 1);
        // Second access to the same destination must not call `open` again.
        let open_count_before = opens;
        let _ = cache.get_or_open("x", || {
            opens += 1;
            2
        });
        assert_eq!(opens, open_count_before);
        assert_eq!(cache.len(), 1);
    }
}
