#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **dagflow-metrics** – aggregates per-DAG end-to-end latency, reported
//! back to the scheduler on completion.
//!
//! A DAG's latency is recorded exactly once, at whichever hop turns out to
//! be its sink, as `now - schedule.start_time`. Samples accumulate until
//! drained into a [`MetricsReport`] for delivery.

use std::collections::BTreeMap;

use dagflow_bus::TriggerSink;
use dagflow_types::Schedule;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Errors raised while aggregating or delivering metrics.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to encode a report for delivery.
    #[error("failed to encode metrics report: {0}")]
    Encode(#[from] dagflow_serde::SerdeError),
    /// Delivery to the scheduler's metrics endpoint failed.
    #[error("failed to deliver metrics report: {0}")]
    Delivery(#[from] dagflow_bus::BusError),
}

/// Summary statistics over a set of recorded latencies, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Number of samples the statistics were computed over.
    pub count: usize,
    /// 50th percentile latency.
    pub p50: u64,
    /// 99th percentile latency.
    pub p99: u64,
    /// Arithmetic mean latency.
    pub mean: u64,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<u64>) -> Self {
        samples.sort_unstable();
        let count = samples.len();
        let percentile = |p: f64| -> u64 {
            if samples.is_empty() {
                return 0;
            }
            let idx = (((count - 1) as f64) * p).round() as usize;
            samples[idx.min(count - 1)]
        };
        let mean = if count == 0 { 0 } else { samples.iter().sum::<u64>() / count as u64 };
        Self { count, p50: percentile(0.50), p99: percentile(0.99), mean }
    }
}

/// A flushed batch of per-DAG latency statistics, sent to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Latency statistics, keyed by DAG name.
    pub dag_latencies: BTreeMap<String, LatencyStats>,
}

/// Accumulates per-DAG end-to-end latency samples between flushes.
#[derive(Default)]
pub struct DagRuntimeRecorder {
    samples: DashMap<String, Vec<u64>>,
}

impl DagRuntimeRecorder {
    /// A recorder with no accumulated samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed DAG's end-to-end latency. Call this only at a
    /// sink hop, and only for a schedule whose step outcome reported
    /// success — a `MultiExec` abort never completes a DAG.
    pub fn record(&self, dag_name: &str, schedule: &Schedule) {
        let elapsed = chrono::Utc::now().signed_duration_since(schedule.start_time);
        let millis = elapsed.num_milliseconds().max(0) as u64;
        self.samples.entry(dag_name.to_string()).or_default().push(millis);
    }

    /// Flush every accumulated sample into a [`MetricsReport`], resetting
    /// the recorder's internal state.
    pub fn drain_report(&self) -> MetricsReport {
        let mut dag_latencies = BTreeMap::new();
        for mut entry in self.samples.iter_mut() {
            let samples = std::mem::take(entry.value_mut());
            if !samples.is_empty() {
                dag_latencies.insert(entry.key().clone(), LatencyStats::from_samples(samples));
            }
        }
        self.samples.retain(|_, v| !v.is_empty());
        MetricsReport { dag_latencies }
    }
}

/// Deliver `report` to the scheduler's metrics endpoint at `destination`.
/// Shares `TriggerSink::send_response`'s fire-and-forget delivery rather
/// than adding a dedicated transport trait, since both are "serialize and
/// push to an address" operations.
pub async fn send_metrics_report(
    sink: &dyn TriggerSink,
    destination: &str,
    report: &MetricsReport,
) -> Result<(), MetricsError> {
    let bytes = dagflow_serde::serialize(report)?;
    sink.send_response(destination, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagflow_bus::InMemoryMesh;
    use dagflow_types::{Consistency, Dag};

    fn schedule_started(millis_ago: i64) -> Schedule {
        Schedule {
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
            start_time: chrono::Utc::now() - chrono::Duration::milliseconds(millis_ago),
        }
    }

    #[test]
    fn record_and_drain_computes_stats() {
        let recorder = DagRuntimeRecorder::new();
        for ms in [10, 20, 30, 40, 50] {
            recorder.record("pipeline", &schedule_started(ms));
        }

        let report = recorder.drain_report();
        let stats = report.dag_latencies["pipeline"];
        assert_eq!(stats.count, 5);
        assert!(stats.mean >= 29 && stats.mean <= 31, "mean was {}", stats.mean);
    }

    #[test]
    fn drain_resets_accumulated_samples() {
        let recorder = DagRuntimeRecorder::new();
        recorder.record("once", &schedule_started(5));
        let first = recorder.drain_report();
        assert_eq!(first.dag_latencies["once"].count, 1);

        let second = recorder.drain_report();
        assert!(second.dag_latencies.is_empty());
    }

    #[tokio::test]
    async fn send_metrics_report_delivers_through_trigger_sink() {
        let mesh = InMemoryMesh::new();
        let mut rx = mesh.register("scheduler-metrics");

        let mut report = MetricsReport::default();
        report.dag_latencies.insert("d".into(), LatencyStats { count: 1, p50: 5, p99: 5, mean: 5 });
        send_metrics_report(&mesh, "scheduler-metrics", &report).await.unwrap();

        match rx.try_recv().unwrap() {
            dagflow_bus::Envelope::Response(bytes) => {
                let decoded: MetricsReport = dagflow_serde::deserialize(&bytes).unwrap();
                assert_eq!(decoded, report);
            }
            _ => panic!("expected a response envelope"),
        }
    }
}
