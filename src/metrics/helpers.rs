//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIVITY_CONSECUTIVE_FAILURES, CONNECTIVITY_PROBES_TOTAL, CONNECTIVITY_STATE,
    CONNECTIVITY_TRANSITIONS_TOTAL, QUEUE_BYTES_WRITTEN_TOTAL, QUEUE_COMPACTED_RECORDS_TOTAL,
    QUEUE_COMPACTIONS_TOTAL, QUEUE_CORRUPT_LINES_TOTAL, QUEUE_DRAINED_TOTAL,
    QUEUE_PUSHED_TOTAL, QUEUE_PUSH_FAILURES_TOTAL, RECONNECT_CALLBACKS_TOTAL,
    REPLAY_DURATION_MS, REPLAY_RECORDS_TOTAL,
};
use crate::connectivity::ConnectivityState;

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a durable append of `bytes` bytes
    pub fn record_pushed(bytes: u64) {
        QUEUE_PUSHED_TOTAL.inc();
        QUEUE_BYTES_WRITTEN_TOTAL.inc_by(bytes);
    }

    pub fn record_push_failed() {
        QUEUE_PUSH_FAILURES_TOTAL.inc();
    }

    /// Record a drain and the number of lines it had to skip
    pub fn record_drained(records: u64, corrupt: u64) {
        QUEUE_DRAINED_TOTAL.inc_by(records);
        if corrupt > 0 {
            QUEUE_CORRUPT_LINES_TOTAL.inc_by(corrupt);
        }
    }

    pub fn record_compaction(dropped: u64) {
        QUEUE_COMPACTIONS_TOTAL.with_label_values(&["success"]).inc();
        QUEUE_COMPACTED_RECORDS_TOTAL.inc_by(dropped);
    }

    pub fn record_compaction_failed() {
        QUEUE_COMPACTIONS_TOTAL.with_label_values(&["failure"]).inc();
    }
}

/// Helper struct for recording connectivity metrics
pub struct ConnectivityMetrics;

impl ConnectivityMetrics {
    /// Record a probe outcome and the resulting failure streak
    pub fn record_probe(online: bool, consecutive_failures: u32) {
        let result = if online { "success" } else { "failure" };
        CONNECTIVITY_PROBES_TOTAL.with_label_values(&[result]).inc();
        CONNECTIVITY_CONSECUTIVE_FAILURES.set(i64::from(consecutive_failures));
    }

    /// Record a transition into `state`
    pub fn record_transition(state: ConnectivityState) {
        CONNECTIVITY_TRANSITIONS_TOTAL
            .with_label_values(&[state.as_str()])
            .inc();
    }

    pub fn set_state(state: ConnectivityState) {
        CONNECTIVITY_STATE.set(state as i64);
    }

    pub fn record_callback(success: bool) {
        let result = if success { "success" } else { "failure" };
        RECONNECT_CALLBACKS_TOTAL.with_label_values(&[result]).inc();
    }
}

/// Helper struct for recording replay metrics
pub struct ReplayMetrics;

impl ReplayMetrics {
    pub fn record_replayed(count: u64) {
        REPLAY_RECORDS_TOTAL.with_label_values(&["replayed"]).inc_by(count);
    }

    pub fn record_requeued(count: u64) {
        REPLAY_RECORDS_TOTAL.with_label_values(&["requeued"]).inc_by(count);
    }

    pub fn record_duration_ms(duration_ms: u64) {
        REPLAY_DURATION_MS.observe(duration_ms as f64);
    }
}
