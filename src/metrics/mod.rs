//! Prometheus metrics for the offline sync subsystem.
//!
//! - Queue metrics (records pushed, drained, compacted, corrupt lines)
//! - Connectivity metrics (probe results, state transitions, failure streak)
//! - Replay metrics (records replayed or re-queued, replay duration)

mod helpers;

pub use helpers::{encode_metrics, ConnectivityMetrics, QueueMetrics, ReplayMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "offline_sync";

lazy_static! {
    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Records durably appended to the queue file
    pub static ref QUEUE_PUSHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_pushed_total", METRIC_PREFIX),
        "Total records appended to the queue file"
    ).unwrap();

    /// Bytes appended to the queue file
    pub static ref QUEUE_BYTES_WRITTEN_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_bytes_written_total", METRIC_PREFIX),
        "Total bytes appended to the queue file"
    ).unwrap();

    /// Pushes that failed (I/O error or oversize record)
    pub static ref QUEUE_PUSH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_push_failures_total", METRIC_PREFIX),
        "Total pushes that could not be written"
    ).unwrap();

    /// Records returned by drains
    pub static ref QUEUE_DRAINED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_drained_total", METRIC_PREFIX),
        "Total records drained from the queue file"
    ).unwrap();

    /// Unparsable lines skipped during drains
    pub static ref QUEUE_CORRUPT_LINES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_corrupt_lines_total", METRIC_PREFIX),
        "Total unparsable lines skipped and dead-lettered"
    ).unwrap();

    /// Compaction runs by result
    pub static ref QUEUE_COMPACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_compactions_total", METRIC_PREFIX),
        "Total compaction runs",
        &["result"]
    ).unwrap();

    /// Records discarded by compaction
    pub static ref QUEUE_COMPACTED_RECORDS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_compacted_records_total", METRIC_PREFIX),
        "Total records discarded by compaction"
    ).unwrap();

    // ============================================================================
    // Connectivity Metrics
    // ============================================================================

    /// Probe outcomes
    pub static ref CONNECTIVITY_PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connectivity_probes_total", METRIC_PREFIX),
        "Total reachability probes by result",
        &["result"]
    ).unwrap();

    /// Online/offline transitions
    pub static ref CONNECTIVITY_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connectivity_transitions_total", METRIC_PREFIX),
        "Total connectivity transitions by new state",
        &["to"]
    ).unwrap();

    /// Current state (0=unknown, 1=online, 2=offline)
    pub static ref CONNECTIVITY_STATE: IntGauge = register_int_gauge!(
        format!("{}_connectivity_state", METRIC_PREFIX),
        "Current connectivity state (0=unknown, 1=online, 2=offline)"
    ).unwrap();

    /// Current consecutive probe failures
    pub static ref CONNECTIVITY_CONSECUTIVE_FAILURES: IntGauge = register_int_gauge!(
        format!("{}_connectivity_consecutive_failures", METRIC_PREFIX),
        "Current streak of failed probes"
    ).unwrap();

    /// Reconnect callback runs by result
    pub static ref RECONNECT_CALLBACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_reconnect_callbacks_total", METRIC_PREFIX),
        "Total reconnect callback invocations by result",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Replay Metrics
    // ============================================================================

    /// Records handled by replay, by outcome
    pub static ref REPLAY_RECORDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_replay_records_total", METRIC_PREFIX),
        "Total records handled by replay",
        &["outcome"]
    ).unwrap();

    /// Duration of a full replay pass
    pub static ref REPLAY_DURATION_MS: Histogram = register_histogram!(
        format!("{}_replay_duration_ms", METRIC_PREFIX),
        "Duration of a replay pass in milliseconds",
        vec![10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]
    ).unwrap();
}
