//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Exchange lifecycle (started, completed, crashed)
//! - Schedule behavior (plans drawn, slices skipped)
//! - Repair decisions (sink-ahead, requeued)
//! - Connectivity (ping failures)
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `fullsync_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an exchange being started.
pub fn record_exchange_started(kind: &str) {
    counter!("fullsync_exchanges_started_total", "kind" => kind.to_string()).increment(1);
}

/// Record an exchange completing, with its outcome and duration.
pub fn record_exchange_completed(outcome: &str, deltas: usize, duration: Duration) {
    counter!("fullsync_exchanges_completed_total", "outcome" => outcome.to_string()).increment(1);
    counter!("fullsync_exchange_deltas_total").increment(deltas as u64);
    histogram!("fullsync_exchange_duration_seconds").record(duration.as_secs_f64());
}

/// Record an exchange abandoned at the crash timeout.
pub fn record_exchange_crashed() {
    counter!("fullsync_exchanges_crashed_total").increment(1);
}

/// Record a completion arriving for an exchange already given up on.
pub fn record_phantom_completion() {
    counter!("fullsync_phantom_completions_total").increment(1);
}

/// Record a fresh day of slice allocations being planned.
pub fn record_schedule_planned(slices: usize) {
    counter!("fullsync_schedules_planned_total").increment(1);
    gauge!("fullsync_schedule_slices").set(slices as f64);
}

/// Record an overdue slice being skipped.
pub fn record_slice_skipped() {
    counter!("fullsync_slices_skipped_total").increment(1);
}

/// Record a work-item that was dropped before any exchange started.
pub fn record_sync_skipped(reason: &'static str) {
    counter!("fullsync_work_items_skipped_total", "reason" => reason).increment(1);
}

/// Record a ping failure against a cluster endpoint.
pub fn record_ping_failure(side: &str) {
    counter!("fullsync_ping_failures_total", "side" => side.to_string()).increment(1);
}

/// Record the repair decision counts for one exchange.
pub fn record_repair_decision(sink_ahead: usize, requeued: usize) {
    counter!("fullsync_sink_ahead_total").increment(sink_ahead as u64);
    counter!("fullsync_repairs_requeued_total").increment(requeued as u64);
}

/// Record a replication-queue enqueue failure.
pub fn record_queue_failure() {
    counter!("fullsync_queue_failures_total").increment(1);
}

/// Record whether the schedule is paused.
pub fn set_paused(paused: bool) {
    gauge!("fullsync_paused").set(if paused { 1.0 } else { 0.0 });
}
