// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Repair decider: turns a key/clock divergence list into queue work.
//!
//! For each divergent key the engine reports, the sink's clock is
//! compared against the source's:
//!
//! - sink strictly dominates → the sink already holds a newer version;
//!   count it and move on (re-replicating would be wasted work).
//! - anything else (source ahead, concurrent, sink missing) → requeue
//!   the key on the local replication queue as `to_fetch`.
//!
//! Requeueing rather than pushing directly at the sink funnels changes
//! through the cluster's general replication path, so the fix fans out
//! to every destination cluster, not just the exchange's sink.

use crate::exchange::KeyDelta;
use crate::metrics;
use crate::queue::{QueueName, RepairEntry, RepairPayload, ReplQueue};
use crate::vclock::VectorClock;
use tracing::{debug, info, warn};

/// Statistics from one repair pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RepairStats {
    /// Divergent keys the engine delivered.
    pub deltas: usize,
    /// Keys where the sink was strictly ahead (logged only).
    pub sink_ahead: usize,
    /// Keys handed to the replication queue.
    pub requeued: usize,
    /// Whether the queue rejected the batch.
    pub queue_failed: bool,
}

/// The partition of a divergence list.
#[derive(Debug, Default)]
pub struct RepairPartition {
    pub repairs: Vec<RepairEntry>,
    pub sink_ahead: usize,
}

/// Does the sink's clock strictly dominate the source's?
///
/// A key with no source clock is sink-ahead by definition (including
/// the degenerate both-missing case, which the engine would not
/// normally deliver). A missing sink clock with a present source clock
/// never dominates.
fn sink_dominates(sink: Option<&VectorClock>, src: Option<&VectorClock>) -> bool {
    match (sink, src) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(sink), Some(src)) => sink.dominates(src),
    }
}

/// Decode a persisted clock, treating garbage as "no clock".
///
/// An undecodable clock can never be shown to dominate, so the key is
/// requeued; refreshing an object we could not reason about is the safe
/// direction.
fn decode_clock(bucket_key: (&str, &str), side: &'static str, bytes: &[u8]) -> Option<VectorClock> {
    match VectorClock::decode(bytes) {
        Ok(clock) => Some(clock),
        Err(e) => {
            warn!(
                bucket = bucket_key.0,
                key = bucket_key.1,
                side,
                error = %e,
                "Undecodable persisted clock, treating as absent"
            );
            None
        }
    }
}

/// Partition a divergence list into sink-ahead keys and repairs.
pub fn partition_deltas(deltas: Vec<KeyDelta>) -> RepairPartition {
    let mut partition = RepairPartition::default();

    for delta in deltas {
        let bucket_name = delta.bucket.to_string();
        let src = delta
            .src_clock
            .as_deref()
            .and_then(|b| decode_clock((&bucket_name, &delta.key), "source", b));
        let sink = delta
            .sink_clock
            .as_deref()
            .and_then(|b| decode_clock((&bucket_name, &delta.key), "sink", b));

        // Note: decode failure above collapses into the missing-clock
        // rules; a source whose clock we cannot read is still requeued.
        let src_present_but_unreadable = delta.src_clock.is_some() && src.is_none();
        if !src_present_but_unreadable && sink_dominates(sink.as_ref(), src.as_ref()) {
            debug!(
                bucket = %bucket_name,
                key = %delta.key,
                "Sink clock dominates source, no repair needed"
            );
            partition.sink_ahead += 1;
        } else {
            partition.repairs.push(RepairEntry {
                bucket: delta.bucket,
                key: delta.key,
                clock: delta.src_clock,
                payload: RepairPayload::ToFetch,
            });
        }
    }

    partition
}

/// Run the full repair decision for one exchange: partition the deltas
/// and hand the repairs to the replication queue.
pub async fn repair_deltas(
    queue: &dyn ReplQueue,
    queue_name: &QueueName,
    deltas: Vec<KeyDelta>,
) -> RepairStats {
    let total = deltas.len();
    info!(deltas = total, queue = %queue_name, "Repair decision starting");

    let partition = partition_deltas(deltas);
    let requeued = partition.repairs.len();

    info!(sink_ahead = partition.sink_ahead, "Keys where sink is already ahead");
    info!(to_requeue = requeued, "Keys to requeue for re-replication");
    metrics::record_repair_decision(partition.sink_ahead, requeued);

    let mut stats = RepairStats {
        deltas: total,
        sink_ahead: partition.sink_ahead,
        requeued,
        queue_failed: false,
    };

    if !partition.repairs.is_empty() {
        if let Err(e) = queue.enqueue(queue_name, partition.repairs).await {
            // Best-effort: the queue owns its own persistence and retry.
            warn!(queue = %queue_name, error = %e, "Replication queue rejected repair batch");
            metrics::record_queue_failure();
            stats.queue_failed = true;
        }
    }

    info!(
        deltas = stats.deltas,
        sink_ahead = stats.sink_ahead,
        requeued = stats.requeued,
        "Repair decision complete"
    );
    stats
}
