// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Slice dispatcher: picks the next due slice and computes how long to
//! wait for it.
//!
//! Slices are evenly spaced across the 24h window starting at the
//! schedule's day boundary. Within a slice, nodes are staggered by their
//! ordinal in the cluster so that N nodes running the same schedule do
//! not all fire at the same instant:
//!
//! ```text
//! slice_seconds   = 86_400 / slice_count
//! per_node_offset = (ordinal - 1) * (slice_seconds / node_count)
//! fire_time(k)    = schedule_start + per_node_offset + k * slice_seconds
//! ```
//!
//! Overdue slices are skipped rather than fired back-to-back: catching
//! up would cause synchronized bursts across nodes and flood the
//! exchange engine. Skipped slices are individually logged and counted.
//!
//! All times are plain u64 seconds since the Unix epoch; `now` enters
//! as a parameter so the dispatcher stays a pure function.

use crate::metrics;
use crate::schedule::{plan_day, Allocation, ScheduleWants, WorkItemKind};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

/// Seconds in the scheduling window.
pub const DAY_SECONDS: u64 = 86_400;

/// This node's position among the cluster's up-nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// 1-based position in the sorted list of up-nodes.
    pub ordinal: u32,
    /// Number of up-nodes.
    pub count: u32,
}

impl NodeInfo {
    /// A single-node cluster: no stagger.
    pub fn solo() -> Self {
        Self {
            ordinal: 1,
            count: 1,
        }
    }
}

/// The dispatcher's decision: what to run next and when.
#[derive(Debug)]
pub struct SliceStep {
    /// Work-item to trigger when the wait elapses.
    pub kind: WorkItemKind,
    /// Time until this node's fire time for the chosen slice.
    pub wait: Duration,
    /// Allocations still pending after this one, strictly increasing in
    /// slice index.
    pub pending: Vec<Allocation>,
    /// Day boundary of the plan the chosen slice belongs to. Advances by
    /// exactly [`DAY_SECONDS`] each time the pending list is replanned.
    pub schedule_start: u64,
}

/// Pick the next work-item to arm.
///
/// Pops pending allocations until one fires in the future, replanning a
/// fresh day (and advancing `schedule_start` by exactly 24h) whenever
/// the pending list empties. Overdue slices are logged and skipped.
pub fn next_work_item<R: Rng>(
    mut pending: Vec<Allocation>,
    wants: &ScheduleWants,
    mut schedule_start: u64,
    node_info: NodeInfo,
    now: u64,
    rng: &mut R,
) -> SliceStep {
    // Config validation enforces a non-empty schedule; the max(1) guards
    // the arithmetic if a caller slips past it.
    let slice_count = u64::from(wants.slice_count().max(1));
    let node_count = u64::from(node_info.count.max(1));
    let slice_seconds = DAY_SECONDS / slice_count;
    let per_node_offset = u64::from(node_info.ordinal.saturating_sub(1)) * (slice_seconds / node_count);

    loop {
        if pending.is_empty() {
            pending = plan_day(wants, rng);
            schedule_start += DAY_SECONDS;
            debug!(
                slice_count,
                schedule_start,
                "Planned a fresh day of slice allocations"
            );
            metrics::record_schedule_planned(pending.len());
            continue;
        }

        let head = pending.remove(0);
        let fire_time = schedule_start + per_node_offset + u64::from(head.slice) * slice_seconds;

        if fire_time > now {
            return SliceStep {
                kind: head.kind,
                wait: Duration::from_secs(fire_time - now),
                pending,
                schedule_start,
            };
        }

        info!(
            slice = head.slice,
            kind = %head.kind,
            overdue_secs = now - fire_time,
            "Slice fire time already passed, skipping"
        );
        metrics::record_slice_skipped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const NOW: u64 = 1_700_000_000;

    fn wants_100_no_sync() -> ScheduleWants {
        ScheduleWants {
            no_sync: 100,
            all_sync: 0,
            day_sync: 0,
            hour_sync: 0,
        }
    }

    #[test]
    fn test_empty_pending_replans_and_advances_day() {
        let wants = wants_100_no_sync();
        let mut rng = StdRng::seed_from_u64(1);

        let step = next_work_item(
            vec![],
            &wants,
            NOW - DAY_SECONDS,
            NodeInfo { ordinal: 1, count: 8 },
            NOW,
            &mut rng,
        );

        assert_eq!(step.kind, WorkItemKind::NoSync);
        assert!(step.schedule_start >= NOW);
        assert_eq!(step.schedule_start, (NOW - DAY_SECONDS) + DAY_SECONDS);
        assert!(step.wait > Duration::ZERO);
        // Head consumed from a 100-slice plan
        assert_eq!(step.pending.len(), 99);
    }

    #[test]
    fn test_node_stagger_is_monotonic_in_ordinal() {
        let wants = wants_100_no_sync();

        let wait_for = |ordinal: u32| {
            let mut rng = StdRng::seed_from_u64(1);
            next_work_item(
                vec![],
                &wants,
                NOW - DAY_SECONDS,
                NodeInfo { ordinal, count: 8 },
                NOW,
                &mut rng,
            )
            .wait
        };

        let w1 = wait_for(1);
        let w2 = wait_for(2);
        let w7 = wait_for(7);

        assert!(w2 > w1);
        assert!(w7 > w2);
        // slice_seconds = 864, so each ordinal adds 864 / 8 = 108s
        assert_eq!(w2 - w1, Duration::from_secs(108));
        assert_eq!(w7 - w2, Duration::from_secs(5 * 108));
    }

    #[test]
    fn test_overdue_slices_are_skipped_not_fired() {
        let wants = ScheduleWants {
            no_sync: 2,
            all_sync: 1,
            day_sync: 0,
            hour_sync: 0,
        };
        // slice_seconds = 28_800. Slices 1 and 2 are overdue at
        // schedule_start + 60_000; slice 3 is still ahead.
        let pending = vec![
            Allocation { slice: 1, kind: WorkItemKind::NoSync },
            Allocation { slice: 2, kind: WorkItemKind::AllSync },
            Allocation { slice: 3, kind: WorkItemKind::NoSync },
        ];
        let schedule_start = NOW - 60_000;
        let mut rng = StdRng::seed_from_u64(9);

        let step = next_work_item(
            pending,
            &wants,
            schedule_start,
            NodeInfo::solo(),
            NOW,
            &mut rng,
        );

        assert_eq!(step.kind, WorkItemKind::NoSync);
        assert!(step.pending.is_empty());
        // Skipping does not move the day boundary
        assert_eq!(step.schedule_start, schedule_start);
        assert_eq!(step.wait, Duration::from_secs(3 * 28_800 - 60_000));
    }

    #[test]
    fn test_future_head_is_returned_with_exact_wait() {
        let wants = ScheduleWants {
            no_sync: 23,
            all_sync: 1,
            day_sync: 0,
            hour_sync: 0,
        };
        let pending = vec![Allocation { slice: 5, kind: WorkItemKind::AllSync }];
        let schedule_start = NOW - 3_600;
        let mut rng = StdRng::seed_from_u64(9);

        let step = next_work_item(
            pending,
            &wants,
            schedule_start,
            NodeInfo::solo(),
            NOW,
            &mut rng,
        );

        // slice_seconds = 3_600; slice 5 fires at start + 18_000
        assert_eq!(step.kind, WorkItemKind::AllSync);
        assert_eq!(step.wait, Duration::from_secs(5 * 3_600 - 3_600));
        assert_eq!(step.schedule_start, schedule_start);
    }

    #[test]
    fn test_far_past_schedule_advances_multiple_days() {
        let wants = wants_100_no_sync();
        let mut rng = StdRng::seed_from_u64(2);
        let start = NOW - 3 * DAY_SECONDS;

        let step = next_work_item(
            vec![],
            &wants,
            start,
            NodeInfo::solo(),
            NOW,
            &mut rng,
        );

        // Replanning repeats until a slice lands in the future, each
        // time advancing the boundary by exactly one day.
        assert_eq!((step.schedule_start - start) % DAY_SECONDS, 0);
        assert!(step.schedule_start + DAY_SECONDS > NOW);
        assert!(step.wait > Duration::ZERO);
    }

    #[test]
    fn test_ordinal_stagger_never_exceeds_slice_width() {
        let wants = wants_100_no_sync();
        let mut a = StdRng::seed_from_u64(5);
        let mut b = StdRng::seed_from_u64(5);

        let first = next_work_item(
            vec![],
            &wants,
            NOW - DAY_SECONDS,
            NodeInfo { ordinal: 1, count: 8 },
            NOW,
            &mut a,
        );
        let last = next_work_item(
            vec![],
            &wants,
            NOW - DAY_SECONDS,
            NodeInfo { ordinal: 8, count: 8 },
            NOW,
            &mut b,
        );

        // Same seed, same plan: the only difference is the stagger, and
        // the whole spread stays inside one slice width.
        let spread = last.wait - first.wait;
        assert!(spread < Duration::from_secs(864));
    }
}
