// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Schedule planner: lays out a day of randomized, quota-respecting
//! slice allocations.
//!
//! The 24h window is divided into `slice_count` slices (the sum of the
//! per-work-item quotas). Each slice is assigned exactly one work-item
//! kind by drawing slices uniformly at random, without replacement, for
//! each kind in turn. Randomizing within the day spreads cluster load;
//! the per-node stagger on top of this lives in [`crate::dispatch`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One quantum of full-sync work, triggered at a slice boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    /// Deliberate no-op; holds a slice without exchanging anything.
    NoSync,
    /// Compare everything under the configured scope.
    AllSync,
    /// Compare objects modified in the trailing 24 hours.
    DaySync,
    /// Compare objects modified in the trailing hour.
    HourSync,
}

impl fmt::Display for WorkItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItemKind::NoSync => write!(f, "no_sync"),
            WorkItemKind::AllSync => write!(f, "all_sync"),
            WorkItemKind::DaySync => write!(f, "day_sync"),
            WorkItemKind::HourSync => write!(f, "hour_sync"),
        }
    }
}

/// Daily quota per work-item kind. The sum is the day's slice count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWants {
    pub no_sync: u32,
    pub all_sync: u32,
    pub day_sync: u32,
    pub hour_sync: u32,
}

impl ScheduleWants {
    /// Total slices in a day's plan.
    pub fn slice_count(&self) -> u32 {
        self.no_sync + self.all_sync + self.day_sync + self.hour_sync
    }

    /// The paused shape: every slice resolves to `NoSync`.
    pub fn paused(slice_count: u32) -> Self {
        Self {
            no_sync: slice_count,
            all_sync: 0,
            day_sync: 0,
            hour_sync: 0,
        }
    }

    /// Quotas in draw order.
    fn quotas(&self) -> [(WorkItemKind, u32); 4] {
        [
            (WorkItemKind::NoSync, self.no_sync),
            (WorkItemKind::AllSync, self.all_sync),
            (WorkItemKind::DaySync, self.day_sync),
            (WorkItemKind::HourSync, self.hour_sync),
        ]
    }
}

/// A slice index paired with the work-item kind that fires there.
/// Slice indices are 1-based and unique within a day's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub slice: u32,
    pub kind: WorkItemKind,
}

/// Lay out a full day of slice allocations.
///
/// Returns exactly `wants.slice_count()` allocations, sorted ascending
/// by slice, covering each slice index in `1..=slice_count` once, with
/// kind frequencies matching the quotas. The draw order (no-op, all,
/// day, hour) only shapes the random stream, not the distribution: any
/// uniform permutation of the kind multiset is an acceptable plan.
pub fn plan_day<R: Rng>(wants: &ScheduleWants, rng: &mut R) -> Vec<Allocation> {
    let slice_count = wants.slice_count();
    let mut open: Vec<u32> = (1..=slice_count).collect();
    let mut plan = Vec::with_capacity(slice_count as usize);

    for (kind, quota) in wants.quotas() {
        for _ in 0..quota {
            let picked = rng.gen_range(0..open.len());
            let slice = open.swap_remove(picked);
            plan.push(Allocation { slice, kind });
        }
    }

    plan.sort_by_key(|a| a.slice);
    plan
}
