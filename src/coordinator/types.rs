// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator message and schedule-state types.
//!
//! Everything the coordinator mutates is serialized through one mailbox;
//! [`Message`] is the full vocabulary. [`ScheduleState`] carries the
//! day's plan and the pause bookkeeping, kept separate from the actor so
//! its transitions can be unit-tested without a runtime.

use crate::config::{BucketId, Endpoint};
use crate::dispatch::DAY_SECONDS;
use crate::error::{FullSyncError, Result};
use crate::exchange::{ExchangeId, ExchangeReport};
use crate::schedule::{Allocation, ScheduleWants, WorkItemKind};
use tokio::sync::oneshot;

/// Mailbox messages, control calls and self-sends alike.
pub(crate) enum Message {
    /// A slice timer fired; turn it into a work-item cast.
    WorkItem { kind: WorkItemKind },

    /// Run one work-item now. `reply` is `Some` for external requesters
    /// wanting the exchange's final report.
    Process {
        kind: WorkItemKind,
        reply: Option<oneshot::Sender<ExchangeReport>>,
        now: u64,
    },

    /// An exchange finished (posted by the exchange's completion sink).
    ReplyComplete { id: ExchangeId },

    /// Swap the schedule for all no-ops until resumed.
    Pause { reply: oneshot::Sender<Result<()>> },

    /// Restore the schedule saved by pause.
    Resume { reply: oneshot::Sender<Result<()>> },

    /// Overwrite the remote (sink) endpoint.
    SetSink {
        endpoint: Endpoint,
        reply: oneshot::Sender<()>,
    },

    /// Overwrite the local (source) endpoint.
    SetSource {
        endpoint: Endpoint,
        reply: oneshot::Sender<()>,
    },

    /// Switch scope to full key-space comparison under these n-vals.
    SetAllSync {
        local_nval: u32,
        remote_nval: u32,
        reply: oneshot::Sender<()>,
    },

    /// Switch scope to a rotating bucket list.
    SetBucketSync {
        buckets: Vec<BucketId>,
        reply: oneshot::Sender<()>,
    },
}

/// The schedule half of the coordinator's state.
#[derive(Debug, Clone)]
pub(crate) struct ScheduleState {
    /// Effective quotas; swapped for all-NoSync while paused.
    pub wants: ScheduleWants,
    /// The quotas saved by `pause`, restored by `resume`.
    pub backup_wants: Option<ScheduleWants>,
    /// Remaining allocations for the current day, strictly increasing
    /// in slice index.
    pub pending: Vec<Allocation>,
    /// Day boundary the pending allocations are relative to.
    pub schedule_start: u64,
    pub paused: bool,
}

impl ScheduleState {
    /// Fresh state: no plan yet, with the day boundary set one day back
    /// so the first dispatch plans a day starting at `now`.
    pub fn new(wants: ScheduleWants, now: u64) -> Self {
        Self {
            wants,
            backup_wants: None,
            pending: Vec::new(),
            schedule_start: now.saturating_sub(DAY_SECONDS),
            paused: false,
        }
    }

    /// Pause: save the wants and make every remaining slice a no-op.
    ///
    /// The in-place rewrite keeps slice indices (and therefore fire
    /// times) intact, so pacing is unchanged; only the work disappears.
    pub fn pause(&mut self) -> Result<()> {
        if self.paused {
            return Err(FullSyncError::AlreadyPaused);
        }
        self.backup_wants = Some(self.wants);
        self.wants = ScheduleWants::paused(self.wants.slice_count());
        for alloc in &mut self.pending {
            alloc.kind = WorkItemKind::NoSync;
        }
        self.paused = true;
        Ok(())
    }

    /// Resume: restore the saved wants without re-planning mid-day.
    ///
    /// The already-rewritten pending list drains as no-ops; the next
    /// 24h boundary picks up the restored quotas.
    pub fn resume(&mut self) -> Result<()> {
        if !self.paused {
            return Err(FullSyncError::NotPaused);
        }
        if let Some(backup) = self.backup_wants.take() {
            self.wants = backup;
        }
        self.paused = false;
        Ok(())
    }

    /// Adopt new quotas after a scope switch. While paused the new
    /// quotas land in the backup, so resume restores the reconfigured
    /// schedule rather than the pre-switch one.
    pub fn set_wants(&mut self, wants: ScheduleWants) {
        if self.paused {
            self.backup_wants = Some(wants);
        } else {
            self.wants = wants;
        }
    }
}
