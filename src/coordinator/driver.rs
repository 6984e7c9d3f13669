// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exchange driver: turns one work-item into one running exchange.
//!
//! Scope and work-item pick the exchange parameters:
//!
//! | Scope x WorkItem | Reference | Tree | Window | Bucket list |
//! |---|---|---|---|---|
//! | All x AllSync | full, per-side n-vals | cached | - | - |
//! | Bucket x AllSync | partial | large | none | rotated |
//! | Bucket x DaySync | partial | medium | trailing 24h | rotated |
//! | Bucket x HourSync | partial | small | trailing hour | rotated |
//! | All x Day/HourSync | rejected | - | - | - |
//!
//! Tree size scales with the time window: larger windows mean more
//! potential divergence per segment, so a bigger tree reduces false
//! positives; smaller windows with tighter trees amortize less work per
//! exchange.
//!
//! The driver rotates the bucket list before trying either cluster, so
//! an unreachable peer still advances the rotation. Both sides are
//! pinged before the engine is started; a failed ping skips the
//! work-item and leaves retrying to a later slice.

use crate::client::{ClientFactory, HashMethod, KeyRange, TreeSize};
use crate::config::{Endpoint, SyncScope};
use crate::exchange::{
    ClusterQuerySender, CompletionSink, ExchangeEngine, ExchangeId, ExchangeOutcome,
    ExchangeRef, ExchangeReport, ExchangeRequest, KeyDelta, QuerySender, RangeFilter, RepairSink,
};
use crate::metrics;
use crate::queue::{QueueName, ReplQueue};
use crate::repair;
use crate::schedule::WorkItemKind;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::types::Message;

/// Trailing window widths in seconds.
const HOUR_SECONDS: u64 = 3_600;
const DAY_WINDOW_SECONDS: u64 = 86_400;

/// What happened to a dispatched work-item, deciding the next deadline.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DriveOutcome {
    /// An exchange is running; arm the crash timeout.
    Started(ExchangeId),
    /// Nothing was exchanged (no-op or unreachable cluster); arm the
    /// loop timeout.
    Skipped,
    /// The scope/work-item combination is invalid; arm the initial
    /// timeout while the operator sorts the configuration out.
    Invalid,
}

/// Capability handles the driver needs, borrowed from the coordinator.
pub(crate) struct DriveContext<'a> {
    pub engine: &'a Arc<dyn ExchangeEngine>,
    pub clients: &'a Arc<dyn ClientFactory>,
    pub queue: &'a Arc<dyn ReplQueue>,
    pub queue_name: &'a QueueName,
    pub local_endpoint: &'a Endpoint,
    pub remote_endpoint: &'a Endpoint,
    pub mailbox: &'a mpsc::UnboundedSender<Message>,
}

/// Drive one work-item: derive the exchange parameters, check both
/// clusters are reachable, and start the exchange.
pub(crate) async fn drive_work_item(
    scope: &mut SyncScope,
    ctx: DriveContext<'_>,
    kind: WorkItemKind,
    reply: Option<oneshot::Sender<ExchangeReport>>,
    now: u64,
) -> DriveOutcome {
    if kind == WorkItemKind::NoSync {
        debug!("No-op slice, nothing to exchange");
        answer(reply, ExchangeOutcome::Skipped);
        return DriveOutcome::Skipped;
    }

    let reference = match exchange_reference(scope, kind, now) {
        Some(reference) => reference,
        None => {
            warn!(
                kind = %kind,
                "Work-item is not valid under the current scope, skipping"
            );
            metrics::record_sync_skipped("invalid_work_item");
            answer(reply, ExchangeOutcome::Skipped);
            return DriveOutcome::Invalid;
        }
    };

    // Remote first: no point holding a local client if the peer is down.
    let remote_api = match open_and_ping(ctx.clients, ctx.remote_endpoint, "remote").await {
        Ok(api) => api,
        Err(()) => {
            answer(reply, ExchangeOutcome::Skipped);
            return DriveOutcome::Skipped;
        }
    };
    let local_api = match open_and_ping(ctx.clients, ctx.local_endpoint, "local").await {
        Ok(api) => api,
        Err(()) => {
            answer(reply, ExchangeOutcome::Skipped);
            return DriveOutcome::Skipped;
        }
    };

    let (local_nval, remote_nval) = match &reference {
        ExchangeRef::Full {
            local_nval,
            remote_nval,
        } => (Some(*local_nval), Some(*remote_nval)),
        ExchangeRef::Partial { .. } => (None, None),
    };

    let id = ExchangeId::new();
    let request = ExchangeRequest {
        id,
        reference,
        local: Arc::new(ClusterQuerySender::new(local_api, local_nval)) as Arc<dyn QuerySender>,
        remote: Arc::new(ClusterQuerySender::new(remote_api, remote_nval)) as Arc<dyn QuerySender>,
        repair: Arc::new(QueueRepairSink {
            queue: Arc::clone(ctx.queue),
            queue_name: ctx.queue_name.clone(),
        }),
        completion: Arc::new(CompletionRelay {
            id,
            requester: Mutex::new(reply),
            mailbox: ctx.mailbox.clone(),
            started: Instant::now(),
        }),
    };

    match ctx.engine.start(request).await {
        Ok(started) => {
            info!(exchange_id = %started, kind = %kind, "Exchange started");
            metrics::record_exchange_started(&kind.to_string());
            DriveOutcome::Started(started)
        }
        Err(e) => {
            warn!(kind = %kind, error = %e, "Exchange engine refused to start exchange");
            DriveOutcome::Skipped
        }
    }
}

/// Derive the exchange reference for a scope/work-item pair, rotating
/// the bucket list as a side effect. `None` means the pair is invalid.
fn exchange_reference(scope: &mut SyncScope, kind: WorkItemKind, now: u64) -> Option<ExchangeRef> {
    match scope {
        SyncScope::All {
            local_nval,
            remote_nval,
        } => match kind {
            WorkItemKind::AllSync => Some(ExchangeRef::Full {
                local_nval: *local_nval,
                remote_nval: *remote_nval,
            }),
            // Windowed comparisons need a bucket reference
            _ => None,
        },
        SyncScope::Bucket { buckets } => {
            if buckets.is_empty() {
                return None;
            }
            let bucket = buckets.remove(0);
            buckets.push(bucket.clone());

            let (tree_size, modified_range) = match kind {
                WorkItemKind::AllSync => (TreeSize::Large, None),
                WorkItemKind::DaySync => (
                    TreeSize::Medium,
                    Some(crate::client::ModifiedRange {
                        low: now.saturating_sub(DAY_WINDOW_SECONDS),
                        high: now,
                    }),
                ),
                WorkItemKind::HourSync => (
                    TreeSize::Small,
                    Some(crate::client::ModifiedRange {
                        low: now.saturating_sub(HOUR_SECONDS),
                        high: now,
                    }),
                ),
                WorkItemKind::NoSync => return None,
            };

            Some(ExchangeRef::Partial {
                filter: RangeFilter {
                    bucket,
                    key_range: KeyRange::All,
                    tree_size,
                    modified_range,
                    hash_method: HashMethod::PreHash,
                },
            })
        }
        SyncScope::Disabled => None,
    }
}

async fn open_and_ping(
    clients: &Arc<dyn ClientFactory>,
    endpoint: &Endpoint,
    side: &'static str,
) -> std::result::Result<Arc<dyn crate::client::ClusterApi>, ()> {
    let api = match clients.open(endpoint) {
        Ok(api) => api,
        Err(e) => {
            warn!(side, endpoint = %endpoint, error = %e, "Could not build cluster client");
            metrics::record_ping_failure(side);
            return Err(());
        }
    };
    if let Err(e) = api.ping().await {
        warn!(side, endpoint = %endpoint, error = %e, "Cluster did not answer ping, skipping work-item");
        metrics::record_ping_failure(side);
        return Err(());
    }
    Ok(api)
}

fn answer(reply: Option<oneshot::Sender<ExchangeReport>>, outcome: ExchangeOutcome) {
    if let Some(tx) = reply {
        let _ = tx.send(ExchangeReport {
            id: ExchangeId::new(),
            outcome,
            deltas: 0,
        });
    }
}

/// Repair sink handing the engine's divergence list to the replication
/// queue through the repair decider.
struct QueueRepairSink {
    queue: Arc<dyn ReplQueue>,
    queue_name: QueueName,
}

impl RepairSink for QueueRepairSink {
    fn repair(&self, deltas: Vec<KeyDelta>) -> crate::exchange::BoxFuture<'_, ()> {
        Box::pin(async move {
            repair::repair_deltas(self.queue.as_ref(), &self.queue_name, deltas).await;
            Ok(())
        })
    }
}

/// Completion sink: forwards the report to the original requester (when
/// there is one) and posts `ReplyComplete` back into the coordinator
/// mailbox so the loop drops back to its normal post-action wait.
struct CompletionRelay {
    id: ExchangeId,
    requester: Mutex<Option<oneshot::Sender<ExchangeReport>>>,
    mailbox: mpsc::UnboundedSender<Message>,
    started: Instant,
}

impl CompletionSink for CompletionRelay {
    fn completed(&self, report: ExchangeReport) {
        metrics::record_exchange_completed(
            &report.outcome.to_string(),
            report.deltas,
            self.started.elapsed(),
        );

        let requester = self
            .requester
            .lock()
            .map(|mut slot| slot.take())
            .unwrap_or(None);
        if let Some(tx) = requester {
            let _ = tx.send(report);
        }

        if self.mailbox.send(Message::ReplyComplete { id: report.id }).is_err() {
            debug!(exchange_id = %report.id, "Coordinator gone, dropping exchange completion");
        }
    }
}

impl Drop for CompletionRelay {
    /// A requester is always answered, even when the engine errors out
    /// of `start()` (or drops its callbacks) without ever calling
    /// `completed()`. After a normal completion the requester slot is
    /// already empty and this is a no-op.
    fn drop(&mut self) {
        let requester = self
            .requester
            .get_mut()
            .map(|slot| slot.take())
            .unwrap_or(None);
        if let Some(tx) = requester {
            debug!(exchange_id = %self.id, "Exchange dropped without completing, answering requester");
            let _ = tx.send(ExchangeReport {
                id: self.id,
                outcome: ExchangeOutcome::Aborted,
                deltas: 0,
            });
        }
    }
}

// Driver behavior is covered through the coordinator integration tests
// in tests/coordination.rs; the parameter table is unit-tested here.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BucketId;

    const NOW: u64 = 1_700_000_000;

    fn bucket_scope(names: &[&str]) -> SyncScope {
        SyncScope::Bucket {
            buckets: names.iter().map(|n| BucketId::untyped(*n)).collect(),
        }
    }

    fn bucket_names(scope: &SyncScope) -> Vec<String> {
        match scope {
            SyncScope::Bucket { buckets } => buckets.iter().map(|b| b.name.clone()).collect(),
            _ => panic!("not a bucket scope"),
        }
    }

    #[test]
    fn test_all_scope_all_sync_uses_configured_nvals() {
        let mut scope = SyncScope::All {
            local_nval: 3,
            remote_nval: 1,
        };
        let reference = exchange_reference(&mut scope, WorkItemKind::AllSync, NOW).unwrap();
        assert_eq!(
            reference,
            ExchangeRef::Full {
                local_nval: 3,
                remote_nval: 1
            }
        );
    }

    #[test]
    fn test_all_scope_rejects_windowed_work_items() {
        let mut scope = SyncScope::All {
            local_nval: 3,
            remote_nval: 3,
        };
        assert!(exchange_reference(&mut scope, WorkItemKind::DaySync, NOW).is_none());
        assert!(exchange_reference(&mut scope, WorkItemKind::HourSync, NOW).is_none());
    }

    #[test]
    fn test_bucket_all_sync_builds_large_unwindowed_filter() {
        let mut scope = bucket_scope(&["a", "b"]);
        let reference = exchange_reference(&mut scope, WorkItemKind::AllSync, NOW).unwrap();

        match reference {
            ExchangeRef::Partial { filter } => {
                assert_eq!(filter.bucket, BucketId::untyped("a"));
                assert_eq!(filter.tree_size, TreeSize::Large);
                assert_eq!(filter.key_range, KeyRange::All);
                assert_eq!(filter.modified_range, None);
                assert_eq!(filter.hash_method, HashMethod::PreHash);
            }
            other => panic!("expected partial reference, got {:?}", other),
        }
    }

    #[test]
    fn test_bucket_hour_sync_builds_small_hour_window() {
        let mut scope = bucket_scope(&["a"]);
        let reference = exchange_reference(&mut scope, WorkItemKind::HourSync, NOW).unwrap();

        match reference {
            ExchangeRef::Partial { filter } => {
                assert_eq!(filter.tree_size, TreeSize::Small);
                let window = filter.modified_range.unwrap();
                assert_eq!(window.low, NOW - 3_600);
                assert_eq!(window.high, NOW);
            }
            other => panic!("expected partial reference, got {:?}", other),
        }
    }

    #[test]
    fn test_bucket_day_sync_builds_medium_day_window() {
        let mut scope = bucket_scope(&["a"]);
        let reference = exchange_reference(&mut scope, WorkItemKind::DaySync, NOW).unwrap();

        match reference {
            ExchangeRef::Partial { filter } => {
                assert_eq!(filter.tree_size, TreeSize::Medium);
                let window = filter.modified_range.unwrap();
                assert_eq!(window.low, NOW - 86_400);
                assert_eq!(window.high, NOW);
            }
            other => panic!("expected partial reference, got {:?}", other),
        }
    }

    #[test]
    fn test_bucket_rotation_head_to_tail() {
        let mut scope = bucket_scope(&["a", "b", "c"]);

        exchange_reference(&mut scope, WorkItemKind::AllSync, NOW).unwrap();
        assert_eq!(bucket_names(&scope), vec!["b", "c", "a"]);

        exchange_reference(&mut scope, WorkItemKind::HourSync, NOW).unwrap();
        assert_eq!(bucket_names(&scope), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_single_bucket_rotation_is_stable() {
        let mut scope = bucket_scope(&["only"]);
        let reference = exchange_reference(&mut scope, WorkItemKind::AllSync, NOW).unwrap();
        assert!(matches!(reference, ExchangeRef::Partial { .. }));
        assert_eq!(bucket_names(&scope), vec!["only"]);
    }

    #[test]
    fn test_disabled_scope_rejects_everything() {
        let mut scope = SyncScope::Disabled;
        assert!(exchange_reference(&mut scope, WorkItemKind::AllSync, NOW).is_none());
        assert!(exchange_reference(&mut scope, WorkItemKind::HourSync, NOW).is_none());
    }
}
