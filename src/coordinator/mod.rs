// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Full-sync coordinator.
//!
//! The main orchestrator that ties together:
//! - The schedule planner and slice dispatcher ([`crate::schedule`],
//!   [`crate::dispatch`])
//! - The exchange driver (this module's `driver`)
//! - The repair decider via the exchange callbacks ([`crate::repair`])
//! - The capability adapters (clients, queue, membership)
//!
//! # Architecture
//!
//! A single-threaded actor owns all coordinator state. Every mutation
//! arrives through one mailbox: control calls, slice-timer self-sends,
//! and exchange completions. Waiting is expressed as the loop's next
//! deadline:
//!
//! - after startup or reconfiguration: the initial timeout (60s),
//! - after completing an action: the loop timeout (15s),
//! - while an exchange is in flight: the crash timeout (1h).
//!
//! When the dispatcher picks the next slice, the wait until its fire
//! time is handed to a spawned timer that posts the work-item back into
//! the mailbox; the coordinator itself never sleeps through network I/O
//! (exchange queries run on their own fire-and-forget workers).

mod driver;
mod types;

pub use crate::exchange::{ExchangeOutcome, ExchangeReport};

use crate::client::{ClientFactory, HttpClientFactory};
use crate::config::{wants_for, BucketId, CheckQuotas, Endpoint, FullSyncConfig, SyncScope};
use crate::dispatch;
use crate::error::{FullSyncError, Result};
use crate::exchange::{ExchangeEngine, ExchangeId, NoOpExchange};
use crate::membership::{self, MembershipOracle, StaticMembership};
use crate::metrics;
use crate::queue::{NoOpQueue, QueueName, ReplQueue};
use crate::schedule::WorkItemKind;
use driver::{DriveContext, DriveOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::{Message, ScheduleState};

/// External capabilities the coordinator drives.
#[derive(Clone)]
pub struct Capabilities {
    /// The AAE exchange engine.
    pub engine: Arc<dyn ExchangeEngine>,
    /// The local re-replication queue.
    pub queue: Arc<dyn ReplQueue>,
    /// The cluster membership oracle (for slice staggering).
    pub membership: Arc<dyn MembershipOracle>,
    /// Factory for per-exchange cluster clients.
    pub clients: Arc<dyn ClientFactory>,
}

impl Capabilities {
    /// Standalone capabilities: real HTTP clients, but a no-op engine
    /// and queue, and a one-node membership view. Useful for bring-up.
    pub fn standalone(node: impl Into<String>) -> Self {
        Self {
            engine: Arc::new(NoOpExchange),
            queue: Arc::new(NoOpQueue),
            membership: Arc::new(StaticMembership::solo(node)),
            clients: Arc::new(HttpClientFactory),
        }
    }
}

/// Handle for controlling a running coordinator.
///
/// All methods post into the coordinator mailbox; control calls are
/// answered synchronously (in mailbox order) through oneshot replies.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl CoordinatorHandle {
    /// Pause the schedule: future slices resolve to no-ops until
    /// [`resume`](Self::resume). Does not cancel an in-flight exchange.
    pub async fn pause(&self) -> Result<()> {
        self.call(|reply| Message::Pause { reply }).await?
    }

    /// Restore the schedule saved by [`pause`](Self::pause).
    pub async fn resume(&self) -> Result<()> {
        self.call(|reply| Message::Resume { reply }).await?
    }

    /// Overwrite the remote (sink) endpoint.
    pub async fn set_sink(&self, endpoint: Endpoint) -> Result<()> {
        self.call(|reply| Message::SetSink { endpoint, reply }).await
    }

    /// Overwrite the local (source) endpoint.
    pub async fn set_source(&self, endpoint: Endpoint) -> Result<()> {
        self.call(|reply| Message::SetSource { endpoint, reply }).await
    }

    /// Switch scope to full key-space comparison under these n-vals.
    pub async fn set_all_sync(&self, local_nval: u32, remote_nval: u32) -> Result<()> {
        self.call(|reply| Message::SetAllSync {
            local_nval,
            remote_nval,
            reply,
        })
        .await
    }

    /// Switch scope to a rotating bucket list.
    pub async fn set_bucket_sync(&self, buckets: Vec<BucketId>) -> Result<()> {
        self.call(|reply| Message::SetBucketSync { buckets, reply }).await
    }

    /// Trigger a work-item out of schedule and receive its final report.
    pub fn process_work_item(
        &self,
        kind: WorkItemKind,
        now: u64,
    ) -> Result<oneshot::Receiver<ExchangeReport>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Process {
                kind,
                reply: Some(reply),
                now,
            })
            .map_err(|_| FullSyncError::Stopped)?;
        Ok(rx)
    }

    /// Trigger a work-item out of schedule, fire-and-forget.
    pub fn cast_work_item(&self, kind: WorkItemKind, now: u64) -> Result<()> {
        self.tx
            .send(Message::Process {
                kind,
                reply: None,
                now,
            })
            .map_err(|_| FullSyncError::Stopped)
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| FullSyncError::Stopped)?;
        rx.await.map_err(|_| FullSyncError::Stopped)
    }
}

/// The coordinator actor. Constructed and spawned via [`Self::spawn`];
/// all further interaction goes through the [`CoordinatorHandle`].
pub struct FullSyncCoordinator {
    scope: SyncScope,
    checks: CheckQuotas,
    schedule: ScheduleState,
    local_endpoint: Endpoint,
    remote_endpoint: Endpoint,
    queue_name: QueueName,
    initial_timeout: Duration,
    loop_timeout: Duration,
    crash_timeout: Duration,
    caps: Capabilities,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    /// The exchange the coordinator is currently waiting on.
    inflight: Option<ExchangeId>,
    /// Next wake-up for the select loop. `None` means wait for mail.
    deadline: Option<Instant>,
    rng: StdRng,
}

impl FullSyncCoordinator {
    /// Validate the config and start the coordinator actor.
    ///
    /// The first dispatch happens after the initial timeout, giving
    /// node boot-time traffic a chance to settle.
    pub fn spawn(config: FullSyncConfig, caps: Capabilities) -> Result<CoordinatorHandle> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let wants = config.schedule_wants();
        let now = unix_now();

        let coordinator = Self {
            scope: config.scope,
            checks: config.checks,
            schedule: ScheduleState::new(wants, now),
            local_endpoint: config.local,
            remote_endpoint: config.peer,
            queue_name: QueueName::new(config.queue_name),
            initial_timeout: config.timeouts.initial_timeout_duration(),
            loop_timeout: config.timeouts.loop_timeout_duration(),
            crash_timeout: config.timeouts.crash_timeout_duration(),
            caps,
            tx: tx.clone(),
            rx,
            inflight: None,
            deadline: None,
            rng: StdRng::from_entropy(),
        };

        tokio::spawn(coordinator.run());
        Ok(CoordinatorHandle { tx })
    }

    async fn run(mut self) {
        info!(
            scope = scope_mode(&self.scope),
            slice_count = self.schedule.wants.slice_count(),
            peer = %self.remote_endpoint,
            local = %self.local_endpoint,
            queue = %self.queue_name,
            "Full-sync coordinator starting"
        );
        metrics::set_paused(false);
        self.deadline = Some(Instant::now() + self.initial_timeout);

        loop {
            let message = tokio::select! {
                biased;

                received = self.rx.recv() => match received {
                    Some(message) => Some(message),
                    // All handles dropped: shut down.
                    None => break,
                },

                _ = idle(self.deadline) => None,
            };

            match message {
                Some(message) => self.on_message(message).await,
                None => self.on_timeout(),
            }
        }

        info!("Full-sync coordinator stopped");
    }

    /// The deadline fired: either the in-flight exchange crashed, or we
    /// were idling. Both end in dispatching the next slice.
    fn on_timeout(&mut self) {
        if let Some(id) = self.inflight.take() {
            warn!(
                exchange_id = %id,
                crash_timeout_secs = self.crash_timeout.as_secs(),
                "Exchange did not complete within the crash timeout, abandoning it"
            );
            metrics::record_exchange_crashed();
        }
        self.dispatch_next();
    }

    /// Ask the dispatcher for the next slice and arm its timer.
    fn dispatch_next(&mut self) {
        let node_info = membership::node_info(self.caps.membership.as_ref());
        let step = dispatch::next_work_item(
            std::mem::take(&mut self.schedule.pending),
            &self.schedule.wants,
            self.schedule.schedule_start,
            node_info,
            unix_now(),
            &mut self.rng,
        );

        info!(
            kind = %step.kind,
            wait_secs = step.wait.as_secs(),
            ordinal = node_info.ordinal,
            node_count = node_info.count,
            "Next slice armed"
        );

        self.schedule.pending = step.pending;
        self.schedule.schedule_start = step.schedule_start;

        let tx = self.tx.clone();
        let kind = step.kind;
        let wait = step.wait;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // Coordinator may have stopped while the timer ran
            let _ = tx.send(Message::WorkItem { kind });
        });

        // The armed timer drives the next tick
        self.deadline = None;
    }

    async fn on_message(&mut self, message: Message) {
        match message {
            Message::WorkItem { kind } => {
                // Re-posted as a process cast so external requesters and
                // timer fires take the identical path, in mailbox order.
                let _ = self.tx.send(Message::Process {
                    kind,
                    reply: None,
                    now: unix_now(),
                });
            }

            Message::Process { kind, reply, now } => {
                let ctx = DriveContext {
                    engine: &self.caps.engine,
                    clients: &self.caps.clients,
                    queue: &self.caps.queue,
                    queue_name: &self.queue_name,
                    local_endpoint: &self.local_endpoint,
                    remote_endpoint: &self.remote_endpoint,
                    mailbox: &self.tx,
                };
                let outcome = driver::drive_work_item(&mut self.scope, ctx, kind, reply, now).await;
                match outcome {
                    DriveOutcome::Started(id) => {
                        self.inflight = Some(id);
                        self.deadline = Some(Instant::now() + self.crash_timeout);
                    }
                    DriveOutcome::Skipped => {
                        self.deadline = Some(Instant::now() + self.loop_timeout);
                    }
                    DriveOutcome::Invalid => {
                        self.deadline = Some(Instant::now() + self.initial_timeout);
                    }
                }
            }

            Message::ReplyComplete { id } => match self.inflight {
                Some(current) if current == id => {
                    debug!(exchange_id = %id, "Exchange completed");
                    self.inflight = None;
                    self.deadline = Some(Instant::now() + self.loop_timeout);
                }
                _ => {
                    // A late reply after the crash timeout (or a stray
                    // duplicate). Recorded, but it must not re-arm the
                    // next slice.
                    warn!(exchange_id = %id, "Completion for an exchange no longer in flight");
                    metrics::record_phantom_completion();
                }
            },

            Message::Pause { reply } => {
                let result = self.schedule.pause();
                if result.is_ok() {
                    info!("Schedule paused, future slices resolve to no-ops");
                    metrics::set_paused(true);
                    self.deadline = None;
                }
                let _ = reply.send(result);
            }

            Message::Resume { reply } => {
                let result = self.schedule.resume();
                if result.is_ok() {
                    info!("Schedule resumed");
                    metrics::set_paused(false);
                    self.deadline = Some(Instant::now() + self.initial_timeout);
                }
                let _ = reply.send(result);
            }

            Message::SetSink { endpoint, reply } => {
                info!(peer = %endpoint, "Sink endpoint updated");
                self.remote_endpoint = endpoint;
                self.deadline = Some(Instant::now() + self.initial_timeout);
                let _ = reply.send(());
            }

            Message::SetSource { endpoint, reply } => {
                info!(local = %endpoint, "Source endpoint updated");
                self.local_endpoint = endpoint;
                self.deadline = Some(Instant::now() + self.initial_timeout);
                let _ = reply.send(());
            }

            Message::SetAllSync {
                local_nval,
                remote_nval,
                reply,
            } => {
                info!(local_nval, remote_nval, "Scope switched to full key-space sync");
                self.scope = SyncScope::All {
                    local_nval,
                    remote_nval,
                };
                self.schedule.set_wants(wants_for(&self.scope, &self.checks));
                // Any already-armed slice timer drives the next tick
                self.deadline = None;
                let _ = reply.send(());
            }

            Message::SetBucketSync { buckets, reply } => {
                info!(buckets = buckets.len(), "Scope switched to bucket sync");
                self.scope = SyncScope::Bucket { buckets };
                self.schedule.set_wants(wants_for(&self.scope, &self.checks));
                self.deadline = None;
                let _ = reply.send(());
            }
        }
    }
}

/// Wait until the deadline, or forever when none is armed.
async fn idle(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Seconds since the Unix epoch, uncompressed.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn scope_mode(scope: &SyncScope) -> &'static str {
    match scope {
        SyncScope::All { .. } => "all",
        SyncScope::Bucket { .. } => "bucket",
        SyncScope::Disabled => "disabled",
    }
}
