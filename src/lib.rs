//! # Full-Sync Coordinator
//!
//! A full-sync anti-entropy coordinator pacing Merkle-tree exchanges
//! between a local and a remote key-value cluster.
//!
//! ## Architecture
//!
//! Once per day the coordinator plans a fixed number of work slices;
//! at each slice boundary one work-item fires (no-op, full comparison,
//! last-day window, last-hour window). Non-trivial work-items start an
//! exchange on the external AAE engine, and source-dominant keys from
//! the resulting divergence list are requeued for re-replication:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                        fullsync-coordinator                           │
//! │                                                                       │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌───────────────────────┐  │
//! │  │ Planner      │──►│ Slice Dispatcher │──►│ Exchange Driver       │  │
//! │  │ (randomized  │   │ (node-staggered  │   │ (ping, callbacks,     │  │
//! │  │  day plan)   │   │  fire times)     │   │  crash timeout)       │  │
//! │  └──────────────┘   └──────────────────┘   └──────────┬────────────┘  │
//! │                                                       │               │
//! │                                            ┌──────────▼────────────┐  │
//! │                                            │ Repair Decider        │  │
//! │                                            │ (clock dominance →    │  │
//! │                                            │  replication queue)   │  │
//! │                                            └───────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The Merkle comparison itself, the clusters' HTTP endpoints, the
//! replication queue, and cluster membership are external capabilities,
//! consumed as traits ([`exchange::ExchangeEngine`],
//! [`client::ClusterApi`], [`queue::ReplQueue`],
//! [`membership::MembershipOracle`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fullsync_coordinator::{Capabilities, FullSyncConfig, FullSyncCoordinator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = FullSyncConfig::for_testing();
//!     let handle = FullSyncCoordinator::spawn(config, Capabilities::standalone("node-1"))
//!         .expect("Failed to start coordinator");
//!
//!     // The coordinator paces itself; control it through the handle.
//!     handle.pause().await.expect("pause failed");
//!     handle.resume().await.expect("resume failed");
//! }
//! ```

pub mod client;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod membership;
pub mod metrics;
pub mod queue;
pub mod repair;
pub mod schedule;
pub mod vclock;

// Re-exports for convenience
pub use config::{BucketId, CheckQuotas, Endpoint, FullSyncConfig, SyncScope};
pub use coordinator::{Capabilities, CoordinatorHandle, FullSyncCoordinator};
pub use error::{FullSyncError, Result};
pub use exchange::{ExchangeEngine, ExchangeOutcome, ExchangeReport, NoOpExchange};
pub use membership::{MembershipOracle, StaticMembership};
pub use queue::{NoOpQueue, ReplQueue};
pub use schedule::{ScheduleWants, WorkItemKind};
