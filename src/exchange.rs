// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Exchange engine integration.
//!
//! The coordinator does not compare Merkle trees itself; it starts
//! exchanges on an external engine and supplies the engine's extension
//! points as small capability objects:
//!
//! - a [`QuerySender`] per side, answering the engine's tree/clock
//!   queries against that side's cluster,
//! - a [`RepairSink`] receiving the final key/clock divergence list,
//! - a [`CompletionSink`] notified when the exchange finishes.
//!
//! Query sending is fire-and-forget: [`ClusterQuerySender`] spawns a
//! worker per query so the local and remote requests run concurrently,
//! and the response returns through the engine's side-tagged reply
//! channel. The engine proceeds once both sides have answered; either
//! side may answer first.

use crate::client::{
    ClockRangeRequest, ClusterApi, HashMethod, KeyRange, ModifiedRange, SegmentSubset,
    TreeRangeRequest, TreeSize,
};
use crate::client::{BranchDigest, KeyClock, RangeTree};
use crate::config::BucketId;
use crate::error::{FullSyncError, Result};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Unique identifier of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which cluster a query or reply belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeSide {
    Local,
    Remote,
}

impl fmt::Display for ExchangeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeSide::Local => write!(f, "local"),
            ExchangeSide::Remote => write!(f, "remote"),
        }
    }
}

/// Segment narrowing as the engine emits it during descent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentFilter {
    All,
    Segments { ids: Vec<u32>, tree_size: TreeSize },
}

/// Rewrite the engine's segment filter into the client's shape
/// (`None` = all segments).
pub fn narrow_segments(filter: &SegmentFilter) -> Option<SegmentSubset> {
    match filter {
        SegmentFilter::All => None,
        SegmentFilter::Segments { ids, tree_size } => Some(SegmentSubset {
            ids: ids.clone(),
            tree_size: *tree_size,
        }),
    }
}

/// One query the engine asks a side to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AaeQuery {
    /// Top-level Merkle root of the side's cached tree.
    FetchRoot,
    /// Branch-level hashes for the given branch ids.
    FetchBranches { branches: Vec<u32> },
    /// Key/clock triples from the given segments.
    FetchClocks { segments: Vec<u32> },
    /// Build a tree over a bucket/key/time range.
    MergeTreeRange {
        bucket: BucketId,
        key_range: KeyRange,
        tree_size: TreeSize,
        segment_filter: SegmentFilter,
        modified_range: Option<ModifiedRange>,
        hash_method: HashMethod,
    },
    /// Key/clock triples over a bucket/key/time range.
    FetchClocksRange {
        bucket: BucketId,
        key_range: KeyRange,
        segment_filter: SegmentFilter,
        modified_range: Option<ModifiedRange>,
    },
}

impl AaeQuery {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            AaeQuery::FetchRoot => "fetch_root",
            AaeQuery::FetchBranches { .. } => "fetch_branches",
            AaeQuery::FetchClocks { .. } => "fetch_clocks",
            AaeQuery::MergeTreeRange { .. } => "merge_tree_range",
            AaeQuery::FetchClocksRange { .. } => "fetch_clocks_range",
        }
    }
}

/// A side's answer to an [`AaeQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AaeResponse {
    Root(Vec<u8>),
    Branches(Vec<BranchDigest>),
    Clocks(Vec<KeyClock>),
    Tree(RangeTree),
}

/// A reply routed back to the engine, tagged with the answering side.
#[derive(Debug)]
pub struct SideReply {
    pub side: ExchangeSide,
    pub response: Result<AaeResponse>,
}

/// One-shot reply slot the engine hands to a query sender.
///
/// Delivery is infallible from the sender's perspective; if the engine
/// has already given up on the exchange the reply is simply dropped.
pub struct ReplySlot {
    side: ExchangeSide,
    tx: mpsc::UnboundedSender<SideReply>,
}

impl ReplySlot {
    pub fn new(side: ExchangeSide, tx: mpsc::UnboundedSender<SideReply>) -> Self {
        Self { side, tx }
    }

    pub fn side(&self) -> ExchangeSide {
        self.side
    }

    /// Deliver the response to the engine.
    pub fn deliver(self, response: Result<AaeResponse>) {
        let reply = SideReply {
            side: self.side,
            response,
        };
        if self.tx.send(reply).is_err() {
            debug!(side = %self.side, "Exchange reply channel closed, dropping late response");
        }
    }
}

/// Trait for answering engine queries against one side's cluster.
///
/// Implementations must not block: spawn the work and return, delivering
/// the response through the slot.
pub trait QuerySender: Send + Sync + 'static {
    fn send_query(&self, query: AaeQuery, reply: ReplySlot);
}

/// Divergent key reported by the engine: the same key with each side's
/// persisted clock (`None` when that side is missing the object).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDelta {
    pub bucket: BucketId,
    pub key: String,
    pub src_clock: Option<Vec<u8>>,
    pub sink_clock: Option<Vec<u8>>,
}

/// Trait receiving the engine's final divergence list.
pub trait RepairSink: Send + Sync + 'static {
    fn repair(&self, deltas: Vec<KeyDelta>) -> BoxFuture<'_, ()>;
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Roots (or narrowed segments) matched; nothing to repair.
    InSync,
    /// Divergences were found and handed to the repair sink.
    Repaired,
    /// The work-item was not exchanged (no-op slice, unreachable
    /// cluster, or invalid scope/work-item combination).
    Skipped,
    /// The engine aborted the exchange.
    Aborted,
}

impl fmt::Display for ExchangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeOutcome::InSync => write!(f, "in_sync"),
            ExchangeOutcome::Repaired => write!(f, "repaired"),
            ExchangeOutcome::Skipped => write!(f, "skipped"),
            ExchangeOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Final word on one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeReport {
    pub id: ExchangeId,
    pub outcome: ExchangeOutcome,
    /// Number of divergent keys the engine reported.
    pub deltas: usize,
}

/// Trait notified exactly once when an exchange finishes.
pub trait CompletionSink: Send + Sync + 'static {
    fn completed(&self, report: ExchangeReport);
}

/// What the exchange compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeRef {
    /// Full key-space comparison under per-side n-vals, against the
    /// clusters' cached trees.
    Full { local_nval: u32, remote_nval: u32 },
    /// Range comparison over one bucket, building trees on demand.
    Partial { filter: RangeFilter },
}

/// The range an exchange is limited to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFilter {
    pub bucket: BucketId,
    pub key_range: KeyRange,
    pub tree_size: TreeSize,
    pub modified_range: Option<ModifiedRange>,
    pub hash_method: HashMethod,
}

/// Everything the engine needs to run one exchange.
pub struct ExchangeRequest {
    pub id: ExchangeId,
    pub reference: ExchangeRef,
    pub local: Arc<dyn QuerySender>,
    pub remote: Arc<dyn QuerySender>,
    pub repair: Arc<dyn RepairSink>,
    pub completion: Arc<dyn CompletionSink>,
}

/// Trait defining what the coordinator needs from the exchange engine.
///
/// `start` must return promptly: the exchange runs on the engine's own
/// tasks and reports back through the completion sink.
pub trait ExchangeEngine: Send + Sync + 'static {
    fn start(&self, request: ExchangeRequest) -> BoxFuture<'_, ExchangeId>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cluster-backed query sender
// ═══════════════════════════════════════════════════════════════════════════════

/// Answers engine queries against one cluster via its [`ClusterApi`].
///
/// Captures only immutable per-exchange context: the client handle and
/// the side's n-val (needed for cached-tree queries, absent for range
/// exchanges).
pub struct ClusterQuerySender {
    api: Arc<dyn ClusterApi>,
    nval: Option<u32>,
}

impl ClusterQuerySender {
    pub fn new(api: Arc<dyn ClusterApi>, nval: Option<u32>) -> Self {
        Self { api, nval }
    }
}

impl QuerySender for ClusterQuerySender {
    fn send_query(&self, query: AaeQuery, reply: ReplySlot) {
        let api = Arc::clone(&self.api);
        let nval = self.nval;
        tokio::spawn(async move {
            let name = query.name();
            let response = run_query(api.as_ref(), nval, query).await;
            if let Err(e) = &response {
                warn!(
                    side = %reply.side(),
                    endpoint = %api.endpoint(),
                    query = name,
                    error = %e,
                    "AAE query failed, propagating to exchange engine"
                );
            }
            reply.deliver(response);
        });
    }
}

async fn run_query(
    api: &dyn ClusterApi,
    nval: Option<u32>,
    query: AaeQuery,
) -> Result<AaeResponse> {
    let cached_nval = || {
        nval.ok_or_else(|| {
            FullSyncError::Internal("cached-tree query issued on a range exchange".to_string())
        })
    };

    match query {
        AaeQuery::FetchRoot => {
            let root = api.merge_root(cached_nval()?).await?;
            Ok(AaeResponse::Root(root))
        }
        AaeQuery::FetchBranches { branches } => {
            let digests = api.merge_branches(cached_nval()?, branches).await?;
            Ok(AaeResponse::Branches(digests))
        }
        AaeQuery::FetchClocks { segments } => {
            let clocks = api.fetch_clocks(cached_nval()?, segments).await?;
            Ok(AaeResponse::Clocks(clocks))
        }
        AaeQuery::MergeTreeRange {
            bucket,
            key_range,
            tree_size,
            segment_filter,
            modified_range,
            hash_method,
        } => {
            let tree = api
                .merge_tree_range(TreeRangeRequest {
                    bucket,
                    key_range,
                    tree_size,
                    segments: narrow_segments(&segment_filter),
                    modified_range,
                    hash_method,
                })
                .await?;
            Ok(AaeResponse::Tree(tree))
        }
        AaeQuery::FetchClocksRange {
            bucket,
            key_range,
            segment_filter,
            modified_range,
        } => {
            let clocks = api
                .fetch_clocks_range(ClockRangeRequest {
                    bucket,
                    key_range,
                    segments: narrow_segments(&segment_filter),
                    modified_range,
                })
                .await?;
            Ok(AaeResponse::Clocks(clocks))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// No-op engine
// ═══════════════════════════════════════════════════════════════════════════════

/// An engine that reports every exchange in-sync without comparing
/// anything. For testing and standalone bring-up.
#[derive(Clone)]
pub struct NoOpExchange;

impl ExchangeEngine for NoOpExchange {
    fn start(&self, request: ExchangeRequest) -> BoxFuture<'_, ExchangeId> {
        Box::pin(async move {
            let id = request.id;
            let completion = Arc::clone(&request.completion);
            tokio::spawn(async move {
                debug!(exchange_id = %id, "NoOp: reporting exchange in sync");
                completion.completed(ExchangeReport {
                    id,
                    outcome: ExchangeOutcome::InSync,
                    deltas: 0,
                });
            });
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedApi {
        root: Vec<u8>,
    }

    impl ClusterApi for FixedApi {
        fn ping(&self) -> crate::client::ApiFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn merge_root(&self, _nval: u32) -> crate::client::ApiFuture<'_, Vec<u8>> {
            let root = self.root.clone();
            Box::pin(async move { Ok(root) })
        }

        fn merge_branches(
            &self,
            _nval: u32,
            branches: Vec<u32>,
        ) -> crate::client::ApiFuture<'_, Vec<BranchDigest>> {
            Box::pin(async move {
                Ok(branches
                    .into_iter()
                    .map(|id| BranchDigest { id, hash: vec![id as u8] })
                    .collect())
            })
        }

        fn fetch_clocks(
            &self,
            _nval: u32,
            _segments: Vec<u32>,
        ) -> crate::client::ApiFuture<'_, Vec<KeyClock>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn merge_tree_range(
            &self,
            request: TreeRangeRequest,
        ) -> crate::client::ApiFuture<'_, RangeTree> {
            Box::pin(async move {
                Ok(RangeTree {
                    size: request.tree_size,
                    branches: vec![],
                })
            })
        }

        fn fetch_clocks_range(
            &self,
            _request: ClockRangeRequest,
        ) -> crate::client::ApiFuture<'_, Vec<KeyClock>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn endpoint(&self) -> String {
            "fixed://test".to_string()
        }
    }

    #[test]
    fn test_narrow_segments_rewrite() {
        assert_eq!(narrow_segments(&SegmentFilter::All), None);

        let narrowed = narrow_segments(&SegmentFilter::Segments {
            ids: vec![3, 7],
            tree_size: TreeSize::Small,
        });
        assert_eq!(
            narrowed,
            Some(SegmentSubset {
                ids: vec![3, 7],
                tree_size: TreeSize::Small,
            })
        );
    }

    #[tokio::test]
    async fn test_query_sender_answers_root_query() {
        let sender = ClusterQuerySender::new(Arc::new(FixedApi { root: vec![0xAB] }), Some(3));
        let (tx, mut rx) = mpsc::unbounded_channel();

        sender.send_query(AaeQuery::FetchRoot, ReplySlot::new(ExchangeSide::Remote, tx));

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.side, ExchangeSide::Remote);
        assert_eq!(reply.response.unwrap(), AaeResponse::Root(vec![0xAB]));
    }

    #[tokio::test]
    async fn test_query_sender_rejects_cached_query_without_nval() {
        let sender = ClusterQuerySender::new(Arc::new(FixedApi { root: vec![] }), None);
        let (tx, mut rx) = mpsc::unbounded_channel();

        sender.send_query(AaeQuery::FetchRoot, ReplySlot::new(ExchangeSide::Local, tx));

        let reply = rx.recv().await.unwrap();
        assert!(reply.response.is_err());
    }

    #[tokio::test]
    async fn test_query_sender_adapts_range_tree_filter() {
        let sender = ClusterQuerySender::new(Arc::new(FixedApi { root: vec![] }), None);
        let (tx, mut rx) = mpsc::unbounded_channel();

        sender.send_query(
            AaeQuery::MergeTreeRange {
                bucket: BucketId::untyped("users"),
                key_range: KeyRange::All,
                tree_size: TreeSize::Large,
                segment_filter: SegmentFilter::All,
                modified_range: None,
                hash_method: HashMethod::PreHash,
            },
            ReplySlot::new(ExchangeSide::Local, tx),
        );

        let reply = rx.recv().await.unwrap();
        match reply.response.unwrap() {
            AaeResponse::Tree(tree) => assert_eq!(tree.size, TreeSize::Large),
            other => panic!("expected tree response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_noop_exchange_reports_in_sync() {
        struct Recorder(Mutex<Option<ExchangeReport>>, tokio::sync::Notify);
        impl CompletionSink for Recorder {
            fn completed(&self, report: ExchangeReport) {
                *self.0.lock().unwrap() = Some(report);
                self.1.notify_one();
            }
        }
        struct DeadSender;
        impl QuerySender for DeadSender {
            fn send_query(&self, _query: AaeQuery, _reply: ReplySlot) {}
        }
        struct DeadRepair;
        impl RepairSink for DeadRepair {
            fn repair(&self, _deltas: Vec<KeyDelta>) -> BoxFuture<'_, ()> {
                Box::pin(async { Ok(()) })
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(None), tokio::sync::Notify::new()));
        let id = ExchangeId::new();
        let engine = NoOpExchange;

        let started = engine
            .start(ExchangeRequest {
                id,
                reference: ExchangeRef::Full {
                    local_nval: 3,
                    remote_nval: 3,
                },
                local: Arc::new(DeadSender),
                remote: Arc::new(DeadSender),
                repair: Arc::new(DeadRepair),
                completion: Arc::clone(&recorder) as Arc<dyn CompletionSink>,
            })
            .await
            .unwrap();
        assert_eq!(started, id);

        recorder.1.notified().await;
        let report = recorder.0.lock().unwrap().take().unwrap();
        assert_eq!(report.id, id);
        assert_eq!(report.outcome, ExchangeOutcome::InSync);
        assert_eq!(report.deltas, 0);
    }
}
