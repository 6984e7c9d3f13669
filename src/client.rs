// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP client for a cluster's AAE surface.
//!
//! The [`ClusterApi`] trait abstracts the six endpoints the coordinator
//! consumes (`ping` plus five AAE queries), allowing dependency
//! injection and mock clients in tests. [`HttpClusterClient`] is the
//! real implementation over `reqwest` JSON.
//!
//! Clients are constructed per exchange, not pooled: an exchange is a
//! minutes-long, low-frequency affair and a fresh client sidesteps any
//! shared mutable connection state between exchanges.

use crate::config::{BucketId, Endpoint};
use crate::error::{FullSyncError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Per-request timeout. Exchanges are paced in minutes; a cluster that
/// cannot answer an AAE query inside this window is treated as down.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ═══════════════════════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════════════════════

/// Merkle tree size for a range query. Bigger trees cost more to build
/// but produce fewer false-positive segments over wide time windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeSize {
    Small,
    Medium,
    Large,
}

/// Key range limit for a range query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyRange {
    All,
    Between { start: String, end: String },
}

/// Last-modified window in epoch seconds, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedRange {
    pub low: u64,
    pub high: u64,
}

/// How leaf hashes are derived for a range tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum HashMethod {
    /// Use the hash persisted with each object version.
    PreHash,
    /// Recompute with a seed (forces a fresh pass over clocks).
    Rehash { seed: u64 },
}

/// An explicit segment subset for a narrowed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSubset {
    pub ids: Vec<u32>,
    pub tree_size: TreeSize,
}

/// A branch identifier with its merged hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDigest {
    pub id: u32,
    pub hash: Vec<u8>,
}

/// A key and its persisted clock, as returned by clock queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyClock {
    pub bucket: BucketId,
    pub key: String,
    /// Persisted wire form of the object's vector clock.
    pub clock: Vec<u8>,
}

/// A tree imported from a range query, ready for the engine to compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeTree {
    pub size: TreeSize,
    pub branches: Vec<BranchDigest>,
}

/// Parameters for `aae_range_tree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRangeRequest {
    pub bucket: BucketId,
    pub key_range: KeyRange,
    pub tree_size: TreeSize,
    /// `None` means all segments.
    pub segments: Option<SegmentSubset>,
    pub modified_range: Option<ModifiedRange>,
    pub hash_method: HashMethod,
}

/// Parameters for `aae_range_clocks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockRangeRequest {
    pub bucket: BucketId,
    pub key_range: KeyRange,
    /// `None` means all segments.
    pub segments: Option<SegmentSubset>,
    pub modified_range: Option<ModifiedRange>,
}

#[derive(Serialize)]
struct NValQuery<'a> {
    nval: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    branches: Option<&'a [u32]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<&'a [u32]>,
}

#[derive(Deserialize)]
struct RootResponse {
    root: Vec<u8>,
}

#[derive(Deserialize)]
struct BranchesResponse {
    branches: Vec<BranchDigest>,
}

#[derive(Deserialize)]
struct ClocksResponse {
    keys_clocks: Vec<KeyClock>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ClusterApi trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Trait defining the cluster AAE surface the coordinator consumes.
pub trait ClusterApi: Send + Sync + 'static {
    /// Liveness probe. An exchange is only started once both sides answer.
    fn ping(&self) -> ApiFuture<'_, ()>;

    /// Fetch the top-level Merkle root of the cached tree for an n-val.
    fn merge_root(&self, nval: u32) -> ApiFuture<'_, Vec<u8>>;

    /// Fetch branch-level hashes for the given branch ids.
    fn merge_branches(&self, nval: u32, branches: Vec<u32>) -> ApiFuture<'_, Vec<BranchDigest>>;

    /// Fetch `(bucket, key, clock)` triples from the given segments.
    fn fetch_clocks(&self, nval: u32, segments: Vec<u32>) -> ApiFuture<'_, Vec<KeyClock>>;

    /// Build and return a Merkle tree over a bucket/key/time range.
    fn merge_tree_range(&self, request: TreeRangeRequest) -> ApiFuture<'_, RangeTree>;

    /// Fetch `(bucket, key, clock)` triples over a bucket/key/time range.
    fn fetch_clocks_range(&self, request: ClockRangeRequest) -> ApiFuture<'_, Vec<KeyClock>>;

    /// The endpoint this client talks to, for log lines.
    fn endpoint(&self) -> String;
}

/// Trait for opening per-exchange clients against an endpoint.
///
/// The coordinator opens two clients (remote then local) at the start of
/// each exchange; injecting the factory lets tests substitute mocks.
pub trait ClientFactory: Send + Sync + 'static {
    fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn ClusterApi>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP implementation
// ═══════════════════════════════════════════════════════════════════════════════

/// Real cluster client over `reqwest`.
pub struct HttpClusterClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpClusterClient {
    /// Create a client for one endpoint.
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FullSyncError::remote(endpoint.base_url(), "build_client", e))?;

        Ok(Self {
            base_url: endpoint.base_url(),
            client,
        })
    }

    async fn post_json<B, T>(&self, operation: &'static str, path: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, operation, "Cluster AAE request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| FullSyncError::remote(&self.base_url, operation, e))?
            .error_for_status()
            .map_err(|e| FullSyncError::remote(&self.base_url, operation, e))?;

        response
            .json::<T>()
            .await
            .map_err(|e| FullSyncError::remote(&self.base_url, operation, e))
    }
}

impl ClusterApi for HttpClusterClient {
    fn ping(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            let url = format!("{}/ping", self.base_url);
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| FullSyncError::remote(&self.base_url, "ping", e))?
                .error_for_status()
                .map_err(|e| FullSyncError::remote(&self.base_url, "ping", e))?;
            Ok(())
        })
    }

    fn merge_root(&self, nval: u32) -> ApiFuture<'_, Vec<u8>> {
        Box::pin(async move {
            let body = NValQuery {
                nval,
                branches: None,
                segments: None,
            };
            let response: RootResponse =
                self.post_json("aae_merge_root", "/aae/merge_root", &body).await?;
            Ok(response.root)
        })
    }

    fn merge_branches(&self, nval: u32, branches: Vec<u32>) -> ApiFuture<'_, Vec<BranchDigest>> {
        Box::pin(async move {
            let body = NValQuery {
                nval,
                branches: Some(&branches),
                segments: None,
            };
            let response: BranchesResponse = self
                .post_json("aae_merge_branches", "/aae/merge_branches", &body)
                .await?;
            Ok(response.branches)
        })
    }

    fn fetch_clocks(&self, nval: u32, segments: Vec<u32>) -> ApiFuture<'_, Vec<KeyClock>> {
        Box::pin(async move {
            let body = NValQuery {
                nval,
                branches: None,
                segments: Some(&segments),
            };
            let response: ClocksResponse = self
                .post_json("aae_fetch_clocks", "/aae/fetch_clocks", &body)
                .await?;
            Ok(response.keys_clocks)
        })
    }

    fn merge_tree_range(&self, request: TreeRangeRequest) -> ApiFuture<'_, RangeTree> {
        Box::pin(async move {
            self.post_json("aae_range_tree", "/aae/range_tree", &request)
                .await
        })
    }

    fn fetch_clocks_range(&self, request: ClockRangeRequest) -> ApiFuture<'_, Vec<KeyClock>> {
        Box::pin(async move {
            let response: ClocksResponse = self
                .post_json("aae_range_clocks", "/aae/range_clocks", &request)
                .await?;
            Ok(response.keys_clocks)
        })
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}

/// Factory producing [`HttpClusterClient`]s. The default in production.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn open(&self, endpoint: &Endpoint) -> Result<Arc<dyn ClusterApi>> {
        Ok(Arc::new(HttpClusterClient::new(endpoint)?))
    }
}
