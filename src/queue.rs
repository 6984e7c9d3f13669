// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication queue integration trait.
//!
//! Defines the interface for the local re-replication queue that
//! receives source-dominant keys found during an exchange. Requeueing
//! (rather than replicating directly) funnels changes through the
//! cluster's general replication path, fanning out to *all* destination
//! clusters rather than just the sink participating in the exchange.
//!
//! The trait allows testing with mocks and decouples the coordinator
//! from the queue's persistence.

use crate::config::BucketId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Result type for queue operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = QueueResult<T>> + Send + 'a>>;

/// Simplified error for queue operations.
#[derive(Debug, Clone)]
pub struct QueueError(pub String);

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for QueueError {}

/// Symbolic name of a replication queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the queue consumer should obtain the object for a repair entry.
///
/// The coordinator never ships object bodies; consumers fetch the
/// current version from the local cluster when the entry is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPayload {
    ToFetch,
}

/// One source-dominant key handed to the replication queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairEntry {
    pub bucket: BucketId,
    pub key: String,
    /// The source's clock in its persisted wire form, when present.
    pub clock: Option<Vec<u8>>,
    pub payload: RepairPayload,
}

/// Trait defining what the coordinator needs from the replication queue.
///
/// The daemon provides an implementation; the coordinator only appends.
pub trait ReplQueue: Send + Sync + 'static {
    /// Append a batch of repair entries to the named queue.
    ///
    /// Best-effort from the coordinator's perspective: a failure is
    /// logged and not retried at this layer (the queue owns its own
    /// persistence).
    fn enqueue(&self, queue: &QueueName, entries: Vec<RepairEntry>) -> BoxFuture<'_, ()>;
}

/// A no-op implementation for testing/standalone mode.
///
/// Logs batches but doesn't hand them anywhere.
#[derive(Clone)]
pub struct NoOpQueue;

impl ReplQueue for NoOpQueue {
    fn enqueue(&self, queue: &QueueName, entries: Vec<RepairEntry>) -> BoxFuture<'_, ()> {
        let queue = queue.clone();
        Box::pin(async move {
            tracing::debug!(
                queue = %queue,
                entries = entries.len(),
                "NoOp: would enqueue repair entries"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_queue_accepts_batches() {
        let queue = NoOpQueue;
        let entries = vec![RepairEntry {
            bucket: BucketId::untyped("users"),
            key: "alice".to_string(),
            clock: Some(b"{}".to_vec()),
            payload: RepairPayload::ToFetch,
        }];
        let result = queue.enqueue(&QueueName::new("cluster_b"), entries).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_noop_queue_accepts_empty_batch() {
        let queue = NoOpQueue;
        let result = queue.enqueue(&QueueName::new("cluster_b"), vec![]).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_queue_name_display() {
        let name = QueueName::new("cluster_b");
        assert_eq!(name.to_string(), "cluster_b");
        assert_eq!(name.as_str(), "cluster_b");
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError("queue full".to_string());
        assert_eq!(err.to_string(), "queue full");
        let _: &dyn std::error::Error = &err;
    }
}
