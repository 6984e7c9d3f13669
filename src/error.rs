// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the full-sync coordinator.
//!
//! Errors are categorized by their source (remote cluster, exchange
//! engine, replication queue, etc.) and include context to help with
//! debugging.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Remote` | Yes | Cluster endpoint unreachable, HTTP failures, timeouts |
//! | `Exchange` | Yes | Exchange engine refused or aborted an exchange |
//! | `Queue` | Yes | Replication queue temporarily unavailable |
//! | `Config` | No | Configuration invalid |
//! | `ClockDecode` | No | Persisted vector clock bytes are corrupt |
//! | `AlreadyPaused` | No | `pause()` called on a paused coordinator |
//! | `NotPaused` | No | `resume()` called on a running coordinator |
//! | `Stopped` | No | Coordinator task has exited |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`FullSyncError::is_retryable()`] to determine if an operation
//! should be retried. The coordinator itself never retries in place: a
//! retryable failure is logged and the schedule advances, so the next
//! slice gets a fresh attempt.

use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, FullSyncError>;

/// Errors that can occur while driving full-sync work.
#[derive(Error, Debug)]
pub enum FullSyncError {
    /// HTTP failure against a cluster endpoint.
    ///
    /// Covers connection refusal, timeouts, non-2xx statuses, and
    /// malformed response bodies. Retryable: the next slice will open a
    /// fresh client.
    #[error("Remote error ({endpoint}, {operation}): {message}")]
    Remote {
        endpoint: String,
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The exchange engine refused to start or aborted an exchange.
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Replication queue rejected a batch of repair entries.
    ///
    /// The queue owns its own persistence and retry; at this layer a
    /// failure is logged and the repairs for this exchange are dropped.
    #[error("Replication queue error ({queue}): {message}")]
    Queue { queue: String, message: String },

    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and reconfigure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A persisted vector clock could not be decoded from its wire form.
    #[error("Clock decode error: {0}")]
    ClockDecode(#[from] serde_json::Error),

    /// `pause()` was called while the schedule was already paused.
    #[error("Coordinator is already paused")]
    AlreadyPaused,

    /// `resume()` was called while the schedule was not paused.
    #[error("Coordinator is not paused")]
    NotPaused,

    /// The coordinator task has exited and its mailbox is closed.
    #[error("Coordinator stopped")]
    Stopped,

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen. Indicates a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FullSyncError {
    /// Create a remote error from a reqwest error.
    pub fn remote(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        source: reqwest::Error,
    ) -> Self {
        Self::Remote {
            endpoint: endpoint.into(),
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a remote error without a source.
    pub fn remote_msg(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Remote {
            endpoint: endpoint.into(),
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { .. } => true,
            Self::Exchange(_) => true,
            Self::Queue { .. } => true,
            Self::Config(_) => false,
            Self::ClockDecode(_) => false,
            Self::AlreadyPaused => false,
            Self::NotPaused => false,
            Self::Stopped => false,
            Self::Internal(_) => false,
        }
    }
}
