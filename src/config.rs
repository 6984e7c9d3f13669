//! Configuration for the full-sync coordinator.
//!
//! This module defines all configuration types needed to run the
//! coordinator. Configuration is passed to
//! [`FullSyncCoordinator::spawn()`](crate::coordinator::FullSyncCoordinator::spawn)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use fullsync_coordinator::config::{FullSyncConfig, SyncScope, BucketId};
//!
//! let config = FullSyncConfig {
//!     scope: SyncScope::Bucket {
//!         buckets: vec![BucketId::untyped("users")],
//!     },
//!     ..FullSyncConfig::for_testing()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! FullSyncConfig
//! ├── scope: SyncScope             # all (n-val) | bucket (rotating list) | disabled
//! ├── checks: CheckQuotas          # per-work-item daily slice quotas
//! ├── peer: Endpoint               # remote (sink) cluster HTTP endpoint
//! ├── local: Endpoint              # local (source) cluster HTTP endpoint
//! ├── queue_name: String           # replication queue repairs are handed to
//! └── timeouts: TimeoutConfig      # initial / loop / crash waits
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! scope:
//!   mode: bucket
//!   buckets:
//!     - { bucket_type: "maps", name: "sessions" }
//!
//! checks:
//!   no_check: 0
//!   all_check: 1
//!   day_check: 4
//!   hour_check: 19
//!
//! peer:  { protocol: http, host: "cluster-b.internal", port: 8098 }
//! local: { protocol: http, host: "127.0.0.1", port: 8098 }
//!
//! queue_name: "cluster_b"
//! ```

use crate::error::{FullSyncError, Result};
use crate::schedule::ScheduleWants;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Domain identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// A bucket identifier: an optional bucket type plus a bucket name.
///
/// Untyped buckets carry `bucket_type: None` and address the default type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketId {
    #[serde(default)]
    pub bucket_type: Option<String>,
    pub name: String,
}

impl BucketId {
    /// A bucket under the default bucket type.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            bucket_type: None,
            name: name.into(),
        }
    }

    /// A bucket under an explicit bucket type.
    pub fn typed(bucket_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket_type: Some(bucket_type.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucket_type {
            Some(t) => write!(f, "{}/{}", t, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Endpoints
// ═══════════════════════════════════════════════════════════════════════════════

/// Wire protocol for a cluster endpoint. Only HTTP is carried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncProtocol {
    Http,
}

/// A cluster endpoint `(protocol, host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: SyncProtocol,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: SyncProtocol::Http,
            host: host.into(),
            port,
        }
    }

    /// Base URL for requests against this endpoint.
    pub fn base_url(&self) -> String {
        match self.protocol {
            SyncProtocol::Http => format!("http://{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scope
// ═══════════════════════════════════════════════════════════════════════════════

/// What the coordinator compares.
///
/// - `All`: the entire key-space under the configured n-vals. Only
///   `AllSync`/`NoSync` work-items are meaningful; day/hour windows are
///   rejected at dispatch.
/// - `Bucket`: a rotating list of buckets; each dispatched work-item
///   drains the head and re-appends it.
/// - `Disabled`: the schedule degenerates to 24 no-op slices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SyncScope {
    All { local_nval: u32, remote_nval: u32 },
    Bucket { buckets: Vec<BucketId> },
    Disabled,
}

impl SyncScope {
    pub fn is_disabled(&self) -> bool {
        matches!(self, SyncScope::Disabled)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Quotas
// ═══════════════════════════════════════════════════════════════════════════════

/// Daily slice quotas per work-item kind.
///
/// The effective quotas depend on scope: `all` uses only
/// `no_check`/`all_check`, `disabled` forces 24 no-op slices. See
/// [`FullSyncConfig::schedule_wants`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckQuotas {
    /// Slices that deliberately do nothing (quota holders).
    #[serde(default)]
    pub no_check: u32,

    /// Full key-space (or full-bucket) comparisons.
    #[serde(default = "default_all_check")]
    pub all_check: u32,

    /// Comparisons over objects modified in the trailing 24 hours.
    #[serde(default)]
    pub day_check: u32,

    /// Comparisons over objects modified in the trailing hour.
    #[serde(default)]
    pub hour_check: u32,
}

fn default_all_check() -> u32 {
    1
}

impl Default for CheckQuotas {
    fn default() -> Self {
        Self {
            no_check: 0,
            all_check: 1,
            day_check: 0,
            hour_check: 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Timeouts
// ═══════════════════════════════════════════════════════════════════════════════

/// Coordinator wait times as duration strings (e.g. `"15s"`, `"1h"`).
/// Parsed to `Duration` internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Idle time after startup or reconfiguration before the first
    /// dispatch, letting node boot-time traffic settle.
    #[serde(default = "default_initial_timeout")]
    pub initial_timeout: String,

    /// Minimum idle between completing one action and arming the next.
    #[serde(default = "default_loop_timeout")]
    pub loop_timeout: String,

    /// Upper bound on how long an exchange may run before the
    /// coordinator gives up on it and proceeds to the next slice.
    #[serde(default = "default_crash_timeout")]
    pub crash_timeout: String,
}

fn default_initial_timeout() -> String {
    "60s".to_string()
}

fn default_loop_timeout() -> String {
    "15s".to_string()
}

fn default_crash_timeout() -> String {
    "1h".to_string()
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            initial_timeout: "60s".to_string(),
            loop_timeout: "15s".to_string(),
            crash_timeout: "1h".to_string(),
        }
    }
}

impl TimeoutConfig {
    pub fn initial_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.initial_timeout).unwrap_or(Duration::from_secs(60))
    }

    pub fn loop_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.loop_timeout).unwrap_or(Duration::from_secs(15))
    }

    pub fn crash_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.crash_timeout).unwrap_or(Duration::from_secs(3600))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `FullSyncCoordinator::spawn()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullSyncConfig {
    /// What to compare: full key-space by n-val, a rotating bucket list,
    /// or nothing at all.
    pub scope: SyncScope,

    /// Daily slice quotas per work-item kind.
    #[serde(default)]
    pub checks: CheckQuotas,

    /// Remote (sink) cluster endpoint.
    pub peer: Endpoint,

    /// Local (source) cluster endpoint.
    pub local: Endpoint,

    /// Name of the replication queue that receives repair entries.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Coordinator wait times.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_queue_name() -> String {
    "replq".to_string()
}

/// Slice count a disabled coordinator idles through: one per hour.
const DISABLED_SLICE_COUNT: u32 = 24;

/// Derive the effective schedule quotas for a scope.
///
/// - `all`: `(no_check, all_check, 0, 0)` - windowed comparisons are
///   meaningless without a bucket reference.
/// - `bucket`: all four quotas as configured.
/// - `disabled`: 24 no-op slices, one per hour.
pub fn wants_for(scope: &SyncScope, checks: &CheckQuotas) -> ScheduleWants {
    match scope {
        SyncScope::All { .. } => ScheduleWants {
            no_sync: checks.no_check,
            all_sync: checks.all_check,
            day_sync: 0,
            hour_sync: 0,
        },
        SyncScope::Bucket { .. } => ScheduleWants {
            no_sync: checks.no_check,
            all_sync: checks.all_check,
            day_sync: checks.day_check,
            hour_sync: checks.hour_check,
        },
        SyncScope::Disabled => ScheduleWants {
            no_sync: DISABLED_SLICE_COUNT,
            all_sync: 0,
            day_sync: 0,
            hour_sync: 0,
        },
    }
}

impl FullSyncConfig {
    /// Derive the effective schedule quotas for the configured scope.
    pub fn schedule_wants(&self) -> ScheduleWants {
        wants_for(&self.scope, &self.checks)
    }

    /// Validate the configuration.
    ///
    /// Rejects scope/quota combinations the dispatcher would refuse at
    /// runtime, and empty schedules.
    pub fn validate(&self) -> Result<()> {
        match &self.scope {
            SyncScope::All {
                local_nval,
                remote_nval,
            } => {
                if *local_nval == 0 || *remote_nval == 0 {
                    return Err(FullSyncError::Config(
                        "scope=all requires positive local and remote n-vals".to_string(),
                    ));
                }
                if self.checks.day_check != 0 || self.checks.hour_check != 0 {
                    return Err(FullSyncError::Config(format!(
                        "scope=all cannot schedule windowed checks (day_check={}, hour_check={})",
                        self.checks.day_check, self.checks.hour_check
                    )));
                }
            }
            SyncScope::Bucket { buckets } => {
                if buckets.is_empty() {
                    return Err(FullSyncError::Config(
                        "scope=bucket requires at least one bucket".to_string(),
                    ));
                }
            }
            SyncScope::Disabled => {}
        }

        if self.schedule_wants().slice_count() == 0 {
            return Err(FullSyncError::Config(
                "schedule quotas sum to zero; at least one slice per day is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a minimal config for testing, with sub-second timeouts so
    /// tests never sit out a real initial wait.
    pub fn for_testing() -> Self {
        Self {
            scope: SyncScope::Bucket {
                buckets: vec![BucketId::untyped("test-bucket")],
            },
            checks: CheckQuotas {
                no_check: 0,
                all_check: 1,
                day_check: 0,
                hour_check: 0,
            },
            peer: Endpoint::http("127.0.0.1", 18098),
            local: Endpoint::http("127.0.0.1", 8098),
            queue_name: "test_queue".to_string(),
            timeouts: TimeoutConfig {
                initial_timeout: "20ms".to_string(),
                loop_timeout: "10ms".to_string(),
                crash_timeout: "500ms".to_string(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_id_display() {
        assert_eq!(BucketId::untyped("users").to_string(), "users");
        assert_eq!(BucketId::typed("maps", "sessions").to_string(), "maps/sessions");
    }

    #[test]
    fn test_endpoint_base_url() {
        let ep = Endpoint::http("cluster-b.internal", 8098);
        assert_eq!(ep.base_url(), "http://cluster-b.internal:8098");
        assert_eq!(ep.to_string(), "http://cluster-b.internal:8098");
    }

    #[test]
    fn test_timeout_parsing() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.initial_timeout_duration(), Duration::from_secs(60));
        assert_eq!(timeouts.loop_timeout_duration(), Duration::from_secs(15));
        assert_eq!(timeouts.crash_timeout_duration(), Duration::from_secs(3600));
    }

    #[test]
    fn test_timeout_invalid_fallback() {
        let timeouts = TimeoutConfig {
            initial_timeout: "not a duration".to_string(),
            loop_timeout: "also bad".to_string(),
            crash_timeout: "nope".to_string(),
        };
        // Unparseable strings fall back to the stock waits
        assert_eq!(timeouts.initial_timeout_duration(), Duration::from_secs(60));
        assert_eq!(timeouts.loop_timeout_duration(), Duration::from_secs(15));
        assert_eq!(timeouts.crash_timeout_duration(), Duration::from_secs(3600));
    }

    #[test]
    fn test_wants_for_all_scope() {
        let config = FullSyncConfig {
            scope: SyncScope::All {
                local_nval: 3,
                remote_nval: 3,
            },
            checks: CheckQuotas {
                no_check: 10,
                all_check: 14,
                day_check: 0,
                hour_check: 0,
            },
            ..FullSyncConfig::for_testing()
        };
        let wants = config.schedule_wants();
        assert_eq!(wants.no_sync, 10);
        assert_eq!(wants.all_sync, 14);
        assert_eq!(wants.day_sync, 0);
        assert_eq!(wants.hour_sync, 0);
        assert_eq!(wants.slice_count(), 24);
    }

    #[test]
    fn test_wants_for_bucket_scope() {
        let config = FullSyncConfig {
            checks: CheckQuotas {
                no_check: 0,
                all_check: 1,
                day_check: 4,
                hour_check: 19,
            },
            ..FullSyncConfig::for_testing()
        };
        let wants = config.schedule_wants();
        assert_eq!(wants.slice_count(), 24);
        assert_eq!(wants.hour_sync, 19);
    }

    #[test]
    fn test_wants_for_disabled_scope() {
        let config = FullSyncConfig {
            scope: SyncScope::Disabled,
            checks: CheckQuotas {
                no_check: 5,
                all_check: 7,
                day_check: 9,
                hour_check: 11,
            },
            ..FullSyncConfig::for_testing()
        };
        // Disabled ignores configured quotas entirely
        let wants = config.schedule_wants();
        assert_eq!(wants.no_sync, 24);
        assert_eq!(wants.all_sync + wants.day_sync + wants.hour_sync, 0);
    }

    #[test]
    fn test_validate_rejects_windowed_checks_under_all() {
        let config = FullSyncConfig {
            scope: SyncScope::All {
                local_nval: 3,
                remote_nval: 3,
            },
            checks: CheckQuotas {
                no_check: 0,
                all_check: 1,
                day_check: 1,
                hour_check: 0,
            },
            ..FullSyncConfig::for_testing()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("day_check"));
    }

    #[test]
    fn test_validate_rejects_zero_nval() {
        let config = FullSyncConfig {
            scope: SyncScope::All {
                local_nval: 0,
                remote_nval: 3,
            },
            checks: CheckQuotas::default(),
            ..FullSyncConfig::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_bucket_list() {
        let config = FullSyncConfig {
            scope: SyncScope::Bucket { buckets: vec![] },
            ..FullSyncConfig::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_schedule() {
        let config = FullSyncConfig {
            checks: CheckQuotas {
                no_check: 0,
                all_check: 0,
                day_check: 0,
                hour_check: 0,
            },
            ..FullSyncConfig::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_disabled_with_zero_quotas() {
        let config = FullSyncConfig {
            scope: SyncScope::Disabled,
            checks: CheckQuotas {
                no_check: 0,
                all_check: 0,
                day_check: 0,
                hour_check: 0,
            },
            ..FullSyncConfig::for_testing()
        };
        // Disabled supplies its own 24-slice schedule
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = FullSyncConfig {
            scope: SyncScope::Bucket {
                buckets: vec![
                    BucketId::typed("maps", "sessions"),
                    BucketId::untyped("users"),
                ],
            },
            ..FullSyncConfig::for_testing()
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: FullSyncConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.scope, config.scope);
        assert_eq!(parsed.peer, config.peer);
        assert_eq!(parsed.queue_name, "test_queue");
    }

    #[test]
    fn test_scope_mode_tag() {
        let json = serde_json::to_string(&SyncScope::Disabled).unwrap();
        assert!(json.contains("\"mode\":\"disabled\""));

        let all: SyncScope =
            serde_json::from_str(r#"{"mode":"all","local_nval":3,"remote_nval":1}"#).unwrap();
        assert_eq!(
            all,
            SyncScope::All {
                local_nval: 3,
                remote_nval: 1
            }
        );
    }
}
