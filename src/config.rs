//! Configuration types for listing-tracker

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration
///
/// Every field has a default, so `Config::default()` reproduces the cadence the
/// downloaders were tuned for: 5 fetch attempts with 1–5 s backoff, a 29 day
/// backfill window, a 90 day re-fetch horizon and retention, and a monthly
/// export on the 1st.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage locations
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP client settings for the default page source
    #[serde(default)]
    pub http: HttpConfig,

    /// Bounded retry for page fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Resume-point computation
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Partition change detection
    #[serde(default)]
    pub change_detection: ChangeDetectionConfig,

    /// Entity status lifecycle
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Archival and export cadence
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Config {
    /// Check the configuration for values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one fetch attempt is required",
            ));
        }
        if self.retry.min_backoff > self.retry.max_backoff {
            return Err(Error::config(
                "retry.min_backoff",
                format!(
                    "min_backoff ({:?}) exceeds max_backoff ({:?})",
                    self.retry.min_backoff, self.retry.max_backoff
                ),
            ));
        }
        if self.change_detection.drift_lag_days == 0 {
            return Err(Error::config(
                "change_detection.drift_lag_days",
                "drift lag must be at least one day",
            ));
        }
        if self.lifecycle.not_found_threshold == 0 {
            return Err(Error::config(
                "lifecycle.not_found_threshold",
                "threshold must be at least 1",
            ));
        }
        if self.lifecycle.refetch_interval_days == 0 {
            return Err(Error::config(
                "lifecycle.refetch_interval_days",
                "interval must be at least 1",
            ));
        }
        // 28 keeps the trigger reachable in every month
        if !(1..=28).contains(&self.retention.export_trigger_day) {
            return Err(Error::config(
                "retention.export_trigger_day",
                format!(
                    "day {} is outside 1..=28",
                    self.retention.export_trigger_day
                ),
            ));
        }
        if self.retention.sweep_batch_size == 0 {
            return Err(Error::config(
                "retention.sweep_batch_size",
                "batch size must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./listing-tracker.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory receiving archive export artifacts (default: "./exports")
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            export_dir: default_export_dir(),
        }
    }
}

/// HTTP client configuration for [`HttpSource`](crate::fetcher::HttpSource)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry behavior for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts per target, including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lower bound of the random pause between attempts (default: 1 second)
    #[serde(default = "default_min_backoff", with = "duration_serde")]
    pub min_backoff: Duration,

    /// Upper bound of the random pause between attempts (default: 5 seconds)
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Resume-point configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// How far back an empty table starts crawling (default: 29 days)
    #[serde(default = "default_backfill_window_days")]
    pub backfill_window_days: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backfill_window_days: default_backfill_window_days(),
        }
    }
}

/// Partition change detection configuration
///
/// Both values are empirical. `drift_lag_days` is the distance between the two
/// snapshots whose counts are compared; `recency_window_days` is how far behind
/// the newest snapshot a partition's snapshot may lag and still be trusted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeDetectionConfig {
    /// Days between compared snapshots (default: 2)
    #[serde(default = "default_drift_lag_days")]
    pub drift_lag_days: u32,

    /// Snapshot trust window relative to the newest snapshot (default: 5)
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: u32,
}

impl Default for ChangeDetectionConfig {
    fn default() -> Self {
        Self {
            drift_lag_days: default_drift_lag_days(),
            recency_window_days: default_recency_window_days(),
        }
    }
}

/// How to classify a fetched page whose content lacks the expected structure
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Count it as a NOT_FOUND observation (default)
    #[default]
    NotFound,
    /// Treat it as an explicit closure
    Closed,
}

/// Entity lifecycle configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Entities older than this are no longer re-fetched (default: 90 days)
    #[serde(default = "default_refetch_horizon_days")]
    pub refetch_horizon_days: u32,

    /// Consecutive NOT_FOUND observations that make NOT_FOUND terminal (default: 3)
    #[serde(default = "default_not_found_threshold")]
    pub not_found_threshold: u32,

    /// Re-fetch an already classified entity only when its age in days is a
    /// multiple of this value (default: 1, i.e. every run)
    #[serde(default = "default_refetch_interval_days")]
    pub refetch_interval_days: u32,

    /// Classification for structurally ambiguous pages
    #[serde(default)]
    pub ambiguous_as: AmbiguityPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            refetch_horizon_days: default_refetch_horizon_days(),
            not_found_threshold: default_not_found_threshold(),
            refetch_interval_days: default_refetch_interval_days(),
            ambiguous_as: AmbiguityPolicy::default(),
        }
    }
}

/// Archival and export configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Entities observed longer ago than this are archived (default: 90 days)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Day of month on which the archive is exported and purged (default: 1)
    #[serde(default = "default_export_trigger_day")]
    pub export_trigger_day: u32,

    /// Entities moved per archive transaction (default: 500)
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            export_trigger_day: default_export_trigger_day(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("listing-tracker.db")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("listing-tracker/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    5
}

fn default_min_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_backfill_window_days() -> u32 {
    29
}

fn default_drift_lag_days() -> u32 {
    2
}

fn default_recency_window_days() -> u32 {
    5
}

fn default_refetch_horizon_days() -> u32 {
    90
}

fn default_not_found_threshold() -> u32 {
    3
}

fn default_refetch_interval_days() -> u32 {
    1
}

fn default_retention_days() -> u32 {
    90
}

fn default_export_trigger_day() -> u32 {
    1
}

fn default_sweep_batch_size() -> u32 {
    500
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
