//! Core types and events for listing-tracker

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Natural identity of a tracked entity within a logical table
///
/// A listing is identified by the id the source assigns to it together with the
/// date it was posted/observed. The same source id re-posted on a later date is
/// a distinct entity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    /// Source-scoped unique id
    pub source_id: String,
    /// Observation (posting) date
    pub observed_on: NaiveDate,
}

impl EntityKey {
    /// Create a new EntityKey
    pub fn new(source_id: impl Into<String>, observed_on: NaiveDate) -> Self {
        Self {
            source_id: source_id.into(),
            observed_on,
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.source_id, self.observed_on)
    }
}

/// Lifecycle status of an entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    /// Discovered but never fetched (no content row yet)
    New,
    /// Detail page fetched and the listing is active
    Open,
    /// Detail page fetched and the listing was removed or expired
    Closed,
    /// Detail page could not be fetched
    NotFound,
}

impl EntityStatus {
    /// Text stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::New => "NEW",
            EntityStatus::Open => "OPEN",
            EntityStatus::Closed => "CLOSED",
            EntityStatus::NotFound => "NOT_FOUND",
        }
    }

    /// Parse stored text; unknown values are treated as NOT_FOUND
    pub fn from_db(value: &str) -> Self {
        match value {
            "NEW" => EntityStatus::New,
            "OPEN" => EntityStatus::Open,
            "CLOSED" => EntityStatus::Closed,
            // older rows were written with a space
            "NOT_FOUND" | "NOT FOUND" => EntityStatus::NotFound,
            _ => EntityStatus::NotFound,
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked listing as seen through the live store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Natural identity
    pub key: EntityKey,
    /// Partition the entity was discovered under
    pub partition: String,
    /// Detail page locator, if the source provided one
    pub locator: Option<String>,
    /// Current lifecycle status
    pub status: EntityStatus,
    /// Consecutive NOT_FOUND observations
    pub not_found_streak: u32,
    /// When the entity was first stored
    pub first_seen_at: DateTime<Utc>,
    /// When the detail page was last fetched (None while NEW)
    pub last_observed_at: Option<DateTime<Utc>>,
    /// Source-specific fields
    pub payload: serde_json::Value,
}

/// A named subdivision of the crawl space
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Partition name (e.g. "amman/accounting")
    pub name: String,
    /// Listing locator for this partition
    pub locator: Option<String>,
    /// Most recent aggregate count
    pub last_count: Option<i64>,
    /// When the partition's listing pages were last crawled
    pub last_crawl_at: Option<DateTime<Utc>>,
}

/// One day's aggregate count for a partition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    /// Partition name
    pub partition: String,
    /// Calendar date of the snapshot
    pub snapshot_on: NaiveDate,
    /// Aggregate listing count reported by the source
    pub item_count: i64,
    /// Exact capture time
    pub captured_at: DateTime<Utc>,
}

/// Copy of an entity moved out of the live store, as written to export artifacts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Logical table the entity belonged to
    pub table: String,
    /// Source-scoped unique id
    pub source_id: String,
    /// Observation (posting) date
    pub observed_on: NaiveDate,
    /// Partition the entity was discovered under
    pub partition: String,
    /// Detail page locator
    pub locator: Option<String>,
    /// Status at archival time
    pub status: EntityStatus,
    /// Consecutive NOT_FOUND observations at archival time
    pub not_found_streak: u32,
    /// Source-specific fields
    pub payload: serde_json::Value,
    /// When the entity was first stored
    pub first_seen_at: DateTime<Utc>,
    /// When the detail page was last fetched
    pub last_observed_at: Option<DateTime<Utc>>,
    /// When the entity was moved into the archive
    pub archived_at: DateTime<Utc>,
}

impl ArchiveEntry {
    /// Identity of the archived entity
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.source_id.clone(), self.observed_on)
    }
}

/// Per-run context threaded through every crawl step
///
/// Carries the run date explicitly so concurrent workers for different sources
/// never share a notion of "today".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunContext {
    /// Source name
    pub source: String,
    /// Logical table the run writes to
    pub table: String,
    /// Calendar date of the run
    pub run_date: NaiveDate,
    /// Instant the run started; used as the write timestamp
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    /// Context for a run starting at `now`
    pub fn new(source: impl Into<String>, table: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            table: table.into(),
            run_date: now.date_naive(),
            started_at: now,
        }
    }

    /// Context for a run on a given calendar date, starting at midnight UTC
    pub fn on_date(source: impl Into<String>, table: impl Into<String>, date: NaiveDate) -> Self {
        Self::new(source, table, date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Unix timestamp of the start of the run date
    pub fn run_date_start_ts(&self) -> i64 {
        self.run_date
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
            .timestamp()
    }
}

/// Diagnostic counts surfaced at the end of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Source name
    pub source: String,
    /// Fetch targets that exhausted every attempt
    pub fetch_failures: u64,
    /// Partitions selected for a listing crawl
    pub partitions_selected: u64,
    /// Partitions skipped because their count could not be collected
    pub partitions_skipped: u64,
    /// Partitions whose snapshot was recorded this run
    pub snapshots_recorded: u64,
    /// New listing rows discovered
    pub listings_inserted: u64,
    /// Entities stored for the first time
    pub entities_inserted: u64,
    /// Existing entities re-observed
    pub entities_updated: u64,
    /// Observations classified OPEN
    pub classified_open: u64,
    /// Observations classified CLOSED
    pub classified_closed: u64,
    /// Observations classified NOT_FOUND
    pub classified_not_found: u64,
    /// Entities moved into the archive
    pub rows_archived: u64,
    /// Archived rows written to an export artifact and purged
    pub rows_exported: u64,
    /// Export attempts that failed (rows stay archived)
    pub export_failures: u64,
    /// The run stopped early because it was cancelled
    pub cancelled: bool,
}

/// Event emitted during a run
///
/// Consumers subscribe via [`Crawler::subscribe`](crate::crawler::Crawler::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started
    RunStarted {
        /// Source name
        source: String,
        /// Run date
        run_date: NaiveDate,
    },

    /// One fetch attempt failed (more may follow)
    FetchAttemptFailed {
        /// Requested target
        target: String,
        /// Attempt number (1-based)
        attempt: u32,
        /// Error message
        error: String,
    },

    /// Every attempt for a target failed
    FetchExhausted {
        /// Requested target
        target: String,
        /// Attempts made
        attempts: u32,
    },

    /// Partition count could not be collected; partition treated as unchanged
    PartitionSkipped {
        /// Source name
        source: String,
        /// Partition name
        partition: String,
    },

    /// Listing pages of a partition were crawled
    PartitionCrawled {
        /// Source name
        source: String,
        /// Partition name
        partition: String,
        /// New listings stored
        inserted: u64,
    },

    /// An entity was classified from a detail fetch
    EntityClassified {
        /// Source name
        source: String,
        /// Entity identity
        key: EntityKey,
        /// Status before the fetch
        from: EntityStatus,
        /// Status after the fetch
        to: EntityStatus,
    },

    /// Entities were moved into the archive
    Archived {
        /// Logical table
        table: String,
        /// Entities moved
        count: u64,
    },

    /// The archive was exported and purged
    Exported {
        /// Logical table
        table: String,
        /// Artifact path
        path: PathBuf,
        /// Rows written
        rows: u64,
    },

    /// Export failed; rows remain archived
    ExportFailed {
        /// Logical table
        table: String,
        /// Error message
        error: String,
    },

    /// A run finished
    RunFinished {
        /// Final diagnostics
        report: RunReport,
    },
}
