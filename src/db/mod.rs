//! Database layer for listing-tracker
//!
//! Handles SQLite persistence for discovered listings, entity content,
//! partition snapshots and the archive.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`listings`] - Identity rows written by listing crawls
//! - [`entities`] - Content rows: idempotent upsert, observations, refetch selection
//! - [`partitions`] - Partition registry, count snapshots, drift queries
//! - [`archive`] - Moving rows to the archive, listing and purging them
//!
//! Every row is scoped by a logical `table_name`, one per source, so several
//! sources can share one database file without their keys colliding.

use crate::error::DatabaseError;
use crate::types::{ArchiveEntry, Entity, EntityKey, EntityStatus, Partition, PartitionSnapshot};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod archive;
mod entities;
mod listings;
mod migrations;
mod partitions;

/// Listing discovered on a listing page, to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewListing {
    /// Identity
    pub key: EntityKey,
    /// Partition the listing was found under
    pub partition: String,
    /// Detail page locator
    pub locator: Option<String>,
    /// Unix timestamp of the run that found it
    pub first_seen_at: i64,
}

/// Entity content to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewEntity {
    /// Identity
    pub key: EntityKey,
    /// Partition the entity was discovered under
    pub partition: String,
    /// Detail page locator
    pub locator: Option<String>,
    /// Initial status
    pub status: EntityStatus,
    /// Initial NOT_FOUND streak
    pub not_found_streak: u32,
    /// Source-specific fields
    pub payload: serde_json::Value,
    /// Unix timestamp of first storage
    pub first_seen_at: i64,
    /// Unix timestamp of the detail fetch, if one happened
    pub last_observed_at: Option<i64>,
}

/// Result of re-fetching an entity that already has content
#[derive(Debug, Clone)]
pub struct ObservationUpdate {
    /// Status after classification
    pub status: EntityStatus,
    /// NOT_FOUND streak after classification
    pub not_found_streak: u32,
    /// Newly extracted fields; only keys absent from the stored payload are added
    pub payload: serde_json::Value,
    /// Unix timestamp of the fetch
    pub observed_at: i64,
}

/// Entity record from database (listings joined with content)
#[derive(Debug, Clone, FromRow)]
pub struct EntityRow {
    /// Source-scoped unique id
    pub source_id: String,
    /// Observation date (ISO-8601)
    pub observed_on: String,
    /// Partition name
    pub partition_name: String,
    /// Detail page locator
    pub locator: Option<String>,
    /// Stored status ("NEW" when no content row exists)
    pub status: String,
    /// Consecutive NOT_FOUND observations
    pub not_found_streak: i64,
    /// Payload as JSON text
    pub payload: String,
    /// Unix timestamp of first storage
    pub first_seen_at: i64,
    /// Unix timestamp of last detail fetch
    pub last_observed_at: Option<i64>,
}

impl TryFrom<EntityRow> for Entity {
    type Error = Error;

    fn try_from(row: EntityRow) -> Result<Self> {
        Ok(Entity {
            key: EntityKey::new(row.source_id, parse_date(&row.observed_on)?),
            partition: row.partition_name,
            locator: row.locator,
            status: EntityStatus::from_db(&row.status),
            not_found_streak: row.not_found_streak.max(0) as u32,
            first_seen_at: from_timestamp(row.first_seen_at),
            last_observed_at: row.last_observed_at.map(from_timestamp),
            payload: parse_payload(&row.payload),
        })
    }
}

/// Archived entity record from database
#[derive(Debug, Clone, FromRow)]
pub struct ArchiveRow {
    /// Logical table
    pub table_name: String,
    /// Source-scoped unique id
    pub source_id: String,
    /// Observation date (ISO-8601)
    pub observed_on: String,
    /// Partition name
    pub partition_name: String,
    /// Detail page locator
    pub locator: Option<String>,
    /// Status at archival time
    pub status: String,
    /// NOT_FOUND streak at archival time
    pub not_found_streak: i64,
    /// Payload as JSON text
    pub payload: String,
    /// Unix timestamp of first storage
    pub first_seen_at: i64,
    /// Unix timestamp of last detail fetch
    pub last_observed_at: Option<i64>,
    /// Unix timestamp of archival
    pub archived_at: i64,
}

impl TryFrom<ArchiveRow> for ArchiveEntry {
    type Error = Error;

    fn try_from(row: ArchiveRow) -> Result<Self> {
        Ok(ArchiveEntry {
            table: row.table_name,
            source_id: row.source_id,
            observed_on: parse_date(&row.observed_on)?,
            partition: row.partition_name,
            locator: row.locator,
            status: EntityStatus::from_db(&row.status),
            not_found_streak: row.not_found_streak.max(0) as u32,
            payload: parse_payload(&row.payload),
            first_seen_at: from_timestamp(row.first_seen_at),
            last_observed_at: row.last_observed_at.map(from_timestamp),
            archived_at: from_timestamp(row.archived_at),
        })
    }
}

/// Partition record from database
#[derive(Debug, Clone, FromRow)]
pub struct PartitionRow {
    /// Partition name
    pub partition_name: String,
    /// Listing locator
    pub locator: Option<String>,
    /// Most recent aggregate count
    pub last_count: Option<i64>,
    /// Unix timestamp of the last listing crawl
    pub last_crawl_at: Option<i64>,
}

impl From<PartitionRow> for Partition {
    fn from(row: PartitionRow) -> Self {
        Partition {
            name: row.partition_name,
            locator: row.locator,
            last_count: row.last_count,
            last_crawl_at: row.last_crawl_at.map(from_timestamp),
        }
    }
}

/// Partition snapshot record from database
#[derive(Debug, Clone, FromRow)]
pub struct SnapshotRow {
    /// Partition name
    pub partition_name: String,
    /// Snapshot date (ISO-8601)
    pub snapshot_on: String,
    /// Aggregate count
    pub item_count: i64,
    /// Unix timestamp of capture
    pub captured_at: i64,
}

impl TryFrom<SnapshotRow> for PartitionSnapshot {
    type Error = Error;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(PartitionSnapshot {
            partition: row.partition_name,
            snapshot_on: parse_date(&row.snapshot_on)?,
            item_count: row.item_count,
            captured_at: from_timestamp(row.captured_at),
        })
    }
}

/// Database handle for listing-tracker
pub struct Database {
    pool: SqlitePool,
}

/// Dates are stored as ISO-8601 text so SQLite's DATE() functions apply
pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a stored date; a trailing time-of-day component is ignored
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    let date_part = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| Error::InvalidData(format!("invalid stored date '{}': {}", value, e)))
}

fn from_timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

fn parse_payload(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Stored payload is not valid JSON, reading it as empty");
        serde_json::Value::Object(serde_json::Map::new())
    })
}

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("Failed to {}: {}", what, e)))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
