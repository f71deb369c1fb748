//! Error types for listing-tracker
//!
//! Most failures in the crawl core are absorbed rather than raised: fetch
//! failures become NOT_FOUND classifications, duplicate identities become
//! `false` from an upsert, export failures leave rows in the archive. The
//! types here cover what does reach the caller (store and configuration
//! problems) plus the per-concern error enums used internally.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for listing-tracker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for listing-tracker
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Archive export or purge failed
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Page fetch error surfaced outside the retry boundary
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be interpreted (e.g. malformed date text)
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Archive export errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Writing the export artifact failed; archived rows were left in place
    #[error("export of table {table} to {path} failed: {reason}")]
    ExportFailed {
        /// Logical table being exported
        table: String,
        /// Target artifact path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// The artifact was written but the exported rows could not be purged
    #[error("purge of table {table} after export failed: {reason}")]
    PurgeFailed {
        /// Logical table being purged
        table: String,
        /// Underlying failure
        reason: String,
    },
}

/// Errors produced by a [`PageSource`](crate::fetcher::PageSource)
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, TLS, body read)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The source answered with a non-success status code
    #[error("unexpected status {code}")]
    Status {
        /// HTTP status code returned by the source
        code: u16,
    },

    /// The target could not be turned into a request at all
    #[error("invalid target {0}")]
    InvalidTarget(String),

    /// Source-specific failure reported by a custom `PageSource`
    #[error("{0}")]
    Source(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
