//! # listing-tracker
//!
//! Incremental crawl state machine and archival engine for time-varying
//! listings (job postings, classified ads).
//!
//! ## Design Philosophy
//!
//! listing-tracker is designed to be:
//! - **Incremental** - Each run resumes from what the store already holds
//! - **Idempotent** - Every record is stored once per natural identity
//! - **Bounded** - Closed and aged-out records are archived, exported and purged
//! - **Library-first** - Sources plug in through [`SourceAdapter`]; scheduling is the caller's
//!
//! ## Quick Start
//!
//! ```no_run
//! use listing_tracker::{Config, Crawler, RunContext, SourceAdapter};
//! use std::sync::Arc;
//!
//! # async fn example(adapter: Arc<dyn SourceAdapter>) -> Result<(), Box<dyn std::error::Error>> {
//! let crawler = Crawler::with_http(Config::default()).await?;
//!
//! // Subscribe to events
//! let mut events = crawler.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let ctx = RunContext::new(adapter.name(), adapter.table(), chrono::Utc::now());
//! let report = crawler.run(adapter.as_ref(), &ctx).await?;
//! println!("{} new listings", report.listings_inserted);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archival and retention
pub mod archive;
/// Partition change detection
pub mod change_detector;
/// Crawl resume points
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Run orchestration (decomposed into per-phase submodules)
pub mod crawler;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Bounded-retry page fetching
pub mod fetcher;
/// Entity lifecycle classification
pub mod lifecycle;
/// Retry logic with randomized backoff
pub mod retry;
/// Per-source capability set
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveManager, ExportReport};
pub use change_detector::{ChangeDetector, SelectedPartition, SelectionReason};
pub use checkpoint::{Checkpoint, CheckpointOrigin, CheckpointTracker};
pub use config::{AmbiguityPolicy, Config};
pub use crawler::{Crawler, SourceRun};
pub use db::Database;
pub use error::{ArchiveError, DatabaseError, Error, FetchError, Result};
pub use fetcher::{FetchFailure, FetchOutcome, Fetcher, HttpSource, PageSource, RawPage};
pub use lifecycle::{Classifier, LifecycleState, Transition};
pub use source::{
    DiscoveredListing, EntityRef, Extraction, ListingPage, PartitionSpec, SourceAdapter,
    StatusHint,
};
pub use types::{
    ArchiveEntry, Entity, EntityKey, EntityStatus, Event, Partition, PartitionSnapshot,
    RunContext, RunReport,
};

/// Run every source once, stopping early on a termination signal.
///
/// On SIGTERM/SIGINT (Ctrl+C elsewhere) the crawler is cancelled; each run
/// stops at its next fetch boundary and reports `cancelled`.
///
/// # Example
///
/// ```no_run
/// use listing_tracker::{Config, Crawler, SourceAdapter, run_until_signal};
/// use std::sync::Arc;
///
/// # async fn example(adapters: Vec<Arc<dyn SourceAdapter>>) -> Result<(), Box<dyn std::error::Error>> {
/// let crawler = Crawler::with_http(Config::default()).await?;
/// for run in run_until_signal(&crawler, adapters).await {
///     println!("{}: {:?}", run.source, run.result.map(|r| r.listings_inserted));
/// }
/// # Ok(())
/// # }
/// ```
pub async fn run_until_signal(
    crawler: &Crawler,
    adapters: Vec<std::sync::Arc<dyn SourceAdapter>>,
) -> Vec<SourceRun> {
    let runs = crawler.run_all(adapters, chrono::Utc::now());
    tokio::pin!(runs);

    tokio::select! {
        results = &mut runs => results,
        _ = wait_for_signal() => {
            tracing::info!("Cancelling in-flight runs");
            crawler.cancel();
            runs.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = signal_or_pending(tokio::signal::ctrl_c()) => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)")
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
            signal_or_pending(tokio::signal::ctrl_c()).await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    signal_or_pending(tokio::signal::ctrl_c()).await;
    tracing::info!("Received Ctrl+C signal");
}

/// Resolve when `listener` reports a signal
///
/// A listener that fails never resolves; the run keeps going until its own
/// completion instead of being cancelled.
async fn signal_or_pending<F>(listener: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = listener.await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        std::future::pending::<()>().await;
    }
}
