//! Run orchestration split into focused submodules.
//!
//! The `Crawler` struct and its per-run steps are organized by phase:
//! - [`snapshot`] - Daily partition count collection
//! - [`listing`] - Listing-page crawls of changed partitions
//! - [`refresh`] - Detail re-fetches and lifecycle classification
//!
//! A run for one source goes: counts → changed partitions → listing pages →
//! detail refresh → archive sweep → (on the trigger day) export and purge.

mod listing;
mod refresh;
mod snapshot;

use crate::archive::ArchiveManager;
use crate::change_detector::ChangeDetector;
use crate::checkpoint::CheckpointTracker;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, HttpSource, PageSource};
use crate::lifecycle::Classifier;
use crate::source::SourceAdapter;
use crate::types::{Event, RunContext, RunReport};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Outcome of one source's run inside [`Crawler::run_all`]
#[derive(Debug)]
pub struct SourceRun {
    /// Source name
    pub source: String,
    /// The run's report, or the store error that stopped it
    pub result: Result<RunReport>,
}

/// Incremental crawler over any number of sources
///
/// Cheap to clone; clones share the database, event channel and
/// cancellation token.
#[derive(Clone)]
pub struct Crawler {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to inspect stored rows
    pub db: Arc<Database>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Bounded-retry page fetcher
    pub(crate) fetcher: Fetcher,
    pub(crate) checkpoints: CheckpointTracker,
    pub(crate) detector: ChangeDetector,
    pub(crate) classifier: Classifier,
    /// Archive sweep and export
    pub archive: ArchiveManager,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Checked between fetches
    pub(crate) cancel: CancellationToken,
}

impl Crawler {
    /// Create a crawler with its own database
    ///
    /// Validates the configuration, opens (and migrates) the SQLite database
    /// and makes sure the export directory exists.
    pub async fn new(config: Config, source: Arc<dyn PageSource>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.persistence.export_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create export directory '{}': {}",
                        config.persistence.export_dir.display(),
                        e
                    ),
                ))
            })?;

        let db = Database::new(&config.persistence.database_path).await?;
        Self::with_database(config, Arc::new(db), source)
    }

    /// Create a crawler that fetches over HTTP
    pub async fn with_http(config: Config) -> Result<Self> {
        let source = Arc::new(HttpSource::new(&config.http)?);
        Self::new(config, source).await
    }

    /// Create a crawler over an already opened database
    pub fn with_database(
        config: Config,
        db: Arc<Database>,
        source: Arc<dyn PageSource>,
    ) -> Result<Self> {
        config.validate()?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let fetcher = Fetcher::new(source, config.retry.clone()).with_events(event_tx.clone());
        let checkpoints = CheckpointTracker::new(db.clone(), &config.checkpoint);
        let detector = ChangeDetector::new(db.clone(), config.change_detection.clone());
        let classifier = Classifier::new(&config.lifecycle);
        let archive = ArchiveManager::new(
            db.clone(),
            config.retention.clone(),
            config.persistence.export_dir.clone(),
            config.lifecycle.not_found_threshold,
        )
        .with_events(event_tx.clone());

        Ok(Self {
            db,
            config: Arc::new(config),
            fetcher,
            checkpoints,
            detector,
            classifier,
            archive,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to run events
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls behind by more than 1000 events receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ask every in-flight run to stop at its next fetch boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by runs of this crawler
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    /// Run one source
    ///
    /// Fetch failures are absorbed into the report; only store errors abort
    /// the run. A cancelled run stops before its next fetch and returns with
    /// `cancelled` set.
    pub async fn run(&self, adapter: &dyn SourceAdapter, ctx: &RunContext) -> Result<RunReport> {
        let mut report = RunReport {
            source: ctx.source.clone(),
            ..RunReport::default()
        };

        tracing::info!(source = %ctx.source, table = %ctx.table, run_date = %ctx.run_date, "Run started");
        self.emit_event(Event::RunStarted {
            source: ctx.source.clone(),
            run_date: ctx.run_date,
        });

        for partition in adapter.partitions() {
            self.db
                .register_partition(&ctx.table, &partition.name, Some(&partition.listing_url))
                .await?;
        }

        let checkpoint = self.checkpoints.last_checkpoint(&ctx.table, ctx).await?;

        let unavailable = self.collect_counts(adapter, ctx, &mut report).await?;

        if report.cancelled {
            return Ok(self.finish(report));
        }

        if checkpoint.is_current(ctx.run_date) {
            tracing::info!(
                source = %ctx.source,
                checkpoint = %checkpoint.date,
                "Store already covers the run date, skipping crawl"
            );
        } else {
            self.crawl_changed_partitions(adapter, ctx, &unavailable, &mut report)
                .await?;
            if report.cancelled {
                return Ok(self.finish(report));
            }

            self.refresh_entities(adapter, ctx, &mut report).await?;
            if report.cancelled {
                return Ok(self.finish(report));
            }
        }

        report.rows_archived = self
            .archive
            .sweep(&ctx.table, self.config.retention.retention_days, ctx)
            .await?;

        match self.archive.scheduled_export(&ctx.table, ctx).await {
            Ok(Some(export)) => report.rows_exported = export.rows,
            Ok(None) => {}
            Err(e) => {
                // Rows stay in the archive and go out with the next export
                tracing::warn!(source = %ctx.source, error = %e, "Archive export failed");
                report.export_failures += 1;
            }
        }

        Ok(self.finish(report))
    }

    /// Run every source concurrently, one task per source
    ///
    /// Each source gets its own [`RunContext`] derived from `now`. Results are
    /// returned in completion order.
    pub async fn run_all(
        &self,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        now: DateTime<Utc>,
    ) -> Vec<SourceRun> {
        let mut tasks = tokio::task::JoinSet::new();
        let mut names = HashMap::new();

        for adapter in adapters {
            let crawler = self.clone();
            let name = adapter.name().to_string();
            let ctx = RunContext::new(adapter.name(), adapter.table(), now);
            let handle = tasks.spawn(async move { crawler.run(adapter.as_ref(), &ctx).await });
            names.insert(handle.id(), name);
        }

        let mut runs = Vec::with_capacity(names.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    let source = names.remove(&id).unwrap_or_default();
                    if let Err(e) = &result {
                        tracing::error!(source = %source, error = %e, "Run failed");
                    }
                    runs.push(SourceRun { source, result });
                }
                Err(join_error) => {
                    let source = names.remove(&join_error.id()).unwrap_or_default();
                    tracing::error!(source = %source, error = %join_error, "Run task panicked");
                    runs.push(SourceRun {
                        source,
                        result: Err(Error::Other(format!("run task failed: {}", join_error))),
                    });
                }
            }
        }

        runs
    }

    /// True once cancellation was requested; records it on the report
    pub(crate) fn check_cancelled(&self, report: &mut RunReport) -> bool {
        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }
        report.cancelled
    }

    fn finish(&self, report: RunReport) -> RunReport {
        tracing::info!(
            source = %report.source,
            fetch_failures = report.fetch_failures,
            partitions_selected = report.partitions_selected,
            partitions_skipped = report.partitions_skipped,
            listings_inserted = report.listings_inserted,
            entities_inserted = report.entities_inserted,
            entities_updated = report.entities_updated,
            classified_open = report.classified_open,
            classified_closed = report.classified_closed,
            classified_not_found = report.classified_not_found,
            rows_archived = report.rows_archived,
            rows_exported = report.rows_exported,
            export_failures = report.export_failures,
            cancelled = report.cancelled,
            "Run finished"
        );
        self.emit_event(Event::RunFinished {
            report: report.clone(),
        });
        report
    }
}
