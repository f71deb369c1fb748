//! Archival and retention
//!
//! Two phases keep the live store bounded:
//!
//! - **sweep** moves closed, terminally missing and aged-out entities from the
//!   live tables into `archived_entities`, batch by batch;
//! - **export and purge** writes a table's whole archive set to a JSON Lines
//!   artifact and only then deletes the exported rows.
//!
//! If writing the artifact fails, nothing is deleted and the next export
//! picks the rows up again. Exporting twice on the same day merges into the
//! same artifact, keyed by identity, so an artifact never holds a row twice.

use crate::config::RetentionConfig;
use crate::db::Database;
use crate::error::{ArchiveError, Error, Result};
use crate::types::{ArchiveEntry, EntityKey, Event, RunContext};
use chrono::{Datelike, Days, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

/// Result of a successful export
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportReport {
    /// Logical table exported
    pub table: String,
    /// Artifact written
    pub path: PathBuf,
    /// Rows exported (and purged) by this call
    pub rows: u64,
}

/// Owns the archive set and its export/purge cycle
#[derive(Clone)]
pub struct ArchiveManager {
    db: Arc<Database>,
    config: RetentionConfig,
    export_dir: PathBuf,
    not_found_threshold: u32,
    /// One lock per logical table; sweep and export of a table never overlap
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl ArchiveManager {
    /// Create a manager writing artifacts to `export_dir`
    pub fn new(
        db: Arc<Database>,
        config: RetentionConfig,
        export_dir: PathBuf,
        not_found_threshold: u32,
    ) -> Self {
        Self {
            db,
            config,
            export_dir,
            not_found_threshold: not_found_threshold.max(1),
            locks: Arc::new(Mutex::new(HashMap::new())),
            event_tx: None,
        }
    }

    /// Emit archive events on this channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Move archivable entities of `table` into the archive
    ///
    /// Archivable: CLOSED, terminal NOT_FOUND, or observed more than
    /// `max_age_days` before the run date. Returns the number of rows moved.
    pub async fn sweep(&self, table: &str, max_age_days: u32, ctx: &RunContext) -> Result<u64> {
        let lock = self.table_lock(table).await;
        let _guard = lock.lock().await;

        let cutoff = ctx
            .run_date
            .checked_sub_days(Days::new(u64::from(max_age_days)))
            .unwrap_or(NaiveDate::MIN);

        let moved = self
            .db
            .archive_matching(
                table,
                cutoff,
                self.not_found_threshold,
                ctx.started_at.timestamp(),
                self.config.sweep_batch_size,
            )
            .await?;

        if moved > 0 {
            tracing::info!(table, moved, cutoff = %cutoff, "Moved entities to archive");
            self.emit(Event::Archived {
                table: table.to_string(),
                count: moved,
            });
        } else {
            tracing::debug!(table, cutoff = %cutoff, "Nothing to archive");
        }

        Ok(moved)
    }

    /// Export the full archive set of `table` and purge what was exported
    pub async fn export_and_purge(&self, table: &str, ctx: &RunContext) -> Result<ExportReport> {
        let lock = self.table_lock(table).await;
        let _guard = lock.lock().await;

        let path = self.export_path(table, ctx.run_date);
        let entries = self.db.list_archived(table).await?;

        if let Err(reason) = write_artifact(&path, &entries).await {
            let error = ArchiveError::ExportFailed {
                table: table.to_string(),
                path: path.clone(),
                reason,
            };
            tracing::error!(table, path = %path.display(), error = %error, "Archive export failed; rows kept");
            self.emit(Event::ExportFailed {
                table: table.to_string(),
                error: error.to_string(),
            });
            return Err(Error::Archive(error));
        }

        let keys: Vec<EntityKey> = entries.iter().map(ArchiveEntry::key).collect();
        let purged = self.db.purge_archived(table, &keys).await.map_err(|e| {
            Error::Archive(ArchiveError::PurgeFailed {
                table: table.to_string(),
                reason: e.to_string(),
            })
        })?;

        tracing::info!(
            table,
            path = %path.display(),
            rows = entries.len(),
            purged,
            "Exported and purged archive"
        );
        self.emit(Event::Exported {
            table: table.to_string(),
            path: path.clone(),
            rows: entries.len() as u64,
        });

        Ok(ExportReport {
            table: table.to_string(),
            path,
            rows: entries.len() as u64,
        })
    }

    /// Run [`export_and_purge`](Self::export_and_purge) if today is the
    /// configured export day of the month
    pub async fn scheduled_export(&self, table: &str, ctx: &RunContext) -> Result<Option<ExportReport>> {
        if ctx.run_date.day() != self.config.export_trigger_day {
            return Ok(None);
        }
        self.export_and_purge(table, ctx).await.map(Some)
    }

    /// Artifact path for `table` on `date`
    pub fn export_path(&self, table: &str, date: NaiveDate) -> PathBuf {
        self.export_dir.join(format!(
            "archived_{}_{}.jsonl",
            sanitize_table_name(table),
            date.format("%Y%m%d")
        ))
    }

    async fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}

/// Keep artifact names to a portable character set
fn sanitize_table_name(table: &str) -> String {
    table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Write `entries` as JSON Lines, merged with any artifact already at `path`
///
/// The file is written next to the target and renamed over it.
async fn write_artifact(path: &Path, entries: &[ArchiveEntry]) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create export directory '{}': {}", parent.display(), e))?;
    }

    let current: HashSet<EntityKey> = entries.iter().map(ArchiveEntry::key).collect();
    let mut body = String::new();

    // Rows from an earlier export the same day, unless re-exported now
    match tokio::fs::read_to_string(path).await {
        Ok(existing) => {
            for line in existing.lines().filter(|l| !l.trim().is_empty()) {
                let entry: ArchiveEntry = serde_json::from_str(line)
                    .map_err(|e| format!("existing artifact is not valid JSON Lines: {}", e))?;
                if !current.contains(&entry.key()) {
                    body.push_str(line);
                    body.push('\n');
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(format!("failed to read existing artifact: {}", e)),
    }

    for entry in entries {
        let line = serde_json::to_string(entry).map_err(|e| format!("failed to serialize row: {}", e))?;
        body.push_str(&line);
        body.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp, body.as_bytes())
        .await
        .map_err(|e| format!("failed to write temp file '{}': {}", tmp.display(), e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        format!(
            "failed to rename temp file '{}' -> '{}': {}",
            tmp.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}
