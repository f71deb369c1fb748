//! Partition selection for listing crawls
//!
//! Only partitions that changed (or were never crawled) get their listing
//! pages walked. A change is a difference between two count snapshots taken
//! `drift_lag_days` apart within the recent window; never-crawled partitions
//! are picked up by the cold-start rule.

use crate::Result;
use crate::config::ChangeDetectionConfig;
use crate::db::Database;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Why a partition was selected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionReason {
    /// Recent count change
    Drift,
    /// No listing has been stored for the partition yet
    ColdStart,
    /// Both of the above
    Both,
}

/// Partition chosen for a listing crawl
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedPartition {
    /// Partition name
    pub partition: String,
    /// Selection reason
    pub reason: SelectionReason,
}

/// Picks the partitions a run needs to crawl
#[derive(Clone)]
pub struct ChangeDetector {
    db: Arc<Database>,
    config: ChangeDetectionConfig,
}

impl ChangeDetector {
    /// Create a detector over `db`
    pub fn new(db: Arc<Database>, config: ChangeDetectionConfig) -> Self {
        Self { db, config }
    }

    /// Registered partitions of `table` needing a listing crawl, by name
    ///
    /// Partitions in `unavailable` (count collection failed this run) are
    /// treated as unchanged and left out.
    pub async fn partitions_needing_crawl(
        &self,
        table: &str,
        unavailable: &HashSet<String>,
    ) -> Result<Vec<SelectedPartition>> {
        let drifted = self
            .db
            .drifted_partitions(
                table,
                self.config.drift_lag_days,
                self.config.recency_window_days,
            )
            .await?;
        let cold = self.db.cold_partitions(table).await?;
        let registered: HashSet<String> = self
            .db
            .list_partitions(table)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();

        let mut selected: BTreeMap<String, SelectionReason> = BTreeMap::new();
        for name in drifted {
            selected.insert(name, SelectionReason::Drift);
        }
        for name in cold {
            selected
                .entry(name)
                .and_modify(|reason| *reason = SelectionReason::Both)
                .or_insert(SelectionReason::ColdStart);
        }

        let partitions: Vec<SelectedPartition> = selected
            .into_iter()
            .filter(|(name, _)| registered.contains(name))
            .filter(|(name, _)| {
                let skip = unavailable.contains(name);
                if skip {
                    tracing::debug!(table, partition = %name, "Skipping partition without a count this run");
                }
                !skip
            })
            .map(|(partition, reason)| SelectedPartition { partition, reason })
            .collect();

        tracing::debug!(table, selected = partitions.len(), "Partitions selected for crawl");
        Ok(partitions)
    }
}
