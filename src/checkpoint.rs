//! Resume points for incremental crawls
//!
//! A checkpoint is the latest observation date already in the store. It is
//! recomputed from the store on every call and never cached, so a run that
//! died halfway simply resumes from whatever it managed to persist.

use crate::Result;
use crate::config::CheckpointConfig;
use crate::db::Database;
use crate::types::RunContext;
use chrono::{Days, NaiveDate};
use std::sync::Arc;

/// Where a checkpoint value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointOrigin {
    /// Latest date found in the store
    Stored,
    /// Store was empty; run date minus the backfill window
    Backfill,
}

/// Lower bound for the next crawl
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// Latest covered date
    pub date: NaiveDate,
    /// How the date was obtained
    pub origin: CheckpointOrigin,
}

impl Checkpoint {
    /// True when the store already covers `run_date`
    pub fn is_current(&self, run_date: NaiveDate) -> bool {
        self.date >= run_date
    }
}

/// Computes checkpoints from the record store
#[derive(Clone)]
pub struct CheckpointTracker {
    db: Arc<Database>,
    backfill_window_days: u32,
}

impl CheckpointTracker {
    /// Create a tracker over `db`
    pub fn new(db: Arc<Database>, config: &CheckpointConfig) -> Self {
        Self {
            db,
            backfill_window_days: config.backfill_window_days,
        }
    }

    /// Latest observation date stored for `table`
    pub async fn last_checkpoint(&self, table: &str, ctx: &RunContext) -> Result<Checkpoint> {
        let stored = self.db.max_observed_on(table, None).await?;
        Ok(self.resolve(stored, ctx))
    }

    /// Latest observation date stored for one partition of `table`
    pub async fn last_checkpoint_in(
        &self,
        table: &str,
        partition: &str,
        ctx: &RunContext,
    ) -> Result<Checkpoint> {
        let stored = self.db.max_observed_on(table, Some(partition)).await?;
        Ok(self.resolve(stored, ctx))
    }

    /// Latest partition snapshot date stored for `table`
    pub async fn last_snapshot(&self, table: &str, ctx: &RunContext) -> Result<Checkpoint> {
        let stored = self.db.max_snapshot_on(table).await?;
        Ok(self.resolve(stored, ctx))
    }

    fn resolve(&self, stored: Option<NaiveDate>, ctx: &RunContext) -> Checkpoint {
        match stored {
            Some(date) => Checkpoint {
                date,
                origin: CheckpointOrigin::Stored,
            },
            None => Checkpoint {
                date: backfill_start(ctx.run_date, self.backfill_window_days),
                origin: CheckpointOrigin::Backfill,
            },
        }
    }
}

/// `run_date` minus the backfill window, saturating at the earliest date
pub(crate) fn backfill_start(run_date: NaiveDate, window_days: u32) -> NaiveDate {
    run_date
        .checked_sub_days(Days::new(u64::from(window_days)))
        .unwrap_or(NaiveDate::MIN)
}
