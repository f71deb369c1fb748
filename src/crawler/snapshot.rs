//! Daily partition count collection.

use crate::Result;
use crate::fetcher::FetchOutcome;
use crate::source::SourceAdapter;
use crate::types::{Event, RunContext, RunReport};
use std::collections::HashSet;

use super::Crawler;

impl Crawler {
    /// Record today's aggregate count for every partition of the source
    ///
    /// Runs at most once per day per table: when a snapshot for the run date
    /// already exists nothing is fetched. Returns the partitions whose count
    /// could not be collected; the change detector treats them as unchanged.
    pub(crate) async fn collect_counts(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> Result<HashSet<String>> {
        let mut unavailable = HashSet::new();

        let last = self.checkpoints.last_snapshot(&ctx.table, ctx).await?;
        if last.is_current(ctx.run_date) {
            tracing::debug!(table = %ctx.table, "Partition counts already collected today");
            return Ok(unavailable);
        }

        for partition in adapter.partitions() {
            if self.check_cancelled(report) {
                break;
            }

            let count = match self.fetcher.fetch(&partition.count_url).await {
                FetchOutcome::Fetched(page) => adapter.parse_count(&partition, &page),
                FetchOutcome::Failed(failure) => {
                    report.fetch_failures += 1;
                    tracing::warn!(
                        partition = %partition.name,
                        attempts = failure.attempts,
                        error = %failure.last_error,
                        "Partition count unavailable"
                    );
                    None
                }
            };

            let Some(count) = count else {
                report.partitions_skipped += 1;
                self.emit_event(Event::PartitionSkipped {
                    source: ctx.source.clone(),
                    partition: partition.name.clone(),
                });
                unavailable.insert(partition.name);
                continue;
            };

            let recorded = self
                .db
                .record_snapshot(
                    &ctx.table,
                    &partition.name,
                    ctx.run_date,
                    count,
                    ctx.started_at.timestamp(),
                )
                .await?;
            if recorded {
                report.snapshots_recorded += 1;
            }
        }

        Ok(unavailable)
    }
}
