//! Listing-page crawls of changed partitions.

use crate::Result;
use crate::db::NewListing;
use crate::fetcher::FetchOutcome;
use crate::source::{PartitionSpec, SourceAdapter};
use crate::types::{Event, RunContext, RunReport};
use std::collections::HashSet;

use super::Crawler;

impl Crawler {
    /// Crawl listing pages of every partition the change detector selects
    pub(crate) async fn crawl_changed_partitions(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &RunContext,
        unavailable: &HashSet<String>,
        report: &mut RunReport,
    ) -> Result<()> {
        let selected = self
            .detector
            .partitions_needing_crawl(&ctx.table, unavailable)
            .await?;
        report.partitions_selected = selected.len() as u64;

        let specs = adapter.partitions();
        for selection in selected {
            let Some(spec) = specs.iter().find(|s| s.name == selection.partition) else {
                // Registered by an earlier run but no longer offered by the source
                tracing::debug!(partition = %selection.partition, "Selected partition unknown to source");
                continue;
            };

            tracing::debug!(partition = %spec.name, reason = ?selection.reason, "Crawling partition");
            self.crawl_partition(adapter, spec, ctx, report).await?;

            if report.cancelled {
                break;
            }
        }

        Ok(())
    }

    /// Walk a partition's listing pages newest-first down to its checkpoint
    ///
    /// Each page is stored in one transaction. Paging stops at the first page
    /// reaching below the checkpoint, at the last page, on an empty page, or
    /// when a page cannot be fetched.
    async fn crawl_partition(
        &self,
        adapter: &dyn SourceAdapter,
        spec: &PartitionSpec,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> Result<()> {
        let lower_bound = self
            .checkpoints
            .last_checkpoint_in(&ctx.table, &spec.name, ctx)
            .await?
            .date;

        let mut inserted = 0u64;
        let mut page_number = 1u32;

        loop {
            if self.check_cancelled(report) {
                break;
            }

            let url = adapter.listing_url(spec, page_number);
            let page = match self.fetcher.fetch(&url).await {
                FetchOutcome::Fetched(page) => page,
                FetchOutcome::Failed(failure) => {
                    report.fetch_failures += 1;
                    tracing::warn!(
                        partition = %spec.name,
                        page = page_number,
                        attempts = failure.attempts,
                        "Listing page unavailable, stopping partition"
                    );
                    break;
                }
            };

            let parsed = adapter.parse_listing(spec, &page, ctx);
            let Some(oldest) = parsed.oldest() else {
                break;
            };

            let rows: Vec<NewListing> = parsed
                .listings
                .iter()
                .filter(|l| l.observed_on >= lower_bound)
                .map(|l| NewListing {
                    key: l.key(),
                    partition: spec.name.clone(),
                    locator: l.locator.clone(),
                    first_seen_at: ctx.started_at.timestamp(),
                })
                .collect();
            inserted += self.db.record_listings_batch(&ctx.table, &rows).await?;

            let last_page = parsed.total_pages.is_some_and(|total| page_number >= total);
            if oldest < lower_bound || last_page {
                break;
            }
            page_number += 1;
        }

        report.listings_inserted += inserted;

        if !report.cancelled {
            self.db
                .mark_partition_crawled(&ctx.table, &spec.name, ctx.started_at.timestamp())
                .await?;
        }

        tracing::info!(partition = %spec.name, inserted, pages = page_number, "Partition crawled");
        self.emit_event(Event::PartitionCrawled {
            source: ctx.source.clone(),
            partition: spec.name.clone(),
            inserted,
        });

        Ok(())
    }
}
