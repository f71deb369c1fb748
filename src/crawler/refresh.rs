//! Detail re-fetches and lifecycle classification.

use crate::Result;
use crate::db::{NewEntity, ObservationUpdate};
use crate::fetcher::FetchOutcome;
use crate::lifecycle::LifecycleState;
use crate::source::{EntityRef, Extraction, SourceAdapter, StatusHint};
use crate::types::{Entity, EntityStatus, Event, RunContext, RunReport};

use super::Crawler;

impl Crawler {
    /// Re-fetch and classify every entity due on the run date
    pub(crate) async fn refresh_entities(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> Result<()> {
        let candidates = self
            .db
            .refetch_candidates(
                &ctx.table,
                self.classifier.refetch_since(ctx.run_date),
                ctx.run_date_start_ts(),
                self.classifier.not_found_threshold(),
            )
            .await?;

        let due: Vec<Entity> = candidates
            .into_iter()
            .filter(|e| self.classifier.is_due(e, ctx.run_date))
            .collect();
        tracing::debug!(table = %ctx.table, due = due.len(), "Entities due for refresh");

        for entity in &due {
            if self.check_cancelled(report) {
                break;
            }
            self.refresh_entity(adapter, entity, ctx, report).await?;
        }

        Ok(())
    }

    async fn refresh_entity(
        &self,
        adapter: &dyn SourceAdapter,
        entity: &Entity,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> Result<()> {
        let entity_ref = EntityRef {
            key: entity.key.clone(),
            partition: entity.partition.clone(),
            locator: entity.locator.clone(),
        };

        let Some(url) = adapter.detail_url(&entity_ref) else {
            tracing::debug!(key = %entity.key, "No detail URL, leaving entity as is");
            return Ok(());
        };

        let extraction = match self.fetch_detail(adapter, &entity_ref, &url, report).await {
            Some(extraction) => extraction,
            // Cancelled before the fallback was tried: no observation
            None if report.cancelled => return Ok(()),
            None => Extraction::status_only(StatusHint::NotFound),
        };

        let transition = self
            .classifier
            .classify(&LifecycleState::from(entity), extraction.status);
        match transition.to {
            EntityStatus::Open => report.classified_open += 1,
            EntityStatus::Closed => report.classified_closed += 1,
            EntityStatus::NotFound => report.classified_not_found += 1,
            EntityStatus::New => {}
        }

        let observed_at = ctx.started_at.timestamp();
        if entity.status == EntityStatus::New {
            let inserted = self
                .db
                .upsert_if_absent(
                    &ctx.table,
                    &NewEntity {
                        key: entity.key.clone(),
                        partition: entity.partition.clone(),
                        locator: entity.locator.clone(),
                        status: transition.to,
                        not_found_streak: transition.not_found_streak,
                        payload: extraction.payload,
                        first_seen_at: entity.first_seen_at.timestamp(),
                        last_observed_at: Some(observed_at),
                    },
                )
                .await?;
            if inserted {
                report.entities_inserted += 1;
            }
        } else {
            self.db
                .record_observation(
                    &ctx.table,
                    &entity.key,
                    &ObservationUpdate {
                        status: transition.to,
                        not_found_streak: transition.not_found_streak,
                        payload: extraction.payload,
                        observed_at,
                    },
                )
                .await?;
            report.entities_updated += 1;
        }

        if transition.from != transition.to {
            tracing::debug!(key = %entity.key, from = %transition.from, to = %transition.to, "Entity reclassified");
            self.emit_event(Event::EntityClassified {
                source: ctx.source.clone(),
                key: entity.key.clone(),
                from: transition.from,
                to: transition.to,
            });
        }

        Ok(())
    }

    /// Fetch and extract a detail page, trying the fallback URL once
    ///
    /// `None` when every attempt failed.
    async fn fetch_detail(
        &self,
        adapter: &dyn SourceAdapter,
        entity: &EntityRef,
        url: &str,
        report: &mut RunReport,
    ) -> Option<Extraction> {
        match self.fetcher.fetch(url).await {
            FetchOutcome::Fetched(page) => return Some(adapter.extract(entity, &page)),
            FetchOutcome::Failed(_) => report.fetch_failures += 1,
        }

        let fallback = adapter.fallback_detail_url(entity)?;
        if self.check_cancelled(report) {
            return None;
        }

        tracing::debug!(key = %entity.key, fallback = %fallback, "Trying fallback detail URL");
        match self.fetcher.fetch(&fallback).await {
            FetchOutcome::Fetched(page) => Some(adapter.extract(entity, &page)),
            FetchOutcome::Failed(_) => {
                report.fetch_failures += 1;
                None
            }
        }
    }
}
