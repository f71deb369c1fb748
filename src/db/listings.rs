//! Identity rows written by listing crawls.

use crate::Result;
use chrono::NaiveDate;

use super::{Database, NewListing, format_date, parse_date, query_failed};

// SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999.
// Each listing uses 6 bind variables, so max 166 listings per statement.
const MAX_LISTINGS_PER_BATCH: usize = 166;

impl Database {
    /// Record a discovered listing
    ///
    /// Returns `false` when the identity already exists or has been retired
    /// into the archive; the existing row is left untouched.
    pub async fn record_listing(&self, table: &str, listing: &NewListing) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO listings (
                table_name, source_id, observed_on, partition_name, locator, first_seen_at
            )
            SELECT v.table_name, v.source_id, v.observed_on, v.partition_name, v.locator, v.first_seen_at
            FROM (
                SELECT ? AS table_name, ? AS source_id, ? AS observed_on,
                       ? AS partition_name, ? AS locator, ? AS first_seen_at
            ) AS v
            WHERE NOT EXISTS (
                SELECT 1 FROM retired_identities r
                WHERE r.table_name = v.table_name
                    AND r.source_id = v.source_id
                    AND r.observed_on = v.observed_on
            )
            ON CONFLICT (table_name, source_id, observed_on) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(&listing.key.source_id)
        .bind(format_date(listing.key.observed_on))
        .bind(&listing.partition)
        .bind(&listing.locator)
        .bind(listing.first_seen_at)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("insert listing", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a page of discovered listings in one transaction
    ///
    /// Returns the number of listings that were new. Retired identities are
    /// skipped. Either every listing of the page is stored or none is.
    pub async fn record_listings_batch(&self, table: &str, listings: &[NewListing]) -> Result<u64> {
        if listings.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin listing batch", e))?;

        let mut inserted = 0;
        for chunk in listings.chunks(MAX_LISTINGS_PER_BATCH) {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO listings (table_name, source_id, observed_on, partition_name, locator, first_seen_at) \
                 SELECT column1, column2, column3, column4, column5, column6 FROM (",
            );

            query_builder.push_values(chunk, |mut b, listing| {
                b.push_bind(table)
                    .push_bind(&listing.key.source_id)
                    .push_bind(format_date(listing.key.observed_on))
                    .push_bind(&listing.partition)
                    .push_bind(&listing.locator)
                    .push_bind(listing.first_seen_at);
            });
            query_builder.push(
                ") AS v WHERE NOT EXISTS (\
                 SELECT 1 FROM retired_identities r \
                 WHERE r.table_name = v.column1 AND r.source_id = v.column2 AND r.observed_on = v.column3) \
                 ON CONFLICT (table_name, source_id, observed_on) DO NOTHING",
            );

            let result = query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| query_failed("insert listings batch", e))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit listing batch", e))?;

        Ok(inserted)
    }

    /// Number of listing rows stored for a table
    pub async fn count_listings(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings WHERE table_name = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed("count listings", e))?;

        Ok(count)
    }

    /// Latest observation date stored for a table, optionally within one partition
    ///
    /// Identities retired into the archive still count.
    pub async fn max_observed_on(
        &self,
        table: &str,
        partition: Option<&str>,
    ) -> Result<Option<NaiveDate>> {
        let max: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MAX(observed_on) FROM (
                SELECT observed_on FROM listings
                WHERE table_name = ? AND (? IS NULL OR partition_name = ?)
                UNION ALL
                SELECT observed_on FROM retired_identities
                WHERE table_name = ? AND (? IS NULL OR partition_name = ?)
            )
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(partition)
        .bind(table)
        .bind(partition)
        .bind(partition)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_failed("query latest observation date", e))?;

        max.as_deref().map(parse_date).transpose()
    }
}
