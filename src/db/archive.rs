//! Archive set: moving rows out of the live store, listing and purging them.

use crate::Result;
use crate::types::{ArchiveEntry, EntityKey};
use chrono::NaiveDate;

use super::{ArchiveRow, Database, format_date, query_failed};

impl Database {
    /// Move entities that are closed, terminally NOT_FOUND, or observed before
    /// `older_than` into the archive
    ///
    /// Works in batches of `batch_size`; each batch copies the rows into
    /// `archived_entities`, retires their identities and deletes them from
    /// `entities` and `listings` in one transaction. An identity already in
    /// the archive keeps its first copy. Listings that never got content are
    /// archived as NEW once they age out. Returns the total number of rows
    /// moved.
    pub async fn archive_matching(
        &self,
        table: &str,
        older_than: NaiveDate,
        not_found_threshold: u32,
        archived_at: i64,
        batch_size: u32,
    ) -> Result<u64> {
        let batch_size = batch_size.max(1);
        let cutoff = format_date(older_than);
        let mut moved = 0u64;

        loop {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| query_failed("begin archive batch", e))?;

            let keys: Vec<(String, String)> = sqlx::query_as(
                r#"
                SELECT l.source_id, l.observed_on
                FROM listings l
                LEFT JOIN entities e
                    ON e.table_name = l.table_name
                    AND e.source_id = l.source_id
                    AND e.observed_on = l.observed_on
                WHERE l.table_name = ?
                    AND (
                        e.status = 'CLOSED'
                        OR (e.status = 'NOT_FOUND' AND e.not_found_streak >= ?)
                        OR l.observed_on < ?
                    )
                ORDER BY l.observed_on, l.source_id
                LIMIT ?
                "#,
            )
            .bind(table)
            .bind(not_found_threshold as i64)
            .bind(&cutoff)
            .bind(batch_size as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| query_failed("select rows to archive", e))?;

            for (source_id, observed_on) in &keys {
                sqlx::query(
                    r#"
                    INSERT INTO archived_entities (
                        table_name, source_id, observed_on, partition_name, locator,
                        status, not_found_streak, payload, first_seen_at, last_observed_at,
                        archived_at
                    )
                    SELECT
                        l.table_name, l.source_id, l.observed_on, l.partition_name, l.locator,
                        COALESCE(e.status, 'NEW'), COALESCE(e.not_found_streak, 0),
                        COALESCE(e.payload, '{}'), COALESCE(e.first_seen_at, l.first_seen_at),
                        e.last_observed_at, ?
                    FROM listings l
                    LEFT JOIN entities e
                        ON e.table_name = l.table_name
                        AND e.source_id = l.source_id
                        AND e.observed_on = l.observed_on
                    WHERE l.table_name = ? AND l.source_id = ? AND l.observed_on = ?
                    ON CONFLICT (table_name, source_id, observed_on) DO NOTHING
                    "#,
                )
                .bind(archived_at)
                .bind(table)
                .bind(source_id)
                .bind(observed_on)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_failed("copy row into archive", e))?;

                sqlx::query(
                    r#"
                    INSERT INTO retired_identities (
                        table_name, source_id, observed_on, partition_name, retired_at
                    )
                    SELECT table_name, source_id, observed_on, partition_name, ?
                    FROM listings
                    WHERE table_name = ? AND source_id = ? AND observed_on = ?
                    ON CONFLICT (table_name, source_id, observed_on) DO NOTHING
                    "#,
                )
                .bind(archived_at)
                .bind(table)
                .bind(source_id)
                .bind(observed_on)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_failed("retire archived identity", e))?;

                sqlx::query(
                    "DELETE FROM entities WHERE table_name = ? AND source_id = ? AND observed_on = ?",
                )
                .bind(table)
                .bind(source_id)
                .bind(observed_on)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_failed("delete archived entity", e))?;

                sqlx::query(
                    "DELETE FROM listings WHERE table_name = ? AND source_id = ? AND observed_on = ?",
                )
                .bind(table)
                .bind(source_id)
                .bind(observed_on)
                .execute(&mut *tx)
                .await
                .map_err(|e| query_failed("delete archived listing", e))?;
            }

            tx.commit()
                .await
                .map_err(|e| query_failed("commit archive batch", e))?;

            moved += keys.len() as u64;
            if keys.len() < batch_size as usize {
                break;
            }
        }

        Ok(moved)
    }

    /// Every archived row of a table, oldest observation first
    pub async fn list_archived(&self, table: &str) -> Result<Vec<ArchiveEntry>> {
        let rows = sqlx::query_as::<_, ArchiveRow>(
            r#"
            SELECT
                table_name, source_id, observed_on, partition_name, locator,
                status, not_found_streak, payload, first_seen_at, last_observed_at,
                archived_at
            FROM archived_entities
            WHERE table_name = ?
            ORDER BY observed_on, source_id
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list archived rows", e))?;

        rows.into_iter().map(ArchiveEntry::try_from).collect()
    }

    /// Delete the given archived rows in one transaction
    ///
    /// Returns how many rows were removed.
    pub async fn purge_archived(&self, table: &str, keys: &[EntityKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin archive purge", e))?;

        let mut removed = 0;
        for key in keys {
            let result = sqlx::query(
                "DELETE FROM archived_entities WHERE table_name = ? AND source_id = ? AND observed_on = ?",
            )
            .bind(table)
            .bind(&key.source_id)
            .bind(format_date(key.observed_on))
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("purge archived row", e))?;
            removed += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit archive purge", e))?;

        Ok(removed)
    }

    /// Number of archived rows for a table
    pub async fn count_archived(&self, table: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM archived_entities WHERE table_name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| query_failed("count archived rows", e))?;

        Ok(count)
    }
}
