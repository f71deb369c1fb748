//! Partition registry, daily count snapshots and change queries.

use crate::Result;
use crate::types::{Partition, PartitionSnapshot};
use chrono::NaiveDate;

use super::{Database, PartitionRow, SnapshotRow, format_date, parse_date, query_failed};

impl Database {
    /// Register a partition, refreshing its locator if already known
    pub async fn register_partition(
        &self,
        table: &str,
        name: &str,
        locator: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO partitions (table_name, partition_name, locator)
            VALUES (?, ?, ?)
            ON CONFLICT (table_name, partition_name) DO UPDATE SET locator = excluded.locator
            "#,
        )
        .bind(table)
        .bind(name)
        .bind(locator)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("register partition", e))?;

        Ok(())
    }

    /// Get a registered partition
    pub async fn get_partition(&self, table: &str, name: &str) -> Result<Option<Partition>> {
        let row = sqlx::query_as::<_, PartitionRow>(
            r#"
            SELECT partition_name, locator, last_count, last_crawl_at
            FROM partitions
            WHERE table_name = ? AND partition_name = ?
            "#,
        )
        .bind(table)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get partition", e))?;

        Ok(row.map(Partition::from))
    }

    /// List registered partitions of a table, by name
    pub async fn list_partitions(&self, table: &str) -> Result<Vec<Partition>> {
        let rows = sqlx::query_as::<_, PartitionRow>(
            r#"
            SELECT partition_name, locator, last_count, last_crawl_at
            FROM partitions
            WHERE table_name = ?
            ORDER BY partition_name
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list partitions", e))?;

        Ok(rows.into_iter().map(Partition::from).collect())
    }

    /// Record a partition's aggregate count for a date
    ///
    /// One sample per (partition, date): returns `false` when that date
    /// already has one. A recorded sample also becomes the partition's
    /// `last_count`.
    pub async fn record_snapshot(
        &self,
        table: &str,
        partition: &str,
        snapshot_on: NaiveDate,
        item_count: i64,
        captured_at: i64,
    ) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin snapshot insert", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO partition_snapshots (
                table_name, partition_name, snapshot_on, item_count, captured_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (table_name, partition_name, snapshot_on) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(format_date(snapshot_on))
        .bind(item_count)
        .bind(captured_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("insert snapshot", e))?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            sqlx::query(
                "UPDATE partitions SET last_count = ? WHERE table_name = ? AND partition_name = ?",
            )
            .bind(item_count)
            .bind(table)
            .bind(partition)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_failed("update partition count", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit snapshot insert", e))?;

        Ok(inserted)
    }

    /// Snapshots of one partition, oldest first
    pub async fn list_snapshots(&self, table: &str, partition: &str) -> Result<Vec<PartitionSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT partition_name, snapshot_on, item_count, captured_at
            FROM partition_snapshots
            WHERE table_name = ? AND partition_name = ?
            ORDER BY snapshot_on
            "#,
        )
        .bind(table)
        .bind(partition)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list snapshots", e))?;

        rows.into_iter().map(PartitionSnapshot::try_from).collect()
    }

    /// Latest snapshot date recorded for a table
    pub async fn max_snapshot_on(&self, table: &str) -> Result<Option<NaiveDate>> {
        let max: Option<String> =
            sqlx::query_scalar("SELECT MAX(snapshot_on) FROM partition_snapshots WHERE table_name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| query_failed("query latest snapshot date", e))?;

        max.as_deref().map(parse_date).transpose()
    }

    /// Record that a partition's listing pages were crawled
    ///
    /// `last_crawl_at` never moves backwards.
    pub async fn mark_partition_crawled(&self, table: &str, name: &str, crawled_at: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE partitions
            SET last_crawl_at = MAX(COALESCE(last_crawl_at, 0), ?)
            WHERE table_name = ? AND partition_name = ?
            "#,
        )
        .bind(crawled_at)
        .bind(table)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark partition crawled", e))?;

        Ok(())
    }

    /// Partitions whose count changed recently
    ///
    /// A partition drifted when one of its snapshots no older than
    /// `recency_days` before the table's latest snapshot differs from the
    /// snapshot exactly `lag_days` earlier.
    pub async fn drifted_partitions(
        &self,
        table: &str,
        lag_days: u32,
        recency_days: u32,
    ) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT a.partition_name
            FROM partition_snapshots a
            JOIN partition_snapshots b
                ON b.table_name = a.table_name
                AND b.partition_name = a.partition_name
                AND b.snapshot_on = DATE(a.snapshot_on, ?)
            WHERE a.table_name = ?
                AND a.item_count <> b.item_count
                AND DATE(a.snapshot_on, ?) >= (
                    SELECT MAX(snapshot_on) FROM partition_snapshots WHERE table_name = ?
                )
            ORDER BY a.partition_name
            "#,
        )
        .bind(format!("-{} days", lag_days))
        .bind(table)
        .bind(format!("+{} days", recency_days))
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("query drifted partitions", e))?;

        Ok(names)
    }

    /// Registered partitions that have never produced a listing
    ///
    /// A partition whose rows were all archived is not cold.
    pub async fn cold_partitions(&self, table: &str) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT p.partition_name
            FROM partitions p
            WHERE p.table_name = ?
                AND NOT EXISTS (
                    SELECT 1 FROM listings l
                    WHERE l.table_name = p.table_name AND l.partition_name = p.partition_name
                )
                AND NOT EXISTS (
                    SELECT 1 FROM retired_identities r
                    WHERE r.table_name = p.table_name AND r.partition_name = p.partition_name
                )
            ORDER BY p.partition_name
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("query cold partitions", e))?;

        Ok(names)
    }
}
