//! Content rows: idempotent upsert, re-observation and refetch selection.

use crate::error::DatabaseError;
use crate::types::{Entity, EntityKey};
use crate::{Error, Result};
use chrono::NaiveDate;
use sqlx::SqliteConnection;

use super::{Database, EntityRow, NewEntity, ObservationUpdate, format_date, query_failed};

const SELECT_ENTITY: &str = r#"
    SELECT
        l.source_id, l.observed_on, l.partition_name, l.locator,
        COALESCE(e.status, 'NEW') AS status,
        COALESCE(e.not_found_streak, 0) AS not_found_streak,
        COALESCE(e.payload, '{}') AS payload,
        COALESCE(e.first_seen_at, l.first_seen_at) AS first_seen_at,
        e.last_observed_at
    FROM listings l
    LEFT JOIN entities e
        ON e.table_name = l.table_name
        AND e.source_id = l.source_id
        AND e.observed_on = l.observed_on
"#;

impl Database {
    /// Store an entity unless its identity already has content
    ///
    /// The listing row is created alongside when missing. Returns `false` and
    /// changes nothing when the content row already exists, so concurrent
    /// callers racing on one identity see exactly one `true`.
    pub async fn upsert_if_absent(&self, table: &str, entity: &NewEntity) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin entity upsert", e))?;

        let inserted = insert_entity(&mut *tx, table, entity).await?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit entity upsert", e))?;

        Ok(inserted)
    }

    /// Store several entities in one transaction
    ///
    /// Returns how many were new.
    pub async fn upsert_entities_batch(&self, table: &str, entities: &[NewEntity]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin entity batch", e))?;

        let mut inserted = 0;
        for entity in entities {
            if insert_entity(&mut *tx, table, entity).await? {
                inserted += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit entity batch", e))?;

        Ok(inserted)
    }

    /// Apply a re-fetch result to an entity that already has content
    ///
    /// Status, streak and observation time are overwritten. Payload keys that
    /// are already filled are kept; keys missing or null in the stored payload
    /// are taken from the update. A stored payload that is not valid JSON is
    /// kept verbatim.
    pub async fn record_observation(
        &self,
        table: &str,
        key: &EntityKey,
        update: &ObservationUpdate,
    ) -> Result<()> {
        let observed_on = format_date(key.observed_on);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin observation update", e))?;

        let stored: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM entities WHERE table_name = ? AND source_id = ? AND observed_on = ?",
        )
        .bind(table)
        .bind(&key.source_id)
        .bind(&observed_on)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| query_failed("read stored payload", e))?;

        let Some(stored) = stored else {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "entity {} in {}",
                key, table
            ))));
        };

        // An unreadable stored payload is left as it is; only the status moves.
        let merged = match serde_json::from_str::<serde_json::Value>(&stored) {
            Ok(mut payload) => {
                merge_absent_fields(&mut payload, &update.payload);
                Some(payload.to_string())
            }
            Err(e) => {
                tracing::warn!(
                    table = %table,
                    key = %key,
                    error = %e,
                    "Stored payload is not valid JSON, keeping it unchanged"
                );
                None
            }
        };

        sqlx::query(
            r#"
            UPDATE entities
            SET status = ?, not_found_streak = ?, payload = COALESCE(?, payload),
                last_observed_at = ?
            WHERE table_name = ? AND source_id = ? AND observed_on = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.not_found_streak as i64)
        .bind(merged)
        .bind(update.observed_at)
        .bind(table)
        .bind(&key.source_id)
        .bind(&observed_on)
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("update entity observation", e))?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit observation update", e))?;

        Ok(())
    }

    /// Get an entity by identity
    ///
    /// A listing without a content row comes back with status NEW.
    pub async fn get_entity(&self, table: &str, key: &EntityKey) -> Result<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "{} WHERE l.table_name = ? AND l.source_id = ? AND l.observed_on = ?",
            SELECT_ENTITY
        ))
        .bind(table)
        .bind(&key.source_id)
        .bind(format_date(key.observed_on))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get entity", e))?;

        row.map(Entity::try_from).transpose()
    }

    /// Number of content rows stored for a table
    pub async fn count_entities(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE table_name = ?")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| query_failed("count entities", e))?;

        Ok(count)
    }

    /// Entities eligible for a detail re-fetch
    ///
    /// Selects listings observed on or after `since` whose status is NEW, OPEN
    /// or a NOT_FOUND below `not_found_threshold`, and that have not been
    /// fetched at or after `observed_before` (unix seconds). Oldest first.
    pub async fn refetch_candidates(
        &self,
        table: &str,
        since: NaiveDate,
        observed_before: i64,
        not_found_threshold: u32,
    ) -> Result<Vec<Entity>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            r#"{}
            WHERE l.table_name = ?
                AND l.observed_on >= ?
                AND (
                    e.status IS NULL
                    OR e.status IN ('NEW', 'OPEN')
                    OR (e.status = 'NOT_FOUND' AND e.not_found_streak < ?)
                )
                AND (e.last_observed_at IS NULL OR e.last_observed_at < ?)
            ORDER BY l.observed_on ASC, l.source_id ASC
            "#,
            SELECT_ENTITY
        ))
        .bind(table)
        .bind(format_date(since))
        .bind(not_found_threshold as i64)
        .bind(observed_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("select refetch candidates", e))?;

        rows.into_iter().map(Entity::try_from).collect()
    }
}

/// Insert listing + content rows for one entity on an open transaction
///
/// Retired identities are left alone and report `false`.
async fn insert_entity(conn: &mut SqliteConnection, table: &str, entity: &NewEntity) -> Result<bool> {
    let observed_on = format_date(entity.key.observed_on);

    sqlx::query(
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
    .bind(&entity.key.source_id)
    .bind(&observed_on)
    .bind(&entity.partition)
    .bind(&entity.locator)
    .bind(entity.first_seen_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| query_failed("insert listing for entity", e))?;

    let result = sqlx::query(
        r#"
        INSERT INTO entities (
            table_name, source_id, observed_on, status, not_found_streak,
            payload, first_seen_at, last_observed_at
        )
        SELECT v.table_name, v.source_id, v.observed_on, v.status, v.not_found_streak,
               v.payload, v.first_seen_at, v.last_observed_at
        FROM (
            SELECT ? AS table_name, ? AS source_id, ? AS observed_on, ? AS status,
                   ? AS not_found_streak, ? AS payload, ? AS first_seen_at,
                   ? AS last_observed_at
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
    .bind(&entity.key.source_id)
    .bind(&observed_on)
    .bind(entity.status.as_str())
    .bind(entity.not_found_streak as i64)
    .bind(entity.payload.to_string())
    .bind(entity.first_seen_at)
    .bind(entity.last_observed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| query_failed("insert entity", e))?;

    Ok(result.rows_affected() == 1)
}

/// Copy keys from `incoming` that are missing or null in `existing`
pub(crate) fn merge_absent_fields(existing: &mut serde_json::Value, incoming: &serde_json::Value) {
    let Some(incoming) = incoming.as_object() else {
        return;
    };
    if !existing.is_object() {
        *existing = serde_json::Value::Object(serde_json::Map::new());
    }
    if let Some(existing) = existing.as_object_mut() {
        for (key, value) in incoming {
            let absent = existing.get(key).is_none_or(|v| v.is_null());
            if absent {
                existing.insert(key.clone(), value.clone());
            }
        }
    }
}
