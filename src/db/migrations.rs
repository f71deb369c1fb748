//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

/// Highest schema version this build knows how to create
pub(crate) const LATEST_VERSION: i64 = 3;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Connect to database with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        // Run migrations
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        // Create schema version table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        // Check current version
        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?;

        let current_version = current_version.unwrap_or(0);

        // Apply migrations
        for version in (current_version + 1)..=LATEST_VERSION {
            Self::migrate(&mut conn, version).await?;
        }

        Ok(())
    }

    /// Apply one migration inside a transaction so partial failures don't leave
    /// the database in a broken state
    async fn migrate(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        tracing::info!(version, "Applying database migration");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = match version {
            1 => Self::create_live_schema(&mut *conn).await,
            2 => Self::create_archive_schema(&mut *conn).await,
            3 => Self::create_retired_schema(&mut *conn).await,
            other => Err(Error::Database(DatabaseError::MigrationFailed(format!(
                "Unknown migration v{}",
                other
            )))),
        };
        let result = match result {
            Ok(()) => Self::record_migration(&mut *conn, version).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!(version, "Database migration complete");
        Ok(())
    }

    /// Migration v1: listings (identity + partition index), entities (content),
    /// partitions and their daily count snapshots
    async fn create_live_schema(conn: &mut SqliteConnection) -> Result<()> {
        let statements: [(&str, &str); 6] = [
            (
                "listings table",
                r#"
                CREATE TABLE listings (
                    table_name TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    observed_on TEXT NOT NULL,
                    partition_name TEXT NOT NULL,
                    locator TEXT,
                    first_seen_at INTEGER NOT NULL,
                    PRIMARY KEY (table_name, source_id, observed_on)
                )
                "#,
            ),
            (
                "listings partition index",
                "CREATE INDEX idx_listings_partition ON listings(table_name, partition_name)",
            ),
            (
                "entities table",
                r#"
                CREATE TABLE entities (
                    table_name TEXT NOT NULL,
                    source_id TEXT NOT NULL,
                    observed_on TEXT NOT NULL,
                    status TEXT NOT NULL,
                    not_found_streak INTEGER NOT NULL DEFAULT 0,
                    payload TEXT NOT NULL DEFAULT '{}',
                    first_seen_at INTEGER NOT NULL,
                    last_observed_at INTEGER,
                    PRIMARY KEY (table_name, source_id, observed_on),
                    FOREIGN KEY (table_name, source_id, observed_on)
                        REFERENCES listings(table_name, source_id, observed_on)
                        ON DELETE CASCADE
                )
                "#,
            ),
            (
                "entities status index",
                "CREATE INDEX idx_entities_status ON entities(table_name, status)",
            ),
            (
                "partitions table",
                r#"
                CREATE TABLE partitions (
                    table_name TEXT NOT NULL,
                    partition_name TEXT NOT NULL,
                    locator TEXT,
                    last_count INTEGER,
                    last_crawl_at INTEGER,
                    PRIMARY KEY (table_name, partition_name)
                )
                "#,
            ),
            (
                "partition_snapshots table",
                r#"
                CREATE TABLE partition_snapshots (
                    table_name TEXT NOT NULL,
                    partition_name TEXT NOT NULL,
                    snapshot_on TEXT NOT NULL,
                    item_count INTEGER NOT NULL,
                    captured_at INTEGER NOT NULL,
                    PRIMARY KEY (table_name, partition_name, snapshot_on)
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            Self::execute_ddl(conn, what, sql).await?;
        }
        Ok(())
    }

    /// Migration v2: archive table mirroring the content table
    async fn create_archive_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            "archived_entities table",
            r#"
            CREATE TABLE archived_entities (
                table_name TEXT NOT NULL,
                source_id TEXT NOT NULL,
                observed_on TEXT NOT NULL,
                partition_name TEXT NOT NULL,
                locator TEXT,
                status TEXT NOT NULL,
                not_found_streak INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL DEFAULT '{}',
                first_seen_at INTEGER NOT NULL,
                last_observed_at INTEGER,
                archived_at INTEGER NOT NULL,
                PRIMARY KEY (table_name, source_id, observed_on)
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "snapshot date index",
            "CREATE INDEX idx_snapshots_date ON partition_snapshots(table_name, snapshot_on)",
        )
        .await
    }

    /// Migration v3: identities that left the live store
    ///
    /// Rows here outlive the export purge, so an archived identity is never
    /// ingested again.
    async fn create_retired_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            "retired_identities table",
            r#"
            CREATE TABLE retired_identities (
                table_name TEXT NOT NULL,
                source_id TEXT NOT NULL,
                observed_on TEXT NOT NULL,
                partition_name TEXT NOT NULL,
                retired_at INTEGER NOT NULL,
                PRIMARY KEY (table_name, source_id, observed_on)
            )
            "#,
        )
        .await?;

        // Backfill from archive rows not yet exported
        Self::execute_ddl(
            conn,
            "retired identities from archive",
            r#"
            INSERT OR IGNORE INTO retired_identities (
                table_name, source_id, observed_on, partition_name, retired_at
            )
            SELECT table_name, source_id, observed_on, partition_name, archived_at
            FROM archived_entities
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "retired identities partition index",
            "CREATE INDEX idx_retired_partition ON retired_identities(table_name, partition_name)",
        )
        .await
    }

    async fn execute_ddl(conn: &mut SqliteConnection, what: &str, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    /// Record a migration as applied
    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    version, e
                )))
            })?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
