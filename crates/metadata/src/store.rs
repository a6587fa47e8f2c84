//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::models::ArtifactEntryRow;
use crate::repos::artifacts::directory_prefix;
use crate::repos::{ArtifactEntryRepo, PendingUpsert, UpsertOutcome};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ArtifactEntryRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Option<Duration>,
}

impl SqliteStore {
    /// Open (creating if missing) a SQLite index database.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway, and a single
        // connection avoids persistent "database is locked" failures.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: query_timeout_secs.map(Duration::from_secs),
        };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite artifact index ready");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Warn when a statement exceeded the advisory timeout.
    fn note_duration(&self, operation: &'static str, started: std::time::Instant) {
        if let Some(limit) = self.query_timeout {
            let elapsed = started.elapsed();
            if elapsed > limit {
                tracing::warn!(
                    operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "SQLite query exceeded advisory timeout"
                );
            }
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Upsert held in an open SQLite transaction.
struct SqlitePendingUpsert {
    tx: Transaction<'static, Sqlite>,
    outcome: UpsertOutcome,
}

#[async_trait]
impl PendingUpsert for SqlitePendingUpsert {
    fn outcome(&self) -> UpsertOutcome {
        self.outcome
    }

    async fn commit(self: Box<Self>) -> MetadataResult<UpsertOutcome> {
        let outcome = self.outcome;
        self.tx.commit().await?;
        Ok(outcome)
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactEntryRepo for SqliteStore {
    async fn stage_artifact_entry(
        &self,
        entry: &ArtifactEntryRow,
    ) -> MetadataResult<Box<dyn PendingUpsert>> {
        let started = std::time::Instant::now();
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM artifact_entries WHERE storage_id = ? AND repository_id = ? AND artifact_path = ?)",
        )
        .bind(&entry.storage_id)
        .bind(&entry.repository_id)
        .bind(&entry.artifact_path)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO artifact_entries (
                entry_id, storage_id, repository_id, artifact_path, layout,
                coordinates, size_bytes, is_remote, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(storage_id, repository_id, artifact_path) DO UPDATE SET
                layout = excluded.layout,
                coordinates = excluded.coordinates,
                size_bytes = excluded.size_bytes,
                is_remote = excluded.is_remote,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.entry_id)
        .bind(&entry.storage_id)
        .bind(&entry.repository_id)
        .bind(&entry.artifact_path)
        .bind(&entry.layout)
        .bind(&entry.coordinates)
        .bind(entry.size_bytes)
        .bind(entry.is_remote)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await?;

        self.note_duration("stage_artifact_entry", started);

        let outcome = if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };
        Ok(Box::new(SqlitePendingUpsert { tx, outcome }))
    }

    async fn get_artifact_entry(
        &self,
        storage_id: &str,
        repository_id: &str,
        artifact_path: &str,
    ) -> MetadataResult<Option<ArtifactEntryRow>> {
        let row = sqlx::query_as::<_, ArtifactEntryRow>(
            "SELECT * FROM artifact_entries WHERE storage_id = ? AND repository_id = ? AND artifact_path = ?",
        )
        .bind(storage_id)
        .bind(repository_id)
        .bind(artifact_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_artifact_entry(
        &self,
        storage_id: &str,
        repository_id: &str,
        artifact_path: &str,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "DELETE FROM artifact_entries WHERE storage_id = ? AND repository_id = ? AND artifact_path = ?",
        )
        .bind(storage_id)
        .bind(repository_id)
        .bind(artifact_path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_artifact_entries_with_prefix(
        &self,
        storage_id: &str,
        repository_id: &str,
        prefix: &str,
    ) -> MetadataResult<u64> {
        let started = std::time::Instant::now();
        let result = match directory_prefix(prefix) {
            Some((exact, dir)) => {
                sqlx::query(
                    r#"
                    DELETE FROM artifact_entries
                    WHERE storage_id = ? AND repository_id = ?
                      AND (artifact_path = ? OR substr(artifact_path, 1, ?) = ?)
                    "#,
                )
                .bind(storage_id)
                .bind(repository_id)
                .bind(&exact)
                .bind(dir.chars().count() as i64)
                .bind(&dir)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("DELETE FROM artifact_entries WHERE storage_id = ? AND repository_id = ?")
                    .bind(storage_id)
                    .bind(repository_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        self.note_duration("delete_artifact_entries_with_prefix", started);
        Ok(result.rows_affected())
    }

    async fn list_artifact_entries(
        &self,
        storage_id: &str,
        repository_id: &str,
        prefix: &str,
    ) -> MetadataResult<Vec<ArtifactEntryRow>> {
        let rows = match directory_prefix(prefix) {
            Some((exact, dir)) => {
                sqlx::query_as::<_, ArtifactEntryRow>(
                    r#"
                    SELECT * FROM artifact_entries
                    WHERE storage_id = ? AND repository_id = ?
                      AND (artifact_path = ? OR substr(artifact_path, 1, ?) = ?)
                    ORDER BY artifact_path
                    "#,
                )
                .bind(storage_id)
                .bind(repository_id)
                .bind(&exact)
                .bind(dir.chars().count() as i64)
                .bind(&dir)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ArtifactEntryRow>(
                    "SELECT * FROM artifact_entries WHERE storage_id = ? AND repository_id = ? ORDER BY artifact_path",
                )
                .bind(storage_id)
                .bind(repository_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn count_artifact_entries(
        &self,
        storage_id: &str,
        repository_id: &str,
    ) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM artifact_entries WHERE storage_id = ? AND repository_id = ?",
        )
        .bind(storage_id)
        .bind(repository_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}

const SCHEMA_SQL: &str = r#"
-- Artifact index: one row per stored file
CREATE TABLE IF NOT EXISTS artifact_entries (
    entry_id BLOB PRIMARY KEY,
    storage_id TEXT NOT NULL,
    repository_id TEXT NOT NULL,
    artifact_path TEXT NOT NULL,
    layout TEXT NOT NULL,
    coordinates TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    is_remote INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_artifact_entries_key
    ON artifact_entries(storage_id, repository_id, artifact_path);
CREATE INDEX IF NOT EXISTS idx_artifact_entries_updated
    ON artifact_entries(updated_at);
"#;
