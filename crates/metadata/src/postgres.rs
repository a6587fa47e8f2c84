//! PostgreSQL-based metadata store implementation.

use crate::error::MetadataResult;
use crate::models::ArtifactEntryRow;
use crate::repos::artifacts::directory_prefix;
use crate::repos::{ArtifactEntryRepo, PendingUpsert, UpsertOutcome};
use crate::store::MetadataStore;
use async_trait::async_trait;
use depot_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Split the schema into single statements; prepared statements take one each.
fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect using individual parameters, so the password can come from
    /// the environment.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgPendingUpsert {
    tx: Transaction<'static, Postgres>,
    outcome: UpsertOutcome,
}

#[async_trait]
impl PendingUpsert for PgPendingUpsert {
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
impl ArtifactEntryRepo for PostgresStore {
    async fn stage_artifact_entry(
        &self,
        entry: &ArtifactEntryRow,
    ) -> MetadataResult<Box<dyn PendingUpsert>> {
        let mut tx = self.pool.begin().await?;

        // xmax = 0 only for a freshly inserted row; a conflict update sets it.
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO artifact_entries (
                entry_id, storage_id, repository_id, artifact_path, layout,
                coordinates, size_bytes, is_remote, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT(storage_id, repository_id, artifact_path) DO UPDATE SET
                layout = EXCLUDED.layout,
                coordinates = EXCLUDED.coordinates,
                size_bytes = EXCLUDED.size_bytes,
                is_remote = EXCLUDED.is_remote,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0)
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
        .fetch_one(&mut *tx)
        .await?;

        let outcome = if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        };
        Ok(Box::new(PgPendingUpsert { tx, outcome }))
    }

    async fn get_artifact_entry(
        &self,
        storage_id: &str,
        repository_id: &str,
        artifact_path: &str,
    ) -> MetadataResult<Option<ArtifactEntryRow>> {
        let row = sqlx::query_as::<_, ArtifactEntryRow>(
            "SELECT * FROM artifact_entries WHERE storage_id = $1 AND repository_id = $2 AND artifact_path = $3",
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
            "DELETE FROM artifact_entries WHERE storage_id = $1 AND repository_id = $2 AND artifact_path = $3",
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
        let result = match directory_prefix(prefix) {
            Some((exact, dir)) => {
                sqlx::query(
                    r#"
                    DELETE FROM artifact_entries
                    WHERE storage_id = $1 AND repository_id = $2
                      AND (artifact_path = $3 OR starts_with(artifact_path, $4))
                    "#,
                )
                .bind(storage_id)
                .bind(repository_id)
                .bind(&exact)
                .bind(&dir)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "DELETE FROM artifact_entries WHERE storage_id = $1 AND repository_id = $2",
                )
                .bind(storage_id)
                .bind(repository_id)
                .execute(&self.pool)
                .await?
            }
        };
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
                    WHERE storage_id = $1 AND repository_id = $2
                      AND (artifact_path = $3 OR starts_with(artifact_path, $4))
                    ORDER BY artifact_path
                    "#,
                )
                .bind(storage_id)
                .bind(repository_id)
                .bind(&exact)
                .bind(&dir)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ArtifactEntryRow>(
                    "SELECT * FROM artifact_entries WHERE storage_id = $1 AND repository_id = $2 ORDER BY artifact_path",
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
            "SELECT COUNT(*) FROM artifact_entries WHERE storage_id = $1 AND repository_id = $2",
        )
        .bind(storage_id)
        .bind(repository_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}
