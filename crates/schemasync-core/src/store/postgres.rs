//! PostgreSQL store.

use super::{MigrationTransaction, SchemaStore};
use crate::checksum::{SchemaChecksum, CHECKSUM_ROW_ID};
use crate::ddl::DataCheck;
use crate::error::{Error, Result};
use crate::migration::MigrationRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeSet;
use tokio::sync::Mutex;

/// SQLSTATE for a missing relation.
const UNDEFINED_TABLE: &str = "42P01";

const BOOKKEEPING_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_checksum (
    id TEXT PRIMARY KEY CHECK (id = 'singleton'),
    digest TEXT NOT NULL,
    computed_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS schema_migrations (
    id BIGINT PRIMARY KEY,
    digest TEXT NOT NULL,
    statements TEXT[] NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL,
    duration_ms BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS schema_snapshots (
    digest TEXT PRIMARY KEY,
    description JSONB NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

const MIGRATION_COLUMNS: &str = "id, digest, statements, applied_at, duration_ms";

/// Store backed by a PostgreSQL pool.
///
/// The advisory lock is session-scoped, so it is taken on a connection
/// held aside from the pool while any lock is held.
pub struct PgStore {
    pool: PgPool,
    lock_session: Mutex<LockSession>,
}

#[derive(Default)]
struct LockSession {
    conn: Option<PoolConnection<Postgres>>,
    held: BTreeSet<i64>,
}

impl PgStore {
    /// Create a store over a pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_session: Mutex::new(LockSession::default()),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_undefined_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNDEFINED_TABLE),
        _ => false,
    }
}

fn migration_from_row(row: &PgRow) -> Result<MigrationRecord> {
    Ok(MigrationRecord {
        id: row.try_get("id")?,
        digest: row.try_get("digest")?,
        statements: row.try_get("statements")?,
        applied_at: row.try_get("applied_at")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}

#[async_trait]
impl SchemaStore for PgStore {
    async fn prepare(&self) -> Result<()> {
        sqlx::raw_sql(BOOKKEEPING_DDL).execute(&self.pool).await?;
        Ok(())
    }

    async fn try_lock(&self, key: i64) -> Result<bool> {
        let mut session = self.lock_session.lock().await;
        if session.held.contains(&key) {
            return Ok(true);
        }
        let mut conn = match session.conn.take() {
            Some(conn) => conn,
            None => self.pool.acquire().await?,
        };
        let attempt = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await;
        let acquired = match attempt {
            Ok(acquired) => acquired,
            Err(e) => {
                session.held.clear();
                drop(conn.detach());
                return Err(e.into());
            }
        };
        if acquired {
            session.held.insert(key);
        }
        // A session holding nothing goes back to the pool between attempts.
        if !session.held.is_empty() {
            session.conn = Some(conn);
        }
        Ok(acquired)
    }

    async fn unlock(&self, key: i64) -> Result<()> {
        let mut session = self.lock_session.lock().await;
        if !session.held.remove(&key) {
            return Err(Error::Backend(format!("lock {} is not held", key)));
        }
        let Some(mut conn) = session.conn.take() else {
            return Err(Error::Backend(format!("lock {} has no session", key)));
        };
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await;
        match released {
            Ok(true) => {
                if !session.held.is_empty() {
                    session.conn = Some(conn);
                }
                Ok(())
            }
            Ok(false) => {
                // Closing the session releases whatever it still holds.
                session.held.clear();
                drop(conn.detach());
                Err(Error::Backend(format!("lock {} was not held by this session", key)))
            }
            Err(e) => {
                session.held.clear();
                drop(conn.detach());
                Err(e.into())
            }
        }
    }

    async fn load_checksum(&self) -> Result<Option<SchemaChecksum>> {
        let row = sqlx::query("SELECT id, digest, computed_at FROM schema_checksum WHERE id = $1")
            .bind(CHECKSUM_ROW_ID)
            .fetch_optional(&self.pool)
            .await;
        match row {
            Ok(Some(row)) => Ok(Some(SchemaChecksum {
                id: row.try_get("id")?,
                digest: row.try_get("digest")?,
                computed_at: row.try_get("computed_at")?,
            })),
            Ok(None) => Ok(None),
            Err(e) if is_undefined_table(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_checksum(&self, digest: &str) -> Result<SchemaChecksum> {
        let computed_at: DateTime<Utc> = sqlx::query_scalar(
            "INSERT INTO schema_checksum (id, digest, computed_at) VALUES ($1, $2, now()) \
             ON CONFLICT (id) DO UPDATE SET digest = EXCLUDED.digest, computed_at = EXCLUDED.computed_at \
             RETURNING computed_at",
        )
        .bind(CHECKSUM_ROW_ID)
        .bind(digest)
        .fetch_one(&self.pool)
        .await?;
        Ok(SchemaChecksum {
            id: CHECKSUM_ROW_ID.to_string(),
            digest: digest.to_string(),
            computed_at,
        })
    }

    async fn latest_migration(&self) -> Result<Option<MigrationRecord>> {
        let query = format!(
            "SELECT {} FROM schema_migrations ORDER BY id DESC LIMIT 1",
            MIGRATION_COLUMNS
        );
        match sqlx::query(&query).fetch_optional(&self.pool).await {
            Ok(row) => row.as_ref().map(migration_from_row).transpose(),
            Err(e) if is_undefined_table(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn migrations(&self) -> Result<Vec<MigrationRecord>> {
        let query = format!("SELECT {} FROM schema_migrations ORDER BY id", MIGRATION_COLUMNS);
        match sqlx::query(&query).fetch_all(&self.pool).await {
            Ok(rows) => rows.iter().map(migration_from_row).collect(),
            Err(e) if is_undefined_table(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_snapshot(&self, digest: &str) -> Result<Option<serde_json::Value>> {
        let snapshot = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT description FROM schema_snapshots WHERE digest = $1",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await;
        match snapshot {
            Ok(value) => Ok(value),
            Err(e) if is_undefined_table(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn count_violations(&self, check: &DataCheck) -> Result<u64> {
        tracing::debug!(query = %check.query, "Probing existing data");
        let rows: i64 = sqlx::query_scalar(&check.query)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(rows).unwrap_or(0))
    }

    async fn begin(&self) -> Result<Box<dyn MigrationTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl MigrationTransaction for PgTransaction {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        let conn: &mut PgConnection = &mut self.tx;
        sqlx::Executor::execute(conn, statement).await?;
        Ok(())
    }

    async fn next_migration_id(&mut self) -> Result<i64> {
        let id: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM schema_migrations")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn insert_migration(&mut self, record: &MigrationRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO schema_migrations ({}) VALUES ($1, $2, $3, $4, $5)",
            MIGRATION_COLUMNS
        );
        sqlx::query(&query)
            .bind(record.id)
            .bind(&record.digest)
            .bind(record.statements.as_slice())
            .bind(record.applied_at)
            .bind(record.duration_ms)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn store_snapshot(
        &mut self,
        digest: &str,
        description: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_snapshots (digest, description) VALUES ($1, $2) \
             ON CONFLICT (digest) DO NOTHING",
        )
        .bind(digest)
        .bind(description)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
