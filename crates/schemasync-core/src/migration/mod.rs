//! Transactional application of statement batches.
//!
//! A batch either commits together with its [`MigrationRecord`] or leaves
//! nothing behind.

use crate::error::{Error, Result};
use crate::store::{MigrationTransaction, SchemaStore};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A row of the append-only `schema_migrations` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Gap-free id, starting at 1.
    pub id: i64,
    /// Digest of the description the migration applied.
    pub digest: String,
    /// Statements, in execution order.
    pub statements: Vec<String>,
    /// When the batch finished executing.
    pub applied_at: DateTime<Utc>,
    /// Execution time of the statements.
    pub duration_ms: i64,
}

/// A batch of statements migrating to one digest.
#[derive(Debug, Clone, Default)]
pub struct MigrationBatch {
    /// Target digest.
    pub digest: String,
    /// Statements, in execution order.
    pub statements: Vec<String>,
    /// Canonical description to record alongside the migration.
    pub snapshot: Option<serde_json::Value>,
}

impl MigrationBatch {
    /// Create a batch.
    pub fn new(digest: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            digest: digest.into(),
            statements,
            snapshot: None,
        }
    }

    /// Record a description snapshot with the migration.
    pub fn with_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Applies batches in a single transaction.
pub struct MigrationExecutor<'a> {
    store: &'a dyn SchemaStore,
}

impl<'a> MigrationExecutor<'a> {
    /// Create an executor over a store.
    pub fn new(store: &'a dyn SchemaStore) -> Self {
        Self { store }
    }

    /// Execute the batch and append its record, atomically.
    ///
    /// On failure the transaction is rolled back and no record is written.
    pub async fn apply(&self, batch: &MigrationBatch) -> Result<MigrationRecord> {
        let mut tx = self.store.begin().await?;
        match Self::run(tx.as_mut(), batch).await {
            Ok(record) => {
                tx.commit().await?;
                info!(
                    id = record.id,
                    duration_ms = record.duration_ms,
                    "Migration committed"
                );
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "Migration failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn run(tx: &mut dyn MigrationTransaction, batch: &MigrationBatch) -> Result<MigrationRecord> {
        let started = Instant::now();
        for (index, statement) in batch.statements.iter().enumerate() {
            debug!(index, statement = %statement, "Executing statement");
            tx.execute(statement)
                .await
                .map_err(|e| Error::StatementFailed {
                    index,
                    statement: statement.clone(),
                    message: e.to_string(),
                })?;
        }
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let record = MigrationRecord {
            id: tx.next_migration_id().await?,
            digest: batch.digest.clone(),
            statements: batch.statements.clone(),
            applied_at: Utc::now(),
            duration_ms,
        };
        tx.insert_migration(&record).await?;
        if let Some(snapshot) = &batch.snapshot {
            tx.store_snapshot(&batch.digest, snapshot).await?;
        }
        Ok(record)
    }
}
