//! Storage seam for bookkeeping, locking and transactional execution.
//!
//! [`PgStore`] is the production implementation. [`MemoryStore`] keeps the
//! same state in memory for tests and dry runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::checksum::SchemaChecksum;
use crate::ddl::DataCheck;
use crate::error::Result;
use crate::migration::MigrationRecord;
use async_trait::async_trait;

/// Persistent state shared by every process syncing the same database.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Create the bookkeeping tables if they are missing.
    async fn prepare(&self) -> Result<()>;

    /// Try to take the cross-process migration lock without waiting.
    async fn try_lock(&self, key: i64) -> Result<bool>;

    /// Release the migration lock.
    async fn unlock(&self, key: i64) -> Result<()>;

    /// The stored checksum. Missing bookkeeping tables read as no checksum.
    async fn load_checksum(&self) -> Result<Option<SchemaChecksum>>;

    /// Upsert the checksum row.
    async fn save_checksum(&self, digest: &str) -> Result<SchemaChecksum>;

    /// The migration with the highest id.
    async fn latest_migration(&self) -> Result<Option<MigrationRecord>>;

    /// Every migration, in id order.
    async fn migrations(&self) -> Result<Vec<MigrationRecord>>;

    /// Canonical description recorded with the migration to `digest`.
    async fn load_snapshot(&self, digest: &str) -> Result<Option<serde_json::Value>>;

    /// Run a data probe and return the number of offending rows.
    async fn count_violations(&self, check: &DataCheck) -> Result<u64>;

    /// Open a migration transaction.
    async fn begin(&self) -> Result<Box<dyn MigrationTransaction>>;
}

/// A transaction applying one migration batch.
///
/// Dropping it without calling [`commit`](MigrationTransaction::commit)
/// discards everything it did.
#[async_trait]
pub trait MigrationTransaction: Send {
    /// Execute one statement.
    async fn execute(&mut self, statement: &str) -> Result<()>;

    /// Next migration id, one above the highest committed id.
    async fn next_migration_id(&mut self) -> Result<i64>;

    /// Append a migration record.
    async fn insert_migration(&mut self, record: &MigrationRecord) -> Result<()>;

    /// Record the description a digest stands for.
    async fn store_snapshot(&mut self, digest: &str, description: &serde_json::Value)
        -> Result<()>;

    /// Commit.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll back.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
