//! In-memory store.
//!
//! Handles created with [`MemoryStore::connect`] share state but hold locks
//! separately, like two processes talking to one database. Statements are
//! recorded, not interpreted.

use super::{MigrationTransaction, SchemaStore};
use crate::checksum::{SchemaChecksum, CHECKSUM_ROW_ID};
use crate::ddl::DataCheck;
use crate::error::{Error, Result};
use crate::migration::MigrationRecord;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter for session ids.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct MemoryState {
    prepared: bool,
    checksum: Option<SchemaChecksum>,
    migrations: Vec<MigrationRecord>,
    snapshots: BTreeMap<String, serde_json::Value>,
    executed: Vec<String>,
    locks: HashMap<i64, u64>,
    lock_attempts: u64,
    failures: Vec<String>,
    violations: HashMap<(String, String), u64>,
}

/// Store keeping bookkeeping state in memory.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    session: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            session: SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Another handle on the same state with its own lock session.
    pub fn connect(&self) -> Self {
        Self {
            session: SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
            state: Arc::clone(&self.state),
        }
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.state.lock().failures.push(pattern.into());
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Make probes on `table.column` report `rows` offending rows.
    pub fn with_violations(self, table: &str, column: &str, rows: u64) -> Self {
        self.state
            .lock()
            .violations
            .insert((table.to_string(), column.to_string()), rows);
        self
    }

    /// Every committed statement, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Lock attempts made through any handle.
    pub fn lock_attempts(&self) -> u64 {
        self.state.lock().lock_attempts
    }

    /// Whether this handle holds the lock on `key`.
    pub fn holds_lock(&self, key: i64) -> bool {
        self.state.lock().locks.get(&key) == Some(&self.session)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    async fn prepare(&self) -> Result<()> {
        self.state.lock().prepared = true;
        Ok(())
    }

    async fn try_lock(&self, key: i64) -> Result<bool> {
        let mut state = self.state.lock();
        state.lock_attempts += 1;
        let holder = state.locks.entry(key).or_insert(self.session);
        Ok(*holder == self.session)
    }

    async fn unlock(&self, key: i64) -> Result<()> {
        let mut state = self.state.lock();
        match state.locks.get(&key) {
            Some(holder) if *holder == self.session => {
                state.locks.remove(&key);
                Ok(())
            }
            _ => Err(Error::Backend(format!("lock {} is not held by this session", key))),
        }
    }

    async fn load_checksum(&self) -> Result<Option<SchemaChecksum>> {
        Ok(self.state.lock().checksum.clone())
    }

    async fn save_checksum(&self, digest: &str) -> Result<SchemaChecksum> {
        let mut state = self.state.lock();
        if !state.prepared {
            return Err(Error::Backend("bookkeeping tables do not exist".to_string()));
        }
        let checksum = SchemaChecksum {
            id: CHECKSUM_ROW_ID.to_string(),
            digest: digest.to_string(),
            computed_at: Utc::now(),
        };
        state.checksum = Some(checksum.clone());
        Ok(checksum)
    }

    async fn latest_migration(&self) -> Result<Option<MigrationRecord>> {
        Ok(self.state.lock().migrations.last().cloned())
    }

    async fn migrations(&self) -> Result<Vec<MigrationRecord>> {
        Ok(self.state.lock().migrations.clone())
    }

    async fn load_snapshot(&self, digest: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.state.lock().snapshots.get(digest).cloned())
    }

    async fn count_violations(&self, check: &DataCheck) -> Result<u64> {
        let state = self.state.lock();
        let key = (check.table.clone(), check.column.clone());
        Ok(state.violations.get(&key).copied().unwrap_or(0))
    }

    async fn begin(&self) -> Result<Box<dyn MigrationTransaction>> {
        if !self.state.lock().prepared {
            return Err(Error::Backend("bookkeeping tables do not exist".to_string()));
        }
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            statements: Vec::new(),
            migrations: Vec::new(),
            snapshots: Vec::new(),
        }))
    }
}

/// Buffered writes, applied on commit.
struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    statements: Vec<String>,
    migrations: Vec<MigrationRecord>,
    snapshots: Vec<(String, serde_json::Value)>,
}

#[async_trait]
impl MigrationTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        // Give concurrent runs a chance to interleave.
        tokio::task::yield_now().await;
        let failing = self
            .state
            .lock()
            .failures
            .iter()
            .any(|pattern| statement.contains(pattern.as_str()));
        if failing {
            return Err(Error::Backend(format!(
                "injected failure executing: {}",
                statement
            )));
        }
        self.statements.push(statement.to_string());
        Ok(())
    }

    async fn next_migration_id(&mut self) -> Result<i64> {
        let committed = self.state.lock().migrations.iter().map(|m| m.id).max();
        let pending = self.migrations.iter().map(|m| m.id).max();
        Ok(committed.max(pending).unwrap_or(0) + 1)
    }

    async fn insert_migration(&mut self, record: &MigrationRecord) -> Result<()> {
        self.migrations.push(record.clone());
        Ok(())
    }

    async fn store_snapshot(
        &mut self,
        digest: &str,
        description: &serde_json::Value,
    ) -> Result<()> {
        self.snapshots.push((digest.to_string(), description.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.lock();
        state.executed.extend(this.statements);
        state.migrations.extend(this.migrations);
        for (digest, description) in this.snapshots {
            state.snapshots.entry(digest).or_insert(description);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> MigrationRecord {
        MigrationRecord {
            id,
            digest: format!("d{}", id),
            statements: vec!["SELECT 1".to_string()],
            applied_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_lock_is_per_session() {
        let first = MemoryStore::new();
        let second = first.connect();

        assert!(first.try_lock(1).await.unwrap());
        assert!(first.try_lock(1).await.unwrap());
        assert!(!second.try_lock(1).await.unwrap());
        assert!(second.unlock(1).await.is_err());

        first.unlock(1).await.unwrap();
        assert!(second.try_lock(1).await.unwrap());
        assert!(second.holds_lock(1));
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        store.prepare().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.execute("CREATE TABLE a ()").await.unwrap();
        assert_eq!(tx.next_migration_id().await.unwrap(), 1);
        tx.insert_migration(&record(1)).await.unwrap();
        assert!(store.executed().is_empty());
        tx.commit().await.unwrap();

        assert_eq!(store.executed(), vec!["CREATE TABLE a ()"]);
        assert_eq!(store.latest_migration().await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        store.prepare().await.unwrap();
        store.fail_on("boom");

        let mut tx = store.begin().await.unwrap();
        tx.execute("CREATE TABLE a ()").await.unwrap();
        assert!(tx.execute("SELECT boom").await.is_err());
        tx.rollback().await.unwrap();

        assert!(store.executed().is_empty());
        assert!(store.migrations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_canned_violations() {
        let store = MemoryStore::new().with_violations("users", "age", 3);
        let check = DataCheck::any_rows("users", "age", "table must be empty");
        assert_eq!(store.count_violations(&check).await.unwrap(), 3);

        let other = DataCheck::any_rows("users", "name", "table must be empty");
        assert_eq!(store.count_violations(&other).await.unwrap(), 0);
    }
}
