//! Startup entry point.
//!
//! A run computes the description digest and returns at once when it
//! matches the stored checksum. Otherwise it takes the migration lock,
//! re-checks, generates the batch, probes existing data, applies the batch
//! in one transaction and only then saves the checksum.

use crate::catalog::TableDescription;
use crate::checksum::{self, ChecksumTracker};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::lock;
use crate::migration::{MigrationBatch, MigrationExecutor, MigrationRecord};
use crate::plan::SchemaPlan;
use crate::policy::{OpenRoleRegistry, RoleRegistry};
use crate::store::SchemaStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing done yet.
    Idle,
    /// Digest computed.
    ChecksumComputed,
    /// Digest matched the stored checksum. Terminal.
    Unchanged,
    /// Generating statements.
    Generating,
    /// Executing the batch.
    Executing,
    /// Batch committed and checksum saved. Terminal.
    Committed,
    /// Batch failed and was rolled back. Terminal.
    RolledBack,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::ChecksumComputed => write!(f, "checksum_computed"),
            RunState::Unchanged => write!(f, "unchanged"),
            RunState::Generating => write!(f, "generating"),
            RunState::Executing => write!(f, "executing"),
            RunState::Committed => write!(f, "committed"),
            RunState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Digest of the description.
    pub digest: String,
    /// Terminal state: [`RunState::Unchanged`] or [`RunState::Committed`].
    pub state: RunState,
    /// Migration applied by this run, or found committed without a saved
    /// checksum.
    pub migration: Option<MigrationRecord>,
}

impl RunOutcome {
    fn unchanged(digest: String) -> Self {
        Self {
            digest,
            state: RunState::Unchanged,
            migration: None,
        }
    }

    /// Whether the run had anything to do.
    pub fn changed(&self) -> bool {
        self.state != RunState::Unchanged
    }

    /// Statements of the applied migration.
    pub fn statements(&self) -> &[String] {
        self.migration
            .as_ref()
            .map(|m| m.statements.as_slice())
            .unwrap_or_default()
    }
}

/// Keeps a database in sync with a table description.
pub struct Orchestrator {
    store: Arc<dyn SchemaStore>,
    config: SyncConfig,
    registry: Arc<dyn RoleRegistry>,
}

impl Orchestrator {
    /// Create an orchestrator accepting every role name.
    pub fn new(store: Arc<dyn SchemaStore>, config: SyncConfig) -> Self {
        Self {
            store,
            config,
            registry: Arc::new(OpenRoleRegistry),
        }
    }

    /// Consult `registry` for role names.
    pub fn with_registry(mut self, registry: Arc<dyn RoleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Bring the database in line with `tables`.
    pub async fn run(&self, tables: &[TableDescription]) -> Result<RunOutcome> {
        let mut state = RunState::Idle;
        let digest = checksum::digest(tables)?;
        advance(&mut state, RunState::ChecksumComputed);
        info!(digest = %digest, "Computed schema digest");

        let tracker = ChecksumTracker::new(self.store.as_ref());
        let changed = tracker.has_changed(&digest).await?;
        info!(changed, "Compared schema digest");
        if !changed {
            advance(&mut state, RunState::Unchanged);
            return Ok(RunOutcome::unchanged(digest));
        }

        let guard = lock::acquire(self.store.as_ref(), &self.config).await?;
        let result = self.migrate(tables, digest, &mut state).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release migration lock");
        }
        if let Err(e) = &result {
            warn!(state = %state, error = %e, "Schema run failed");
        }
        result
    }

    /// Statements a run would execute, without locking or writing.
    ///
    /// Empty when the description matches the stored checksum.
    pub async fn plan(&self, tables: &[TableDescription]) -> Result<SchemaPlan> {
        let digest = checksum::digest(tables)?;
        if !ChecksumTracker::new(self.store.as_ref())
            .has_changed(&digest)
            .await?
        {
            return Ok(SchemaPlan::default());
        }
        let previous = self.previous_description().await?;
        SchemaPlan::generate(
            previous.as_deref(),
            tables,
            &self.config.policy,
            self.registry.as_ref(),
        )
    }

    async fn migrate(
        &self,
        tables: &[TableDescription],
        digest: String,
        state: &mut RunState,
    ) -> Result<RunOutcome> {
        let store = self.store.as_ref();
        let tracker = ChecksumTracker::new(store);
        store.prepare().await?;

        if !tracker.has_changed(&digest).await? {
            info!("Schema was synchronized by another process");
            advance(state, RunState::Unchanged);
            return Ok(RunOutcome::unchanged(digest));
        }

        if let Some(latest) = store.latest_migration().await? {
            if latest.digest == digest {
                warn!(id = latest.id, "Migration committed without a saved checksum, saving it");
                tracker.save(&digest).await?;
                advance(state, RunState::Committed);
                return Ok(RunOutcome {
                    digest,
                    state: RunState::Committed,
                    migration: Some(latest),
                });
            }
        }

        advance(state, RunState::Generating);
        let previous = self.previous_description().await?;
        let plan = SchemaPlan::generate(
            previous.as_deref(),
            tables,
            &self.config.policy,
            self.registry.as_ref(),
        )?;
        info!(statements = ?plan.statements, "Generated migration statements");
        self.check_existing_data(&plan).await?;

        advance(state, RunState::Executing);
        info!(count = plan.len(), "Executing migration statements");
        let batch = MigrationBatch::new(digest.clone(), plan.statements)
            .with_snapshot(checksum::canonical_form(tables)?);
        let record = match MigrationExecutor::new(store).apply(&batch).await {
            Ok(record) => record,
            Err(e) => {
                advance(state, RunState::RolledBack);
                return Err(e);
            }
        };

        tracker.save(&digest).await?;
        advance(state, RunState::Committed);
        Ok(RunOutcome {
            digest,
            state: RunState::Committed,
            migration: Some(record),
        })
    }

    /// Description the database was last migrated to.
    async fn previous_description(&self) -> Result<Option<Vec<TableDescription>>> {
        let Some(latest) = self.store.latest_migration().await? else {
            return Ok(None);
        };
        match self.store.load_snapshot(&latest.digest).await? {
            Some(snapshot) => Ok(Some(serde_json::from_value(snapshot)?)),
            None => {
                warn!(
                    digest = %latest.digest,
                    "No description snapshot for the applied schema, falling back to create statements"
                );
                Ok(None)
            }
        }
    }

    async fn check_existing_data(&self, plan: &SchemaPlan) -> Result<()> {
        for check in &plan.data_checks {
            let rows = self.store.count_violations(check).await?;
            debug!(table = %check.table, column = %check.column, rows, "Probed existing data");
            if rows > 0 {
                return Err(Error::IncompatibleExistingData {
                    table: check.table.clone(),
                    field: check.column.clone(),
                    reason: check.reason.clone(),
                    rows,
                });
            }
        }
        Ok(())
    }
}

fn advance(state: &mut RunState, next: RunState) {
    debug!(from = %state, to = %next, "Run state changed");
    *state = next;
}
