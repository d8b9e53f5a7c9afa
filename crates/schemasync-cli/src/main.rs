//! schemasync - synchronize a PostgreSQL schema with a table description.

mod config;
mod error;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use schemasync_core::{Orchestrator, PgStore, TableDescription};

use crate::config::{Args, CliConfig};
use crate::error::CliError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schemasync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting schemasync");

    let config = Args::parse().into_config();
    tracing::info!(
        description = %config.description_path.display(),
        lock_key = config.sync.lock_key,
        dry_run = config.dry_run,
        "configuration loaded"
    );

    if let Err(e) = sync(&config).await {
        tracing::error!(error = %e, retryable = e.is_retryable(), "schema synchronization failed");
        return Err(e.into());
    }
    Ok(())
}

async fn sync(config: &CliConfig) -> Result<(), CliError> {
    let tables = load_tables(&config.description_path)?;
    tracing::info!(tables = tables.len(), "description loaded");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));
    let orchestrator = Orchestrator::new(store, config.sync.clone()).with_registry(config.registry());

    if config.dry_run {
        let plan = orchestrator.plan(&tables).await?;
        for check in &plan.data_checks {
            println!("-- requires zero rows: {}", check.query);
        }
        for statement in &plan.statements {
            println!("{};", statement);
        }
        tracing::info!(count = plan.len(), "dry run complete");
        return Ok(());
    }

    let outcome = orchestrator.run(&tables).await?;
    tracing::info!(
        digest = %outcome.digest,
        state = %outcome.state,
        migration = ?outcome.migration.as_ref().map(|m| m.id),
        "schema synchronized"
    );
    Ok(())
}

fn load_tables(path: &Path) -> Result<Vec<TableDescription>, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
