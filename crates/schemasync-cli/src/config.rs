//! Command-line configuration.

use clap::Parser;
use schemasync_core::config::{
    DEFAULT_HAS_ROLE_FN, DEFAULT_LOCK_KEY, DEFAULT_LOCK_TIMEOUT, DEFAULT_USER_ID_EXPR,
};
use schemasync_core::{OpenRoleRegistry, PolicyConfig, RoleRegistry, StaticRoleRegistry, SyncConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default size of the connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// JSON file holding the table list.
    pub description_path: PathBuf,
    /// Connection pool size.
    pub max_connections: u32,
    /// Print the statements instead of applying them.
    pub dry_run: bool,
    /// Roles known to the application.
    pub roles: Vec<String>,
    /// Reject roles outside `roles`.
    pub strict_roles: bool,
    /// Synchronization settings.
    pub sync: SyncConfig,
}

impl CliConfig {
    /// Role registry described by the configuration.
    pub fn registry(&self) -> Arc<dyn RoleRegistry> {
        if self.roles.is_empty() && !self.strict_roles {
            return Arc::new(OpenRoleRegistry);
        }
        let registry = StaticRoleRegistry::new(self.roles.iter().cloned());
        if self.strict_roles {
            Arc::new(registry.strict())
        } else {
            Arc::new(registry)
        }
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "schemasync")]
#[command(version, about = "Synchronize a PostgreSQL schema with a table description", long_about = None)]
pub struct Args {
    /// JSON file containing the list of table descriptions.
    pub description: PathBuf,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Connection pool size.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,

    /// Advisory lock key serializing concurrent runs.
    #[arg(long, default_value_t = DEFAULT_LOCK_KEY)]
    pub lock_key: i64,

    /// Seconds to wait for the advisory lock.
    #[arg(long, default_value_t = DEFAULT_LOCK_TIMEOUT.as_secs())]
    pub lock_timeout: u64,

    /// SQL expression yielding the session user id.
    #[arg(long, default_value = DEFAULT_USER_ID_EXPR)]
    pub user_id_expr: String,

    /// SQL function checking whether the session holds a role.
    #[arg(long, default_value = DEFAULT_HAS_ROLE_FN)]
    pub has_role_fn: String,

    /// Database role of anonymous sessions.
    #[arg(long)]
    pub anonymous_role: Option<String>,

    /// Apply row-level security to table owners too.
    #[arg(long)]
    pub force_rls: bool,

    /// Application roles, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub roles: Vec<String>,

    /// Reject roles not listed in --roles.
    #[arg(long)]
    pub strict_roles: bool,

    /// Print the statements a run would execute and exit.
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    /// Convert command-line arguments to runner configuration.
    pub fn into_config(self) -> CliConfig {
        let mut policy = PolicyConfig::default().with_predicates(self.user_id_expr, self.has_role_fn);
        if let Some(role) = self.anonymous_role {
            policy = policy.with_anonymous_role(role);
        }
        if self.force_rls {
            policy = policy.with_forced_row_security();
        }

        let sync = SyncConfig::new()
            .with_lock_key(self.lock_key)
            .with_lock_timeout(Duration::from_secs(self.lock_timeout))
            .with_policy(policy);

        CliConfig {
            database_url: self.database_url,
            description_path: self.description,
            max_connections: self.max_connections.max(1),
            dry_run: self.dry_run,
            roles: self.roles,
            strict_roles: self.strict_roles,
            sync,
        }
    }
}
