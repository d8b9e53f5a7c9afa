//! schemasync core - declarative tables and access rules to PostgreSQL.
//!
//! This crate compiles table descriptions into DDL, row-level security
//! policies and column privileges, and applies them under a checksum gate
//! in a single transaction.

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod ddl;
pub mod error;
pub mod lock;
pub mod mapper;
pub mod migration;
pub mod orchestrator;
pub mod plan;
pub mod policy;
pub mod sql;
pub mod store;

pub use catalog::{
    AccessRule, CrudAction, DefaultValue, FieldAccess, FieldConstraints, FieldDescription,
    FieldId, FieldType, PrimaryKey, ReferentialAction, TableAccess, TableDescription, TableId,
};
pub use checksum::{digest, ChecksumTracker, SchemaChecksum};
pub use config::{PolicyConfig, SessionPredicates, SyncConfig};
pub use ddl::{
    ConversionKind, ConversionPolicy, DataCheck, DdlGenerator, Rename, RenameKind, TableDdl,
};
pub use error::{Error, Result};
pub use mapper::{ColumnSpec, ColumnType, FieldTypeMapper};
pub use migration::{MigrationBatch, MigrationExecutor, MigrationRecord};
pub use orchestrator::{Orchestrator, RunOutcome, RunState};
pub use plan::SchemaPlan;
pub use policy::{
    CompiledPolicies, OpenRoleRegistry, PolicyCompiler, RoleRegistry, StaticRoleRegistry,
};
pub use store::{MemoryStore, PgStore, SchemaStore};
