//! Integration tests for full runs against the in-memory store.

use schemasync_core::checksum::canonical_form;
use schemasync_core::{
    digest, AccessRule, CrudAction, DefaultValue, Error, FieldDescription, FieldType,
    MemoryStore, MigrationBatch, MigrationExecutor, Orchestrator, RunState, SchemaStore,
    StaticRoleRegistry, SyncConfig, TableDescription,
};
use std::sync::Arc;
use std::time::Duration;

struct TestContext {
    store: MemoryStore,
    orchestrator: Orchestrator,
}

impl TestContext {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        let orchestrator = Orchestrator::new(Arc::new(store.clone()), test_config());
        Self {
            store,
            orchestrator,
        }
    }

    /// Another process against the same database.
    fn peer(&self) -> Orchestrator {
        Orchestrator::new(Arc::new(self.store.connect()), test_config())
    }
}

fn test_config() -> SyncConfig {
    SyncConfig::new()
        .with_lock_timeout(Duration::from_secs(5))
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

fn users_table() -> TableDescription {
    TableDescription::new(1, "users")
        .with_field(FieldDescription::new(1, "email", FieldType::Text).required().unique())
        .with_field(FieldDescription::new(2, "name", FieldType::Text).required())
        .with_field(
            FieldDescription::new(3, "active", FieldType::Boolean)
                .with_default(DefaultValue::Bool(true)),
        )
        .with_rule(CrudAction::Read, AccessRule::Authenticated)
}

fn articles_table(title: &str) -> TableDescription {
    TableDescription::new(2, "articles")
        .with_field(FieldDescription::new(1, "slug", FieldType::Slug).required().unique())
        .with_field(FieldDescription::new(2, "body", FieldType::LongText))
        .with_field(FieldDescription::new(3, title, FieldType::Text).required())
        .with_rule(CrudAction::Read, AccessRule::Public)
}

fn people_table(age: FieldType) -> TableDescription {
    TableDescription::new(3, "people")
        .with_field(FieldDescription::new(1, "name", FieldType::Text).required())
        .with_field(FieldDescription::new(2, "age", age))
}

#[tokio::test]
async fn test_first_run_creates_and_second_run_is_noop() {
    let ctx = TestContext::new();
    let tables = vec![users_table()];

    let first = ctx.orchestrator.run(&tables).await.unwrap();
    assert_eq!(first.state, RunState::Committed);
    let executed = ctx.store.executed();
    assert!(executed.contains(
        &"CREATE TABLE IF NOT EXISTS \"users\" (\
          \"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY, \
          \"email\" TEXT NOT NULL, \
          \"name\" TEXT NOT NULL, \
          \"active\" BOOLEAN DEFAULT TRUE, \
          \"created_at\" TIMESTAMPTZ NOT NULL DEFAULT now(), \
          \"updated_at\" TIMESTAMPTZ NOT NULL DEFAULT now(), \
          CONSTRAINT \"users_pkey\" PRIMARY KEY (\"id\"), \
          CONSTRAINT \"users_email_key\" UNIQUE (\"email\"))"
            .to_string()
    ));
    assert!(executed
        .iter()
        .any(|s| s.contains("CREATE POLICY \"schemasync_read\" ON \"users\"")));

    let checksum = ctx.store.load_checksum().await.unwrap().unwrap();
    assert_eq!(checksum.digest, first.digest);

    let second = ctx.orchestrator.run(&tables).await.unwrap();
    assert_eq!(second.state, RunState::Unchanged);
    assert!(!second.changed());
    assert_eq!(ctx.store.executed().len(), executed.len());
    assert_eq!(ctx.store.migrations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_statement_leaves_nothing_behind() {
    let ctx = TestContext::new();
    ctx.store.fail_on("CREATE POLICY \"schemasync_update\"");

    let err = ctx.orchestrator.run(&[users_table()]).await.unwrap_err();
    assert!(matches!(err, Error::StatementFailed { .. }));
    assert!(err.is_retryable());
    assert!(ctx.store.executed().is_empty());
    assert!(ctx.store.load_checksum().await.unwrap().is_none());
    assert!(ctx.store.migrations().await.unwrap().is_empty());
    assert!(!ctx.store.holds_lock(test_config().lock_key));

    // The next start retries the same migration.
    ctx.store.clear_failures();
    let outcome = ctx.orchestrator.run(&[users_table()]).await.unwrap();
    assert_eq!(outcome.state, RunState::Committed);
    assert_eq!(outcome.migration.unwrap().id, 1);
}

#[tokio::test]
async fn test_field_rename_is_a_rename() {
    let ctx = TestContext::new();
    ctx.orchestrator.run(&[articles_table("title")]).await.unwrap();

    let outcome = ctx.orchestrator.run(&[articles_table("name")]).await.unwrap();
    let statements = outcome.statements();
    assert!(statements
        .contains(&"ALTER TABLE \"articles\" RENAME COLUMN \"title\" TO \"name\"".to_string()));
    assert!(!statements.iter().any(|s| s.contains("DROP COLUMN")));
    assert!(!statements.iter().any(|s| s.contains("ADD COLUMN")));
}

#[tokio::test]
async fn test_table_changes_across_runs() {
    let ctx = TestContext::new();
    ctx.orchestrator
        .run(&[users_table(), articles_table("title")])
        .await
        .unwrap();

    let mut renamed = users_table();
    renamed.name = "members".to_string();
    let outcome = ctx.orchestrator.run(&[renamed]).await.unwrap();
    let statements = outcome.statements();

    assert!(statements.contains(&"DROP TABLE IF EXISTS \"articles\" CASCADE".to_string()));
    assert!(statements.contains(&"ALTER TABLE \"users\" RENAME TO \"members\"".to_string()));
    assert!(!statements.iter().any(|s| s.starts_with("CREATE TABLE")));

    let ids: Vec<i64> = ctx
        .store
        .migrations()
        .await
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_concurrent_starts_migrate_once() {
    let ctx = TestContext::new();
    let peer = ctx.peer();
    let tables = vec![users_table(), articles_table("title")];

    let (a, b) = tokio::join!(ctx.orchestrator.run(&tables), peer.run(&tables));
    let mut states = vec![a.unwrap().state, b.unwrap().state];
    states.sort_by_key(|s| *s == RunState::Unchanged);

    assert_eq!(states, vec![RunState::Committed, RunState::Unchanged]);
    assert_eq!(ctx.store.migrations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_lock_held_elsewhere_times_out() {
    let ctx = TestContext::new();
    let holder = ctx.store.connect();
    assert!(holder.try_lock(test_config().lock_key).await.unwrap());

    let config = test_config().with_lock_timeout(Duration::from_millis(40));
    let orchestrator = Orchestrator::new(Arc::new(ctx.store.clone()), config);
    let err = orchestrator.run(&[users_table()]).await.unwrap_err();

    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(err.is_retryable());
    assert!(ctx.store.executed().is_empty());
}

#[tokio::test]
async fn test_commit_without_checksum_is_recovered() {
    let ctx = TestContext::new();
    let tables = vec![users_table()];
    let digest = digest(&tables).unwrap();

    // A previous process committed the migration and died before saving.
    ctx.store.prepare().await.unwrap();
    let batch = MigrationBatch::new(digest.clone(), vec!["SELECT 1".to_string()])
        .with_snapshot(canonical_form(&tables).unwrap());
    MigrationExecutor::new(&ctx.store).apply(&batch).await.unwrap();

    let outcome = ctx.orchestrator.run(&tables).await.unwrap();
    assert_eq!(outcome.state, RunState::Committed);
    assert_eq!(outcome.migration.unwrap().id, 1);
    assert_eq!(ctx.store.executed(), vec!["SELECT 1".to_string()]);
    assert_eq!(
        ctx.store.load_checksum().await.unwrap().unwrap().digest,
        digest
    );
}

#[tokio::test]
async fn test_incompatible_data_blocks_conversion() {
    let ctx = TestContext::with_store(MemoryStore::new().with_violations("people", "age", 2));
    let before = ctx
        .orchestrator
        .run(&[people_table(FieldType::Text)])
        .await
        .unwrap();
    let executed = ctx.store.executed().len();

    let err = ctx
        .orchestrator
        .run(&[people_table(FieldType::Integer)])
        .await
        .unwrap_err();
    match &err {
        Error::IncompatibleExistingData { table, field, rows, .. } => {
            assert_eq!(table, "people");
            assert_eq!(field, "age");
            assert_eq!(*rows, 2);
        }
        other => panic!("Expected IncompatibleExistingData, got {:?}", other),
    }
    assert!(err.is_generation_error());
    assert_eq!(ctx.store.executed().len(), executed);
    assert_eq!(
        ctx.store.load_checksum().await.unwrap().unwrap().digest,
        before.digest
    );
}

#[tokio::test]
async fn test_clean_data_allows_conversion() {
    let ctx = TestContext::new();
    ctx.orchestrator
        .run(&[people_table(FieldType::Text)])
        .await
        .unwrap();

    let outcome = ctx
        .orchestrator
        .run(&[people_table(FieldType::Integer)])
        .await
        .unwrap();
    assert!(outcome
        .statements()
        .iter()
        .any(|s| s.contains("ALTER COLUMN \"age\" TYPE INTEGER USING")));
}

#[tokio::test]
async fn test_generation_error_has_no_side_effects() {
    let ctx = TestContext::new();
    let broken = users_table().with_field(FieldDescription::new(9, "blob", FieldType::Unrecognized));

    let err = ctx.orchestrator.run(&[broken]).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedFieldType { .. }));
    assert!(err.is_generation_error());
    assert!(!err.is_retryable());
    assert!(ctx.store.executed().is_empty());
    assert!(ctx.store.load_checksum().await.unwrap().is_none());
}

#[tokio::test]
async fn test_role_registry_hook() {
    let ctx = TestContext::new();
    let orchestrator = Orchestrator::new(Arc::new(ctx.store.clone()), test_config())
        .with_registry(Arc::new(StaticRoleRegistry::new(["admin"]).strict()));
    let table = users_table().with_rule(CrudAction::Delete, AccessRule::roles(["janitor"]));

    let err = orchestrator.run(&[table]).await.unwrap_err();
    assert!(matches!(err, Error::UnknownRole { .. }));
    assert!(ctx.store.executed().is_empty());
}
