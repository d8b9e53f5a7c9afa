//! DDL generation.
//!
//! [`DdlGenerator`] renders the statements that create a table from its
//! description, and the statements that evolve a table from a previous
//! description to the current one. Generation is pure: nothing here talks
//! to the database. Changes that depend on existing data come back as
//! [`DataCheck`] probes for the caller to run before executing anything.
//!
//! Every statement is phrased so that re-issuing it after a partial run is
//! harmless (`IF NOT EXISTS`, `IF EXISTS`, drop-then-add for constraints).

pub mod conversion;
mod create;
mod diff;

use crate::catalog::{FieldId, PrimaryKey, TableDescription, SURROGATE_KEY_COLUMN};
use crate::error::Result;
use crate::mapper::{CheckKind, ColumnConstraint, ColumnSpec, FieldTypeMapper};
use crate::sql::{ident_list, object_name, quote_ident};
use std::collections::{BTreeMap, BTreeSet};

pub use conversion::{ConversionKind, ConversionPolicy, ConversionRule};

/// Trigger function that stamps `updated_at` on every update.
pub const TOUCH_FUNCTION: &str = "schemasync_touch_updated_at";

/// A read-only probe that must count zero rows before a change is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCheck {
    /// Table to probe, under its name before the migration.
    pub table: String,
    /// Column the change concerns, under its name before the migration.
    pub column: String,
    /// What the change requires of the existing rows.
    pub reason: String,
    /// Query returning the number of offending rows as a single BIGINT.
    pub query: String,
}

impl DataCheck {
    fn new(table: &str, column: &str, reason: impl Into<String>, query: String) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            reason: reason.into(),
            query,
        }
    }

    /// Probe counting rows of `table` that match `predicate`.
    pub(crate) fn rows_matching(
        table: &str,
        column: &str,
        reason: impl Into<String>,
        predicate: &str,
    ) -> Self {
        let query = format!(
            "SELECT count(*) FROM {} WHERE {}",
            quote_ident(table),
            predicate
        );
        Self::new(table, column, reason, query)
    }

    /// Probe counting every row of `table`.
    pub(crate) fn any_rows(table: &str, column: &str, reason: impl Into<String>) -> Self {
        let query = format!("SELECT count(*) FROM {}", quote_ident(table));
        Self::new(table, column, reason, query)
    }

    /// Probe counting duplicated non-null values of `column`.
    pub(crate) fn duplicates(table: &str, column: &str) -> Self {
        let col = quote_ident(column);
        let query = format!(
            "SELECT count(*) FROM (SELECT {col} FROM {} WHERE {col} IS NOT NULL GROUP BY {col} HAVING count(*) > 1) AS duplicated",
            quote_ident(table)
        );
        Self::new(table, column, "values must be unique", query)
    }
}

/// Object class a [`Rename`] applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameKind {
    /// A table.
    Table,
    /// A column of the named table.
    Column(String),
    /// A constraint of the named table.
    Constraint(String),
    /// An index.
    Index,
}

/// A database object changing its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    /// Object class; the table is the one holding the object after table
    /// renames.
    pub kind: RenameKind,
    /// Current name.
    pub from: String,
    /// Name after the migration.
    pub to: String,
}

impl Rename {
    pub(crate) fn new(kind: RenameKind, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind,
            from: from.into(),
            to: to.into(),
        }
    }

    /// Whether this renames a table.
    pub fn is_table(&self) -> bool {
        self.kind == RenameKind::Table
    }

    fn statement(&self, from: &str, to: &str) -> String {
        let (from, to) = (quote_ident(from), quote_ident(to));
        match &self.kind {
            RenameKind::Table => format!("ALTER TABLE {} RENAME TO {}", from, to),
            RenameKind::Column(table) => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote_ident(table),
                from,
                to
            ),
            RenameKind::Constraint(table) => format!(
                "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                quote_ident(table),
                from,
                to
            ),
            RenameKind::Index => format!("ALTER INDEX IF EXISTS {} RENAME TO {}", from, to),
        }
    }
}

/// Statements applying renames that share one namespace.
///
/// A rename whose target is still held by another renamed object first
/// moves to a temporary name and takes its target once every direct rename
/// has run. Swaps and longer cycles resolve the same way.
pub fn rename_statements<'a, I>(renames: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Rename>,
{
    let renames: Vec<&Rename> = renames.into_iter().collect();
    let sources: BTreeSet<&str> = renames.iter().map(|r| r.from.as_str()).collect();
    let (parked, direct): (Vec<&Rename>, Vec<&Rename>) = renames
        .into_iter()
        .partition(|r| sources.contains(r.to.as_str()));

    let mut statements = Vec::new();
    for rename in &parked {
        statements.push(rename.statement(&rename.from, &temporary_name(&rename.from)));
    }
    for rename in &direct {
        statements.push(rename.statement(&rename.from, &rename.to));
    }
    for rename in &parked {
        statements.push(rename.statement(&temporary_name(&rename.from), &rename.to));
    }
    statements
}

fn temporary_name(name: &str) -> String {
    object_name(&["schemasync_tmp", name])
}

/// Statements for one table, split by the phase they must run in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDdl {
    /// Drops of changed constraints and indexes, against the previous table
    /// name; run before any object of the batch is renamed.
    pub teardown: Vec<String>,
    /// Table, constraint and index renames; resolved across the batch.
    pub renames: Vec<Rename>,
    /// Statements on the table itself.
    pub structure: Vec<String>,
    /// Foreign key statements; run after every table of the batch exists.
    pub references: Vec<String>,
    /// Probes to run before any statement.
    pub data_checks: Vec<DataCheck>,
}

impl TableDdl {
    /// All statements in execution order.
    pub fn statements(&self) -> Vec<String> {
        let mut statements = self.teardown.clone();
        statements.extend(rename_statements(self.renames.iter().filter(|r| r.is_table())));
        statements.extend(rename_statements(self.renames.iter().filter(|r| !r.is_table())));
        statements.extend(self.structure.iter().cloned());
        statements.extend(self.references.iter().cloned());
        statements
    }

    /// Check if nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.teardown.is_empty()
            && self.renames.is_empty()
            && self.structure.is_empty()
            && self.references.is_empty()
    }
}

/// Identity of a named table constraint, stable across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum ConstraintKey {
    Primary,
    Unique(FieldId),
    Check(FieldId, CheckKind),
    ForeignKey(FieldId),
}

/// A table constraint with its database name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NamedConstraint {
    pub name: String,
    pub definition: String,
}

impl NamedConstraint {
    fn add_statements(&self, table: &str) -> [String; 2] {
        let table = quote_ident(table);
        [
            format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                table,
                quote_ident(&self.name)
            ),
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} {}",
                table,
                quote_ident(&self.name),
                self.definition
            ),
        ]
    }
}

pub(crate) fn primary_key_name(table: &str) -> String {
    object_name(&[table, "pkey"])
}

pub(crate) fn index_name(table: &str, column: &str) -> String {
    object_name(&[table, column, "idx"])
}

pub(crate) fn trigger_name(table: &str) -> String {
    object_name(&[table, "touch_updated_at"])
}

fn constraint_name(table: &str, column: &str, key: ConstraintKey) -> String {
    match key {
        ConstraintKey::Primary => primary_key_name(table),
        ConstraintKey::Unique(_) => object_name(&[table, column, "key"]),
        ConstraintKey::Check(_, kind) => object_name(&[table, column, kind.as_str(), "check"]),
        ConstraintKey::ForeignKey(_) => object_name(&[table, column, "fkey"]),
    }
}

/// Column specs of a table, keyed by field id.
pub(crate) fn column_specs(table: &TableDescription) -> Result<BTreeMap<FieldId, ColumnSpec>> {
    table
        .fields
        .iter()
        .map(|f| Ok((f.id, FieldTypeMapper::map(&table.name, f)?)))
        .collect()
}

/// Named constraints of a table, keyed by stable identity.
pub(crate) fn named_constraints(
    table: &TableDescription,
    specs: &BTreeMap<FieldId, ColumnSpec>,
) -> BTreeMap<ConstraintKey, NamedConstraint> {
    let mut constraints = BTreeMap::new();

    let key_columns: Vec<&str> = match &table.primary_key {
        PrimaryKey::Surrogate => vec![SURROGATE_KEY_COLUMN],
        PrimaryKey::Fields(ids) => ids
            .iter()
            .filter_map(|id| table.field(*id).map(|f| f.name.as_str()))
            .collect(),
    };
    constraints.insert(
        ConstraintKey::Primary,
        NamedConstraint {
            name: primary_key_name(&table.name),
            definition: format!("PRIMARY KEY ({})", ident_list(key_columns)),
        },
    );

    for (id, spec) in specs {
        let column = quote_ident(&spec.name);
        for constraint in &spec.constraints {
            let (key, definition) = match constraint {
                ColumnConstraint::NotNull => continue,
                ColumnConstraint::Unique => (ConstraintKey::Unique(*id), format!("UNIQUE ({})", column)),
                ColumnConstraint::Check { kind, expression } => (
                    ConstraintKey::Check(*id, *kind),
                    format!("CHECK ({})", expression),
                ),
                ColumnConstraint::ForeignKey {
                    table: target,
                    column: target_column,
                    on_delete,
                } => (
                    ConstraintKey::ForeignKey(*id),
                    format!(
                        "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                        column,
                        quote_ident(target),
                        quote_ident(target_column),
                        on_delete.as_sql()
                    ),
                ),
            };
            constraints.insert(
                key,
                NamedConstraint {
                    name: constraint_name(&table.name, &spec.name, key),
                    definition,
                },
            );
        }
    }

    constraints
}

/// Generates DDL from table descriptions.
pub struct DdlGenerator;

impl DdlGenerator {
    /// Statements shared by every table, emitted once per batch.
    pub fn prelude() -> Vec<String> {
        vec![format!(
            "CREATE OR REPLACE FUNCTION {}() RETURNS trigger LANGUAGE plpgsql AS $$ BEGIN NEW.updated_at := now(); RETURN NEW; END; $$",
            TOUCH_FUNCTION
        )]
    }

    /// Statements removing a table that left the description.
    pub fn drop_table(previous: &TableDescription) -> Vec<String> {
        vec![format!(
            "DROP TABLE IF EXISTS {} CASCADE",
            quote_ident(&previous.name)
        )]
    }

    /// Ordered statements creating the table, its indexes and constraints.
    pub fn generate_create(table: &TableDescription) -> Result<Vec<String>> {
        Ok(Self::create(table)?.statements())
    }

    /// Ordered statements evolving `previous` into `current`.
    ///
    /// Fields are matched by id; a changed name is a rename.
    pub fn generate_diff(
        previous: &TableDescription,
        current: &TableDescription,
    ) -> Result<Vec<String>> {
        Ok(Self::diff(previous, current)?.statements())
    }
}
