//! CREATE path.

use super::{
    column_specs, index_name, named_constraints, trigger_name, ConstraintKey, DdlGenerator,
    TableDdl, TOUCH_FUNCTION,
};
use crate::catalog::{
    FieldDescription, PrimaryKey, TableDescription, CREATED_AT_COLUMN, SURROGATE_KEY_COLUMN,
    UPDATED_AT_COLUMN,
};
use crate::error::Result;
use crate::sql::quote_ident;

pub(crate) fn surrogate_key_definition() -> String {
    format!(
        "{} BIGINT GENERATED BY DEFAULT AS IDENTITY",
        quote_ident(SURROGATE_KEY_COLUMN)
    )
}

pub(crate) fn timestamp_definitions() -> [String; 2] {
    [CREATED_AT_COLUMN, UPDATED_AT_COLUMN]
        .map(|c| format!("{} TIMESTAMPTZ NOT NULL DEFAULT now()", quote_ident(c)))
}

pub(crate) fn create_index(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&index_name(table, column)),
        quote_ident(table),
        quote_ident(column)
    )
}

pub(crate) fn sensitivity_comment(table: &str, field: &FieldDescription) -> String {
    let marker = if field.sensitive { "'sensitive'" } else { "NULL" };
    format!(
        "COMMENT ON COLUMN {}.{} IS {}",
        quote_ident(table),
        quote_ident(&field.name),
        marker
    )
}

pub(crate) fn touch_trigger(table: &str) -> [String; 2] {
    let trigger = quote_ident(&trigger_name(table));
    let table = quote_ident(table);
    [
        format!("DROP TRIGGER IF EXISTS {} ON {}", trigger, table),
        format!(
            "CREATE TRIGGER {} BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
            trigger, table, TOUCH_FUNCTION
        ),
    ]
}

impl DdlGenerator {
    /// Statements creating `table`, split by phase.
    pub fn create(table: &TableDescription) -> Result<TableDdl> {
        table.validate()?;
        let specs = column_specs(table)?;
        let constraints = named_constraints(table, &specs);
        let name = &table.name;

        let mut columns = Vec::new();
        if table.primary_key == PrimaryKey::Surrogate {
            columns.push(surrogate_key_definition());
        }
        // Declared order, not id order.
        columns.extend(
            table
                .fields
                .iter()
                .filter_map(|f| specs.get(&f.id))
                .map(|spec| spec.definition()),
        );
        if table.timestamps {
            columns.extend(timestamp_definitions());
        }

        let mut body = columns;
        let mut references = Vec::new();
        for (key, constraint) in &constraints {
            match key {
                ConstraintKey::ForeignKey(_) => {
                    references.extend(constraint.add_statements(name));
                }
                _ => body.push(format!(
                    "CONSTRAINT {} {}",
                    quote_ident(&constraint.name),
                    constraint.definition
                )),
            }
        }

        let mut structure = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(name),
            body.join(", ")
        )];

        for field in &table.fields {
            if field.indexed {
                structure.push(create_index(name, &field.name));
            }
        }
        for field in table.fields.iter().filter(|f| f.sensitive) {
            structure.push(sensitivity_comment(name, field));
        }
        if table.timestamps {
            structure.extend(touch_trigger(name));
        }

        Ok(TableDdl {
            structure,
            references,
            ..TableDdl::default()
        })
    }
}
