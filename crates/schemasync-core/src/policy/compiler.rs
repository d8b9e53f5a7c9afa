//! Policy compiler.

use super::registry::RoleRegistry;
use super::{ColumnGrant, CompiledPolicies, GrantKind, TablePolicy};
use crate::catalog::{AccessRule, CrudAction, FieldDescription, TableDescription};
use crate::config::PolicyConfig;
use crate::error::{Error, Result};
use crate::sql::{object_name, quote_ident, quote_literal};
use std::collections::BTreeSet;

/// Compiles table and field access rules into SQL.
pub struct PolicyCompiler<'a> {
    config: &'a PolicyConfig,
    registry: &'a dyn RoleRegistry,
}

impl<'a> PolicyCompiler<'a> {
    /// Create a compiler.
    pub fn new(config: &'a PolicyConfig, registry: &'a dyn RoleRegistry) -> Self {
        Self { config, registry }
    }

    /// Compile the rules of a table.
    pub fn compile(&self, table: &TableDescription) -> Result<CompiledPolicies> {
        self.verify_roles(table)?;

        let name = quote_ident(&table.name);
        let mut setup = vec![format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY", name)];
        if self.config.force_row_security {
            setup.push(format!("ALTER TABLE {} FORCE ROW LEVEL SECURITY", name));
        } else {
            setup.push(format!("ALTER TABLE {} NO FORCE ROW LEVEL SECURITY", name));
        }

        let table_policies = CrudAction::ALL
            .into_iter()
            .map(|action| {
                let expression = match table.access.rule(action) {
                    Some(rule) => self.expression(table, rule)?,
                    None => "false".to_string(),
                };
                Ok(TablePolicy {
                    table: table.name.clone(),
                    name: Self::policy_name(action),
                    action,
                    expression,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledPolicies {
            setup,
            table_policies,
            column_grants: self.column_grants(table)?,
        })
    }

    /// Name of the policy for an action. Independent of the table name, so
    /// renaming a table never leaves a stale policy behind.
    pub fn policy_name(action: CrudAction) -> String {
        object_name(&["schemasync", action.as_str()])
    }

    /// Render a rule as a boolean SQL expression.
    pub fn expression(&self, table: &TableDescription, rule: &AccessRule) -> Result<String> {
        let predicates = &self.config.predicates;
        let expression = match rule {
            AccessRule::Public => "true".to_string(),
            AccessRule::Authenticated => format!("{} IS NOT NULL", predicates.user_id),
            AccessRule::Roles { roles } => {
                let checks: Vec<String> = roles
                    .iter()
                    .map(|role| format!("{}({})", predicates.has_role, quote_literal(role)))
                    .collect();
                match checks.len() {
                    0 => return Err(Error::invalid(&table.name, "role rule with no roles")),
                    1 => checks.concat(),
                    _ => format!("({})", checks.join(" OR ")),
                }
            }
            AccessRule::Owner { field } => {
                let owner = table.field(*field).ok_or_else(|| {
                    Error::invalid(
                        &table.name,
                        format!("owner rule references unknown field {}", field),
                    )
                })?;
                format!("{} = {}", predicates.user_id, quote_ident(&owner.name))
            }
            AccessRule::Custom { condition } => condition.clone(),
        };
        Ok(expression)
    }

    fn verify_roles(&self, table: &TableDescription) -> Result<()> {
        for role in Self::mentioned_roles(table) {
            self.registry
                .verify(&role)
                .map_err(|reason| Error::UnknownRole {
                    role: role.clone(),
                    table: table.name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    fn mentioned_roles(table: &TableDescription) -> BTreeSet<String> {
        let field_rules = table
            .fields
            .iter()
            .flat_map(|f| f.read_rule().into_iter().chain(f.write_rule()));
        table
            .access
            .rules()
            .map(|(_, rule)| rule)
            .chain(field_rules)
            .flat_map(|rule| rule.role_names())
            .map(str::to_string)
            .collect()
    }

    /// Roles that receive or lose privileges on the table.
    fn known_roles(&self, table: &TableDescription) -> BTreeSet<String> {
        let mut roles = self.registry.known_roles();
        roles.extend(Self::mentioned_roles(table));
        roles.extend(self.config.anonymous_role.iter().cloned());
        roles
    }

    /// Roles a field-level rule admits.
    fn admitted_roles(
        &self,
        table: &TableDescription,
        field: &FieldDescription,
        rule: &AccessRule,
        known: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        match rule {
            AccessRule::Public => Ok(known.clone()),
            AccessRule::Authenticated => {
                let mut roles = known.clone();
                if let Some(anonymous) = &self.config.anonymous_role {
                    roles.remove(anonymous);
                }
                Ok(roles)
            }
            AccessRule::Roles { roles } => Ok(roles.clone()),
            AccessRule::Owner { .. } | AccessRule::Custom { .. } => {
                Err(Error::UnsupportedFieldRule {
                    table: table.name.clone(),
                    field: field.name.clone(),
                    rule: rule.kind().to_string(),
                })
            }
        }
    }

    fn column_grants(&self, table: &TableDescription) -> Result<Vec<ColumnGrant>> {
        let known = self.known_roles(table);
        if known.is_empty() {
            return Ok(Vec::new());
        }
        let all_roles: Vec<String> = known.iter().cloned().collect();

        let read_overrides = self.overrides(table, &known, FieldDescription::read_rule)?;
        let write_overrides = self.overrides(table, &known, FieldDescription::write_rule)?;

        let mut table_wide = Vec::new();
        if read_overrides.is_empty() {
            table_wide.push("SELECT");
        }
        if write_overrides.is_empty() {
            table_wide.extend(["INSERT", "UPDATE"]);
        }
        table_wide.push("DELETE");

        let mut grants = vec![ColumnGrant {
            kind: GrantKind::Grant,
            privileges: table_wide,
            table: table.name.clone(),
            columns: None,
            roles: all_roles.clone(),
        }];

        let sides: [(&[&'static str], &Vec<(String, BTreeSet<String>)>); 2] = [
            (&["SELECT"], &read_overrides),
            (&["INSERT", "UPDATE"], &write_overrides),
        ];
        for (privileges, overrides) in sides {
            if overrides.is_empty() {
                continue;
            }
            let restricted: BTreeSet<&str> = overrides.iter().map(|(c, _)| c.as_str()).collect();
            let open_columns: Vec<String> = table
                .column_names()
                .into_iter()
                .filter(|c| !restricted.contains(c.as_str()))
                .collect();

            for &privilege in privileges {
                // Column privileges only bite once the table-wide one is gone.
                grants.push(ColumnGrant {
                    kind: GrantKind::Revoke,
                    privileges: vec![privilege],
                    table: table.name.clone(),
                    columns: None,
                    roles: all_roles.clone(),
                });
                if !open_columns.is_empty() {
                    grants.push(ColumnGrant {
                        kind: GrantKind::Grant,
                        privileges: vec![privilege],
                        table: table.name.clone(),
                        columns: Some(open_columns.clone()),
                        roles: all_roles.clone(),
                    });
                }
                for (column, admitted) in overrides {
                    let denied: Vec<String> = known.difference(admitted).cloned().collect();
                    if !denied.is_empty() {
                        grants.push(ColumnGrant {
                            kind: GrantKind::Revoke,
                            privileges: vec![privilege],
                            table: table.name.clone(),
                            columns: Some(vec![column.clone()]),
                            roles: denied,
                        });
                    }
                    if !admitted.is_empty() {
                        grants.push(ColumnGrant {
                            kind: GrantKind::Grant,
                            privileges: vec![privilege],
                            table: table.name.clone(),
                            columns: Some(vec![column.clone()]),
                            roles: admitted.iter().cloned().collect(),
                        });
                    }
                }
            }
        }

        Ok(grants)
    }

    /// Fields with an override on one side, with the roles it admits.
    fn overrides(
        &self,
        table: &TableDescription,
        known: &BTreeSet<String>,
        side: fn(&FieldDescription) -> Option<&AccessRule>,
    ) -> Result<Vec<(String, BTreeSet<String>)>> {
        table
            .fields
            .iter()
            .filter_map(|field| side(field).map(|rule| (field, rule)))
            .map(|(field, rule)| {
                let admitted = self.admitted_roles(table, field, rule, known)?;
                Ok((field.name.clone(), admitted))
            })
            .collect()
    }
}
