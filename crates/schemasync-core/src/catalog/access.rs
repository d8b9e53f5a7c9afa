//! Access rules attached to tables and fields.

use super::FieldId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// CRUD action a table-level rule governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrudAction {
    /// INSERT.
    Create,
    /// SELECT.
    Read,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
}

impl CrudAction {
    /// All actions, in policy emission order.
    pub const ALL: [CrudAction; 4] = [
        CrudAction::Create,
        CrudAction::Read,
        CrudAction::Update,
        CrudAction::Delete,
    ];

    /// Lowercase name, used in policy names.
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudAction::Create => "create",
            CrudAction::Read => "read",
            CrudAction::Update => "update",
            CrudAction::Delete => "delete",
        }
    }

    /// SQL command the action maps to.
    pub fn command(&self) -> &'static str {
        match self {
            CrudAction::Create => "INSERT",
            CrudAction::Read => "SELECT",
            CrudAction::Update => "UPDATE",
            CrudAction::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for CrudAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who may perform an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessRule {
    /// Anyone, including anonymous sessions.
    Public,
    /// Any session with an identity.
    Authenticated,
    /// Sessions holding at least one of the roles.
    ///
    /// Role names are opaque; they are validated by the authentication
    /// subsystem, not here.
    Roles {
        /// Accepted roles. Must not be empty.
        roles: BTreeSet<String>,
    },
    /// Sessions whose user id equals the value of the field.
    Owner {
        /// Field holding the owner's user id.
        field: FieldId,
    },
    /// A raw SQL condition, inserted verbatim.
    Custom {
        /// Trusted SQL boolean expression.
        condition: String,
    },
}

impl AccessRule {
    /// Create a role rule.
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AccessRule::Roles {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an owner rule.
    pub fn owner(field: FieldId) -> Self {
        AccessRule::Owner { field }
    }

    /// Create a custom rule.
    pub fn custom(condition: impl Into<String>) -> Self {
        AccessRule::Custom {
            condition: condition.into(),
        }
    }

    /// Lowercase variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AccessRule::Public => "public",
            AccessRule::Authenticated => "authenticated",
            AccessRule::Roles { .. } => "roles",
            AccessRule::Owner { .. } => "owner",
            AccessRule::Custom { .. } => "custom",
        }
    }

    /// Role names mentioned by the rule.
    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        let roles = match self {
            AccessRule::Roles { roles } => Some(roles),
            _ => None,
        };
        roles.into_iter().flatten().map(String::as_str)
    }
}

/// Table-level rules, one per CRUD action.
///
/// A missing rule denies the action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAccess {
    /// Rule for INSERT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<AccessRule>,
    /// Rule for SELECT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<AccessRule>,
    /// Rule for UPDATE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<AccessRule>,
    /// Rule for DELETE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<AccessRule>,
}

impl TableAccess {
    /// Rule for the given action.
    pub fn rule(&self, action: CrudAction) -> Option<&AccessRule> {
        match action {
            CrudAction::Create => self.create.as_ref(),
            CrudAction::Read => self.read.as_ref(),
            CrudAction::Update => self.update.as_ref(),
            CrudAction::Delete => self.delete.as_ref(),
        }
    }

    /// Set the rule for the given action.
    pub fn set(&mut self, action: CrudAction, rule: AccessRule) {
        let slot = match action {
            CrudAction::Create => &mut self.create,
            CrudAction::Read => &mut self.read,
            CrudAction::Update => &mut self.update,
            CrudAction::Delete => &mut self.delete,
        };
        *slot = Some(rule);
    }

    /// Iterate over the rules that are present.
    pub fn rules(&self) -> impl Iterator<Item = (CrudAction, &AccessRule)> {
        CrudAction::ALL
            .into_iter()
            .filter_map(move |action| self.rule(action).map(|rule| (action, rule)))
    }
}

/// Column-level access for one field, applied on top of the table rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAccess {
    /// Who may read the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<AccessRule>,
    /// Who may write the column (INSERT and UPDATE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<AccessRule>,
}

impl FieldAccess {
    /// Check if no override is declared.
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}
