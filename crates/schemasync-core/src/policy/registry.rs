//! Role registry hook.
//!
//! Role names are opaque to the compiler. A registry can contribute roles
//! that should receive column grants even when no rule names them, and can
//! reject names it does not know. The default registry does neither.

use std::collections::BTreeSet;

/// Application-level role registry consulted by the policy compiler.
pub trait RoleRegistry: Send + Sync {
    /// Roles that exist regardless of whether a rule mentions them.
    fn known_roles(&self) -> BTreeSet<String>;

    /// Accept or reject a role named by a rule.
    fn verify(&self, role: &str) -> Result<(), String>;
}

/// Registry that accepts every role and knows none up front.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenRoleRegistry;

impl RoleRegistry for OpenRoleRegistry {
    fn known_roles(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn verify(&self, _role: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Registry backed by a fixed list of roles.
#[derive(Debug, Default, Clone)]
pub struct StaticRoleRegistry {
    roles: BTreeSet<String>,
    strict: bool,
}

impl StaticRoleRegistry {
    /// Create a registry knowing the given roles.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            strict: false,
        }
    }

    /// Reject roles outside the list.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

impl RoleRegistry for StaticRoleRegistry {
    fn known_roles(&self) -> BTreeSet<String> {
        self.roles.clone()
    }

    fn verify(&self, role: &str) -> Result<(), String> {
        if self.strict && !self.roles.contains(role) {
            return Err(format!("{} is not a registered role", role));
        }
        Ok(())
    }
}
