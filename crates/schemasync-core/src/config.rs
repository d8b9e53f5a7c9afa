//! Synchronization configuration.

use std::time::Duration;

/// Default advisory lock key serializing schema runs across processes.
pub const DEFAULT_LOCK_KEY: i64 = 0x5c4e_6d5f_7379_6e63;

/// Default time to wait for the lock before failing.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before the second lock attempt.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Shortest delay between lock attempts, whatever the configured backoff.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Default upper bound on the delay between lock attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Default expression yielding the session's user id.
pub const DEFAULT_USER_ID_EXPR: &str = "auth.uid()";

/// Default function answering "does the session hold this role".
pub const DEFAULT_HAS_ROLE_FN: &str = "auth.has_role";

/// SQL hooks into the authentication subsystem.
///
/// Policies call these; they are defined outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPredicates {
    /// Expression evaluating to the current user id, NULL when anonymous.
    pub user_id: String,
    /// Function taking a role name and returning a boolean.
    pub has_role: String,
}

impl Default for SessionPredicates {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID_EXPR.to_string(),
            has_role: DEFAULT_HAS_ROLE_FN.to_string(),
        }
    }
}

/// Policy compilation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Session predicates used in policy expressions.
    pub predicates: SessionPredicates,
    /// Database role of anonymous sessions, excluded by `authenticated` field rules.
    pub anonymous_role: Option<String>,
    /// Apply policies to the table owner as well.
    pub force_row_security: bool,
}

impl PolicyConfig {
    /// Set the session predicates.
    pub fn with_predicates(mut self, user_id: impl Into<String>, has_role: impl Into<String>) -> Self {
        self.predicates = SessionPredicates {
            user_id: user_id.into(),
            has_role: has_role.into(),
        };
        self
    }

    /// Set the anonymous role.
    pub fn with_anonymous_role(mut self, role: impl Into<String>) -> Self {
        self.anonymous_role = Some(role.into());
        self
    }

    /// Force row security for the table owner.
    pub fn with_forced_row_security(mut self) -> Self {
        self.force_row_security = true;
        self
    }
}

/// Configuration of a synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Advisory lock key.
    pub lock_key: i64,
    /// How long to wait for the lock.
    pub lock_timeout: Duration,
    /// Delay before the second lock attempt; doubles after each miss.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between lock attempts.
    pub max_backoff: Duration,
    /// Policy compilation settings.
    pub policy: PolicyConfig,
}

impl SyncConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            lock_key: DEFAULT_LOCK_KEY,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            policy: PolicyConfig::default(),
        }
    }

    /// Set the advisory lock key.
    pub fn with_lock_key(mut self, key: i64) -> Self {
        self.lock_key = key;
        self
    }

    /// Set the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the lock retry backoff bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Set the policy settings.
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
