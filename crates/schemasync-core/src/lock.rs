//! Cross-process migration lock.

use crate::config::{SyncConfig, MIN_BACKOFF};
use crate::error::{Error, Result};
use crate::store::SchemaStore;
use std::time::{Duration, Instant};
use tracing::debug;

/// A held migration lock. Release it with [`LockGuard::release`].
#[must_use = "the lock stays held until released"]
pub struct LockGuard<'a> {
    store: &'a dyn SchemaStore,
    key: i64,
    waited: Duration,
}

impl LockGuard<'_> {
    /// Lock key.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Time spent waiting for the lock.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Release the lock.
    pub async fn release(self) -> Result<()> {
        self.store.unlock(self.key).await?;
        debug!(key = self.key, "Released migration lock");
        Ok(())
    }
}

/// Take the migration lock, retrying with exponential backoff until
/// `config.lock_timeout` elapses.
pub async fn acquire<'a>(store: &'a dyn SchemaStore, config: &SyncConfig) -> Result<LockGuard<'a>> {
    let key = config.lock_key;
    let started = Instant::now();
    let max_delay = config.max_backoff.max(MIN_BACKOFF);
    let mut delay = config.initial_backoff.clamp(MIN_BACKOFF, max_delay);
    let mut attempt: u32 = 1;

    loop {
        if store.try_lock(key).await? {
            let waited = started.elapsed();
            debug!(key, attempt, ?waited, "Acquired migration lock");
            return Ok(LockGuard { store, key, waited });
        }

        let waited = started.elapsed();
        if waited >= config.lock_timeout {
            return Err(Error::LockTimeout { key, waited });
        }
        debug!(key, attempt, ?delay, "Migration lock busy, backing off");
        tokio::time::sleep(delay.min(config.lock_timeout - waited)).await;
        delay = delay.saturating_mul(2).min(max_delay);
        attempt += 1;
    }
}
