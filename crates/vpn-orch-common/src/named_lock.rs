//! Per-key mutual exclusion with bounded wait.
//!
//! A [`NamedKeyLock`] hands out exclusive guards keyed by an arbitrary
//! string (typically a VPN id). The table of per-key mutexes is guarded by
//! a single short-lived map lock; waiting happens on the per-key mutex, so
//! distinct keys never contend.
//!
//! Entries are created on first use and pruned when the last guard or
//! waiter for a key goes away.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Returned when a key could not be locked within the bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {waited:?} waiting for lock on '{key}'")]
pub struct LockTimeout {
    pub key: String,
    pub waited: Duration,
}

/// Lock table keyed by identifier string.
#[derive(Debug, Clone)]
pub struct NamedKeyLock {
    table: LockTable,
    default_timeout: Duration,
}

impl Default for NamedKeyLock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl NamedKeyLock {
    /// Default bounded wait.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(default_timeout: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Acquires `key`, waiting at most `timeout`.
    ///
    /// The returned guard releases the key when dropped, on every exit
    /// path. Acquiring a key already held by the same task deadlocks until
    /// the timeout fires; recursive acquisition is not supported.
    pub async fn try_acquire(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<NamedLockGuard, LockTimeout> {
        let slot = {
            let mut table = self.table.lock();
            Arc::clone(
                table
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => {
                debug!(key, "acquired named lock");
                Ok(NamedLockGuard {
                    key: key.to_string(),
                    table: Arc::clone(&self.table),
                    guard: Some(guard),
                })
            }
            Err(_) => {
                prune(&self.table, key);
                Err(LockTimeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    /// Acquires `key` with the default timeout.
    pub async fn acquire(&self, key: &str) -> Result<NamedLockGuard, LockTimeout> {
        self.try_acquire(key, self.default_timeout).await
    }

    /// Returns true if `key` is currently held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.table
            .lock()
            .get(key)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys with a live guard or waiter.
    pub fn active_keys(&self) -> usize {
        self.table.lock().len()
    }
}

/// Removes the entry for `key` if nobody else references it.
fn prune(table: &LockTable, key: &str) {
    let mut table = table.lock();
    if table
        .get(key)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        table.remove(key);
    }
}

/// Scoped ownership of one key. Dropping it releases the key.
#[derive(Debug)]
pub struct NamedLockGuard {
    key: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NamedLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        // Release the per-key mutex before checking whether the slot is idle.
        drop(self.guard.take());
        prune(&self.table, &self.key);
        debug!(key = %self.key, "released named lock");
    }
}
