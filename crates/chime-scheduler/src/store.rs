//! Backend seams: the shared key/value store and the distributed run lock.
//!
//! Every process of a fleet must point at the same backend. Keys are
//! namespaced by [`KEY_PREFIX`] and the job identity (`category.name`).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub const KEY_PREFIX: &str = "chime";

pub fn last_ran_key(job_id: &str) -> String {
    format!("{KEY_PREFIX}:last_ran:{job_id}")
}

pub fn disabled_key(job_id: &str) -> String {
    format!("{KEY_PREFIX}:disabled:{job_id}")
}

pub fn lock_key(job_id: &str) -> String {
    format!("{KEY_PREFIX}:lock:{job_id}")
}

pub fn heartbeat_key(instance: &str) -> String {
    format!("{KEY_PREFIX}:heartbeat:{instance}")
}

/// Durable string key/value storage shared by all scheduler processes.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Proof of holding a lock; handed back to [`DistributedLock::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub token: String,
}

impl LockToken {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Cross-process mutual exclusion keyed by job identity.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try once to take `key`. Returns `None` if another holder has it.
    ///
    /// A lock held for longer than `stale_after` is treated as abandoned and
    /// may be taken over.
    async fn try_acquire(&self, key: &str, stale_after: Duration) -> Result<Option<LockToken>>;

    /// Release a lock. Releasing a lock that was reclaimed by someone else is a no-op.
    async fn release(&self, token: LockToken) -> Result<()>;
}
