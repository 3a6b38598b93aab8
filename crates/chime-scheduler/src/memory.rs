//! In-process backend. Useful for tests and single-process deployments.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::warn;

use crate::error::Result;
use crate::store::{DistributedLock, LockToken, SharedStore};

#[derive(Debug)]
struct Held {
    token: String,
    acquired: Instant,
}

/// `SharedStore` and `DistributedLock` backed by in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
    locks: DashMap<String, Held>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently locked (stale or not).
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for MemoryStore {
    async fn try_acquire(&self, key: &str, stale_after: Duration) -> Result<Option<LockToken>> {
        let token = LockToken::new(key);
        let held = Held {
            token: token.token.clone(),
            acquired: Instant::now(),
        };
        match self.locks.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(held);
                Ok(Some(token))
            }
            Entry::Occupied(mut slot) if slot.get().acquired.elapsed() >= stale_after => {
                warn!(%key, "reclaiming stale lock");
                slot.insert(held);
                Ok(Some(token))
            }
            Entry::Occupied(_) => Ok(None),
        }
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        self.locks
            .remove_if(&token.key, |_, held| held.token == token.token);
        Ok(())
    }
}
