//! Redis backend: plain GET/SET/DEL for state, `SET NX PX` for the run lock.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};
use tracing::{debug, info};

use crate::error::Result;
use crate::store::{DistributedLock, LockToken, SharedStore};

/// Delete the lock only if we still own it; a reclaimed lock belongs to
/// its new holder.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("connected to redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for RedisStore {
    async fn try_acquire(&self, key: &str, stale_after: Duration) -> Result<Option<LockToken>> {
        let mut conn = self.conn.clone();
        let token = LockToken::new(key);
        // PX must be at least 1ms.
        let ttl_ms = u64::try_from(stale_after.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, token: LockToken) -> Result<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(&token.key)
            .arg(&token.token)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            debug!(key = %token.key, "lock already reclaimed by another holder");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::lock_key;

    async fn connect() -> RedisStore {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| chime_core::config::DEFAULT_REDIS_URL.to_string());
        RedisStore::connect(&url).await.unwrap()
    }

    fn scratch_key() -> String {
        lock_key(&format!("test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    #[ignore = "needs a running redis at $REDIS_URL"]
    async fn lock_is_exclusive_until_released() {
        let store = connect().await;
        let key = scratch_key();
        let hour = Duration::from_secs(3600);

        let held = store.try_acquire(&key, hour).await.unwrap().unwrap();
        assert!(store.try_acquire(&key, hour).await.unwrap().is_none());

        // A token that does not own the key leaves it alone.
        store.release(LockToken::new(&key)).await.unwrap();
        assert!(store.try_acquire(&key, hour).await.unwrap().is_none());

        store.release(held).await.unwrap();
        let again = store.try_acquire(&key, hour).await.unwrap().unwrap();
        store.release(again).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a running redis at $REDIS_URL"]
    async fn expired_lock_is_reclaimed_and_old_release_is_ignored() {
        let store = connect().await;
        let key = scratch_key();

        let stale = store
            .try_acquire(&key, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let fresh = store
            .try_acquire(&key, Duration::from_secs(3600))
            .await
            .unwrap()
            .unwrap();
        store.release(stale).await.unwrap();
        assert!(store
            .try_acquire(&key, Duration::from_secs(3600))
            .await
            .unwrap()
            .is_none());
        store.release(fresh).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a running redis at $REDIS_URL"]
    async fn values_round_through_get_set_delete() {
        let store = connect().await;
        let key = scratch_key();
        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, "1672531200").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("1672531200"));
        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
