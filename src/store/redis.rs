//! Redis-backed [`KvStore`] for multi-instance deployments.

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{KvStore, StoreError};

#[derive(Clone, Debug)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())
                .map_err(|err| StoreError::Backend(err.to_string()))?,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set(key, value)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(key)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .sadd(set, member)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .srem(set, member)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        conn.smembers(set)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let mut out: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_nonempty(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    #[tokio::test]
    async fn redis_store_round_trips_when_available() {
        let Some(url) = env_nonempty("RELAYMUX_REDIS_URL").or_else(|| env_nonempty("REDIS_URL"))
        else {
            return;
        };

        let prefix = format!(
            "relaymux_test:{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0)
        );
        let store = RedisStore::new(url).expect("store");

        let key = format!("{prefix}:k");
        store.set(&key, "v").await.expect("set");
        assert_eq!(store.get(&key).await.expect("get").as_deref(), Some("v"));
        store.del(&key).await.expect("del");
        assert!(store.get(&key).await.expect("get").is_none());
    }
}
