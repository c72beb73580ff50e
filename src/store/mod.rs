//! Key-value store collaborator.
//!
//! The backing store is the single source of truth for account state across
//! process instances; this crate keeps no in-process cache of health or
//! quota fields. Operations are assumed atomic at the single-key level only.

mod accounts;
#[cfg(feature = "store-redis")]
mod redis;

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

pub use accounts::AccountStore;
#[cfg(feature = "store-redis")]
pub use redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError>;
    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError>;
    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError>;

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-process store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self
            .values
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        values.remove(key);
        Ok(())
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        sets.entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        if let Some(members) = sets.get_mut(set) {
            members.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let sets = self
            .sets
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        Ok(sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let values = self
            .values
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_string()))?;
        let mut out: Vec<String> = values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_values_and_sets() {
        let store = MemoryStore::new();
        store.set("a:1", "one").await.unwrap();
        store.set("a:2", "two").await.unwrap();
        store.set("b:1", "other").await.unwrap();

        assert_eq!(store.get("a:1").await.unwrap().as_deref(), Some("one"));
        assert_eq!(store.keys("a:").await.unwrap(), vec!["a:1", "a:2"]);

        store.del("a:1").await.unwrap();
        assert!(store.get("a:1").await.unwrap().is_none());

        store.sadd("s", "m1").await.unwrap();
        store.sadd("s", "m2").await.unwrap();
        store.srem("s", "m1").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["m2"]);
    }
}
