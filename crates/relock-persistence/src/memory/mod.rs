//! In-memory lock store
//!
//! A DashMap-backed `LockStore` with the same insert-if-absent semantics the
//! SQL backend gets from its primary key. Useful for tests and for running
//! the distributed lock families without an external database.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use relock_common::now_epoch_seconds;

use crate::model::LockRow;
use crate::traits::LockStore;

#[derive(Clone, Debug)]
struct Held {
    owner: String,
    locked_at: i64,
}

/// Lock store holding rows in process memory
#[derive(Default)]
pub struct MemoryLockStore {
    rows: DashMap<String, Held>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn ensure_schema(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_lock(&self, name: &str, owner: &str) -> anyhow::Result<bool> {
        match self.rows.entry(name.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Held {
                    owner: owner.to_string(),
                    locked_at: now_epoch_seconds(),
                });
                Ok(true)
            }
        }
    }

    async fn is_locked(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.rows.contains_key(name))
    }

    async fn is_locked_by(&self, name: &str, owner: &str) -> anyhow::Result<bool> {
        Ok(self
            .rows
            .get(name)
            .is_some_and(|held| held.owner == owner))
    }

    async fn delete_lock_owned(&self, name: &str, owner: &str) -> anyhow::Result<()> {
        self.rows
            .remove_if(name, |_, held| held.owner == owner);
        Ok(())
    }

    async fn delete_lock(&self, name: &str) -> anyhow::Result<()> {
        self.rows.remove(name);
        Ok(())
    }

    async fn delete_expired(&self, max_age: Duration) -> anyhow::Result<u64> {
        let cutoff = now_epoch_seconds() - max_age.as_secs() as i64;
        let before = self.rows.len();
        self.rows.retain(|_, held| held.locked_at >= cutoff);
        Ok((before - self.rows.len()) as u64)
    }

    async fn count_all(&self) -> anyhow::Result<u64> {
        Ok(self.rows.len() as u64)
    }

    async fn delete_all(&self) -> anyhow::Result<u64> {
        let removed = self.rows.len() as u64;
        self.rows.clear();
        Ok(removed)
    }

    async fn locked_at(&self, name: &str) -> anyhow::Result<Option<i64>> {
        Ok(self.rows.get(name).map(|held| held.locked_at))
    }

    async fn find_all(&self) -> anyhow::Result<Vec<LockRow>> {
        Ok(self
            .rows
            .iter()
            .map(|entry| LockRow {
                name: entry.key().clone(),
                owner: entry.value().owner.clone(),
                locked_at: entry.value().locked_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_is_first_wins() {
        let store = MemoryLockStore::new();

        assert!(store.insert_lock("beta", "o1").await.unwrap());
        // Second insert on the same name must fail exactly once
        assert!(!store.insert_lock("beta", "o2").await.unwrap());
    }

    #[tokio::test]
    async fn test_owner_filtered_operations() {
        let store = MemoryLockStore::new();
        store.insert_lock("beta", "o1").await.unwrap();

        assert!(store.is_locked_by("beta", "o1").await.unwrap());
        assert!(!store.is_locked_by("beta", "o2").await.unwrap());

        // Wrong owner must not remove the row
        store.delete_lock_owned("beta", "o2").await.unwrap();
        assert!(store.is_locked("beta").await.unwrap());

        store.delete_lock_owned("beta", "o1").await.unwrap();
        assert!(!store.is_locked("beta").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = MemoryLockStore::new();
        store.insert_lock("old", "o1").await.unwrap();
        store
            .rows
            .get_mut("old")
            .unwrap()
            .locked_at = now_epoch_seconds() - 100;
        store.insert_lock("fresh", "o2").await.unwrap();

        let removed = store.delete_expired(Duration::from_secs(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.is_locked("old").await.unwrap());
        assert!(store.is_locked("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_and_delete_all() {
        let store = MemoryLockStore::new();
        store.insert_lock("a", "o1").await.unwrap();
        store.insert_lock("b", "o2").await.unwrap();

        assert_eq!(store.count_all().await.unwrap(), 2);
        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_all_and_locked_at() {
        let store = MemoryLockStore::new();
        store.insert_lock("a", "o1").await.unwrap();

        let rows = store.find_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "a");
        assert_eq!(rows[0].owner, "o1");

        assert!(store.locked_at("a").await.unwrap().is_some());
        assert!(store.locked_at("missing").await.unwrap().is_none());
    }
}
