//! Store-backed lock engines
//!
//! These lockers never hold lock state in memory: existence of the store row
//! is the lock. Every constructed instance carries a fresh owner token, so
//! one instance must be reused across the try/check/release sequence of a
//! single critical section; the engine cannot detect violations of that
//! contract.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use relock_common::{CancelToken, LockError};
use relock_persistence::LockStore;

use crate::locker::{BlockingLocker, CooperativeLocker};
use crate::model::LockType;

/// Fixed backoff between insert attempts while polling for the lock.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Store-backed lock for the thread-blocking discipline.
///
/// Store calls run on the supplied runtime handle via `block_on`, so this
/// locker must be driven from a thread outside the async runtime (a plain
/// thread or `spawn_blocking`).
pub struct DistributedLocker {
    name: String,
    owner: String,
    store: Arc<dyn LockStore>,
    handle: tokio::runtime::Handle,
}

impl DistributedLocker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn LockStore>,
        handle: tokio::runtime::Handle,
    ) -> Self {
        Self {
            name: name.into(),
            owner: Uuid::new_v4().to_string(),
            store,
            handle,
        }
    }

    /// This instance's owner token.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl BlockingLocker for DistributedLocker {
    fn lock_name(&self) -> &str {
        &self.name
    }

    fn lock_type(&self) -> LockType {
        LockType::Distributed
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        self.handle
            .block_on(self.store.insert_lock(&self.name, &self.owner))
            .map_err(|err| LockError::store(&self.name, err))
    }

    fn obtain_lock_cancellable(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, LockError> {
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled(self.name.clone()));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_lock()? {
                return Ok(true);
            }
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled(self.name.clone()));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %self.name, "poll deadline reached");
                return Ok(false);
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    /// Deletes the row filtered by (name, owner) and reports success even
    /// when no row was removed, so releasing an already-lost lock (for
    /// example one reclaimed by expiry) is side-effect free.
    fn release_lock(&self) -> Result<bool, LockError> {
        self.handle
            .block_on(self.store.delete_lock_owned(&self.name, &self.owner))
            .map_err(|err| LockError::store(&self.name, err))?;
        Ok(true)
    }

    fn is_locked(&self) -> Result<bool, LockError> {
        self.handle
            .block_on(self.store.is_locked(&self.name))
            .map_err(|err| LockError::store(&self.name, err))
    }

    fn is_locked_by_caller(&self) -> Result<bool, LockError> {
        self.handle
            .block_on(self.store.is_locked_by(&self.name, &self.owner))
            .map_err(|err| LockError::store(&self.name, err))
    }

    fn elapsed_time(&self) -> Result<i64, LockError> {
        let locked_at = self
            .handle
            .block_on(self.store.locked_at(&self.name))
            .map_err(|err| LockError::store(&self.name, err))?;
        Ok(locked_at.unwrap_or(0))
    }
}

/// Store-backed lock for the cooperative discipline.
pub struct DistributedCooperativeLocker {
    name: String,
    owner: String,
    store: Arc<dyn LockStore>,
}

impl DistributedCooperativeLocker {
    pub fn new(name: impl Into<String>, store: Arc<dyn LockStore>) -> Self {
        Self {
            name: name.into(),
            owner: Uuid::new_v4().to_string(),
            store,
        }
    }

    /// This instance's owner token.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[async_trait]
impl CooperativeLocker for DistributedCooperativeLocker {
    fn lock_name(&self) -> &str {
        &self.name
    }

    fn lock_type(&self) -> LockType {
        LockType::Distributed
    }

    async fn try_lock(&self) -> Result<bool, LockError> {
        self.store
            .insert_lock(&self.name, &self.owner)
            .await
            .map_err(|err| LockError::store(&self.name, err))
    }

    async fn release_lock(&self) -> Result<bool, LockError> {
        self.store
            .delete_lock_owned(&self.name, &self.owner)
            .await
            .map_err(|err| LockError::store(&self.name, err))?;
        Ok(true)
    }

    async fn is_locked(&self) -> Result<bool, LockError> {
        self.store
            .is_locked(&self.name)
            .await
            .map_err(|err| LockError::store(&self.name, err))
    }

    async fn is_locked_by_caller(&self) -> Result<bool, LockError> {
        self.store
            .is_locked_by(&self.name, &self.owner)
            .await
            .map_err(|err| LockError::store(&self.name, err))
    }

    async fn elapsed_time(&self) -> Result<i64, LockError> {
        let locked_at = self
            .store
            .locked_at(&self.name)
            .await
            .map_err(|err| LockError::store(&self.name, err))?;
        Ok(locked_at.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use relock_persistence::MemoryLockStore;

    use super::*;

    fn store() -> Arc<dyn LockStore> {
        Arc::new(MemoryLockStore::new())
    }

    #[tokio::test]
    async fn test_cooperative_owner_tokens_are_independent() {
        let store = store();
        let first = DistributedCooperativeLocker::new("beta", store.clone());
        let second = DistributedCooperativeLocker::new("beta", store.clone());
        assert_ne!(first.owner(), second.owner());

        assert!(first.try_lock().await.unwrap());
        // Second instance sees the lock held, but not by itself
        assert!(second.is_locked().await.unwrap());
        assert!(!second.is_locked_by_caller().await.unwrap());
        assert!(first.is_locked_by_caller().await.unwrap());
    }

    #[tokio::test]
    async fn test_cooperative_release_ignores_foreign_row() {
        let store = store();
        let holder = DistributedCooperativeLocker::new("beta", store.clone());
        let stranger = DistributedCooperativeLocker::new("beta", store.clone());

        assert!(holder.try_lock().await.unwrap());
        // Release by a non-owner reports success and removes nothing
        assert!(stranger.release_lock().await.unwrap());
        assert!(holder.is_locked().await.unwrap());

        assert!(holder.release_lock().await.unwrap());
        assert!(holder.is_released().await.unwrap());
    }

    #[tokio::test]
    async fn test_cooperative_elapsed_time() {
        let store = store();
        let locker = DistributedCooperativeLocker::new("beta", store);
        assert_eq!(locker.elapsed_time().await.unwrap(), 0);
        assert!(locker.try_lock().await.unwrap());
        assert!(locker.elapsed_time().await.unwrap() > 0);
    }

    #[test]
    fn test_blocking_locker_polls_until_release() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
        let handle = runtime.handle().clone();

        let holder = DistributedLocker::new("beta", store.clone(), handle.clone());
        assert!(holder.try_lock().unwrap());

        let waiter = DistributedLocker::new("beta", store.clone(), handle);
        assert!(!waiter.try_lock().unwrap());

        let release_after = Duration::from_millis(150);
        let holder_thread = thread::spawn(move || {
            thread::sleep(release_after);
            holder.release_lock().unwrap();
        });

        let obtained = waiter.obtain_lock(Duration::from_secs(2)).unwrap();
        assert!(obtained);
        holder_thread.join().unwrap();

        assert!(waiter.is_locked_by_caller().unwrap());
        waiter.release_lock().unwrap();
        assert!(!waiter.is_locked().unwrap());
    }

    #[test]
    fn test_blocking_obtain_times_out() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
        let handle = runtime.handle().clone();

        let holder = DistributedLocker::new("beta", store.clone(), handle.clone());
        assert!(holder.try_lock().unwrap());

        let waiter = DistributedLocker::new("beta", store, handle);
        let started = Instant::now();
        assert!(!waiter.obtain_lock(Duration::from_millis(250)).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
