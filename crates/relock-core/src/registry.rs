//! Lock registry
//!
//! One family per (type, mode) combination, each keyed by a factory name so
//! introspection and cleanup can address families uniformly. Local families
//! memoize their lockers: every request for the same name yields the same
//! instance, which is what makes an in-process lock a lock at all.
//! Distributed families hand out a fresh instance per request, each with its
//! own owner token; the shared state is the store row, not the instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use relock_common::LockError;
use relock_persistence::LockStore;

use crate::locker::{
    BlockingLocker, CooperativeLocker, DistributedCooperativeLocker, DistributedLocker,
    LocalCooperativeLocker, LocalLocker, SignalLocker,
};
use crate::model::{LockContext, LockDescriptor, LockMode, LockType, LockerInfo, LocksConfig};

pub const STANDARD_LOCAL_BLOCKING: &str = "STANDARD_LOCAL_BLOCKING";
pub const STANDARD_LOCAL_SIGNAL: &str = "STANDARD_LOCAL_SIGNAL";
pub const STANDARD_LOCAL_COOPERATIVE: &str = "STANDARD_LOCAL_COOPERATIVE";
pub const STANDARD_DISTRIBUTED_BLOCKING: &str = "STANDARD_DISTRIBUTED_BLOCKING";
pub const STANDARD_DISTRIBUTED_COOPERATIVE: &str = "STANDARD_DISTRIBUTED_COOPERATIVE";

/// Uniform maintenance surface over one family of lockers.
#[async_trait]
pub trait LockFamily: Send + Sync {
    fn context(&self) -> &LockContext;

    fn lock_type(&self) -> LockType;

    fn lock_mode(&self) -> LockMode;

    async fn exists(&self, name: &str) -> Result<bool, LockError>;

    /// Forget one locker by name.
    async fn remove(&self, name: &str) -> Result<bool, LockError>;

    /// Drop lockers whose last acquisition is older than `max_age`. A locker
    /// never acquired counts as infinitely old.
    async fn clear_expired(&self, max_age: Duration) -> Result<u64, LockError>;

    /// Drop lockers that are not currently held.
    async fn clear_released(&self) -> Result<u64, LockError>;

    /// Drop every locker regardless of state.
    async fn clear(&self) -> Result<u64, LockError>;

    async fn count(&self) -> Result<u64, LockError>;

    async fn lockers(&self) -> Result<Vec<LockerInfo>, LockError>;
}

/// Snapshot hooks a memoized local family needs from its locker type.
pub trait ManagedLocker: Send + Sync + 'static {
    fn create(name: &str) -> Self;

    fn snapshot_locked(&self) -> bool;

    fn snapshot_locked_at(&self) -> i64;
}

impl ManagedLocker for LocalLocker {
    fn create(name: &str) -> Self {
        LocalLocker::new(name)
    }

    fn snapshot_locked(&self) -> bool {
        self.is_locked_sync()
    }

    fn snapshot_locked_at(&self) -> i64 {
        self.locked_at_sync()
    }
}

impl ManagedLocker for SignalLocker {
    fn create(name: &str) -> Self {
        SignalLocker::new(name)
    }

    fn snapshot_locked(&self) -> bool {
        self.is_locked_sync()
    }

    fn snapshot_locked_at(&self) -> i64 {
        self.locked_at_sync()
    }
}

impl ManagedLocker for LocalCooperativeLocker {
    fn create(name: &str) -> Self {
        LocalCooperativeLocker::new(name)
    }

    fn snapshot_locked(&self) -> bool {
        self.is_locked_sync()
    }

    fn snapshot_locked_at(&self) -> i64 {
        self.locked_at_sync()
    }
}

/// Memoizing family of in-process lockers.
pub struct LocalFamily<L> {
    context: LockContext,
    mode: LockMode,
    lockers: DashMap<String, Arc<L>>,
}

impl<L: ManagedLocker> LocalFamily<L> {
    fn new(factory_name: &str, mode: LockMode, debug_enabled: bool) -> Self {
        Self {
            context: LockContext::new(factory_name, true, debug_enabled),
            mode,
            lockers: DashMap::new(),
        }
    }

    /// Same name, same instance.
    pub fn get(&self, name: &str) -> Arc<L> {
        self.lockers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(L::create(name)))
            .value()
            .clone()
    }
}

#[async_trait]
impl<L: ManagedLocker> LockFamily for LocalFamily<L> {
    fn context(&self) -> &LockContext {
        &self.context
    }

    fn lock_type(&self) -> LockType {
        LockType::Local
    }

    fn lock_mode(&self) -> LockMode {
        self.mode
    }

    async fn exists(&self, name: &str) -> Result<bool, LockError> {
        Ok(self.lockers.contains_key(name))
    }

    async fn remove(&self, name: &str) -> Result<bool, LockError> {
        Ok(self.lockers.remove(name).is_some())
    }

    async fn clear_expired(&self, max_age: Duration) -> Result<u64, LockError> {
        let cutoff = relock_common::now_epoch_seconds() - max_age.as_secs() as i64;
        let before = self.lockers.len();
        self.lockers
            .retain(|_, locker| locker.snapshot_locked_at() >= cutoff);
        let removed = (before - self.lockers.len()) as u64;
        if removed > 0 {
            debug!(family = %self.context.factory_name, removed, "expired lockers dropped");
        }
        Ok(removed)
    }

    async fn clear_released(&self) -> Result<u64, LockError> {
        let before = self.lockers.len();
        self.lockers.retain(|_, locker| locker.snapshot_locked());
        Ok((before - self.lockers.len()) as u64)
    }

    async fn clear(&self) -> Result<u64, LockError> {
        let before = self.lockers.len() as u64;
        self.lockers.clear();
        Ok(before)
    }

    async fn count(&self) -> Result<u64, LockError> {
        Ok(self.lockers.len() as u64)
    }

    async fn lockers(&self) -> Result<Vec<LockerInfo>, LockError> {
        Ok(self
            .lockers
            .iter()
            .map(|entry| LockerInfo {
                name: entry.key().clone(),
                lock_type: LockType::Local,
                lock_mode: self.mode,
                locked_at: entry.value().snapshot_locked_at(),
                locked: entry.value().snapshot_locked(),
            })
            .collect())
    }
}

/// Store-delegating family. Holds no locker instances at all: every
/// maintenance operation reads or mutates the backing rows directly.
pub struct DistributedFamily {
    context: LockContext,
    mode: LockMode,
    store: Arc<dyn LockStore>,
}

impl DistributedFamily {
    fn new(
        factory_name: &str,
        mode: LockMode,
        debug_enabled: bool,
        store: Arc<dyn LockStore>,
    ) -> Self {
        Self {
            // Not cleanable: the family carries no per-process state worth
            // reclaiming, rows are reclaimed by expiry instead
            context: LockContext::new(factory_name, false, debug_enabled),
            mode,
            store,
        }
    }

    fn store_err(&self, err: anyhow::Error) -> LockError {
        LockError::store(&self.context.factory_name, err)
    }
}

#[async_trait]
impl LockFamily for DistributedFamily {
    fn context(&self) -> &LockContext {
        &self.context
    }

    fn lock_type(&self) -> LockType {
        LockType::Distributed
    }

    fn lock_mode(&self) -> LockMode {
        self.mode
    }

    async fn exists(&self, name: &str) -> Result<bool, LockError> {
        self.store
            .is_locked(name)
            .await
            .map_err(|err| self.store_err(err))
    }

    async fn remove(&self, name: &str) -> Result<bool, LockError> {
        let existed = self
            .store
            .is_locked(name)
            .await
            .map_err(|err| self.store_err(err))?;
        self.store
            .delete_lock(name)
            .await
            .map_err(|err| self.store_err(err))?;
        Ok(existed)
    }

    async fn clear_expired(&self, max_age: Duration) -> Result<u64, LockError> {
        let removed = self
            .store
            .delete_expired(max_age)
            .await
            .map_err(|err| self.store_err(err))?;
        if removed > 0 {
            info!(family = %self.context.factory_name, removed, "expired lock rows deleted");
        }
        Ok(removed)
    }

    /// A row only exists while its lock is held, so there are no released
    /// rows to distinguish; this clears the table.
    async fn clear_released(&self) -> Result<u64, LockError> {
        self.clear().await
    }

    async fn clear(&self) -> Result<u64, LockError> {
        self.store
            .delete_all()
            .await
            .map_err(|err| self.store_err(err))
    }

    async fn count(&self) -> Result<u64, LockError> {
        self.store
            .count_all()
            .await
            .map_err(|err| self.store_err(err))
    }

    async fn lockers(&self) -> Result<Vec<LockerInfo>, LockError> {
        let rows = self
            .store
            .find_all()
            .await
            .map_err(|err| self.store_err(err))?;
        Ok(rows
            .into_iter()
            .map(|row| LockerInfo {
                name: row.name,
                lock_type: LockType::Distributed,
                lock_mode: self.mode,
                locked_at: row.locked_at,
                locked: true,
            })
            .collect())
    }
}

/// Central access point for every lock family in the process.
pub struct LockRegistry {
    families: DashMap<String, Arc<dyn LockFamily>>,
    local_blocking: Arc<LocalFamily<LocalLocker>>,
    local_signal: Arc<LocalFamily<SignalLocker>>,
    local_cooperative: Arc<LocalFamily<LocalCooperativeLocker>>,
    store: Option<Arc<dyn LockStore>>,
    handle: Option<tokio::runtime::Handle>,
}

impl LockRegistry {
    /// Registry with the three local families only.
    pub fn new(config: &LocksConfig) -> Self {
        let debug_enabled = config.debug_enabled;
        let local_blocking = Arc::new(LocalFamily::new(
            STANDARD_LOCAL_BLOCKING,
            LockMode::Blocking,
            debug_enabled,
        ));
        let local_signal = Arc::new(LocalFamily::new(
            STANDARD_LOCAL_SIGNAL,
            LockMode::Blocking,
            debug_enabled,
        ));
        let local_cooperative = Arc::new(LocalFamily::new(
            STANDARD_LOCAL_COOPERATIVE,
            LockMode::Cooperative,
            debug_enabled,
        ));

        let families: DashMap<String, Arc<dyn LockFamily>> = DashMap::new();
        families.insert(
            STANDARD_LOCAL_BLOCKING.to_string(),
            local_blocking.clone() as Arc<dyn LockFamily>,
        );
        families.insert(
            STANDARD_LOCAL_SIGNAL.to_string(),
            local_signal.clone() as Arc<dyn LockFamily>,
        );
        families.insert(
            STANDARD_LOCAL_COOPERATIVE.to_string(),
            local_cooperative.clone() as Arc<dyn LockFamily>,
        );
        info!(families = families.len(), "lock registry initialized");

        Self {
            families,
            local_blocking,
            local_signal,
            local_cooperative,
            store: None,
            handle: None,
        }
    }

    /// Registry with local and store-backed families. `handle` drives the
    /// store calls of blocking distributed lockers.
    pub fn with_store(
        config: &LocksConfig,
        store: Arc<dyn LockStore>,
        handle: tokio::runtime::Handle,
    ) -> Self {
        let mut registry = Self::new(config);
        registry.families.insert(
            STANDARD_DISTRIBUTED_BLOCKING.to_string(),
            Arc::new(DistributedFamily::new(
                STANDARD_DISTRIBUTED_BLOCKING,
                LockMode::Blocking,
                config.debug_enabled,
                store.clone(),
            )),
        );
        registry.families.insert(
            STANDARD_DISTRIBUTED_COOPERATIVE.to_string(),
            Arc::new(DistributedFamily::new(
                STANDARD_DISTRIBUTED_COOPERATIVE,
                LockMode::Cooperative,
                config.debug_enabled,
                store.clone(),
            )),
        );
        registry.store = Some(store);
        registry.handle = Some(handle);
        registry
    }

    /// Memoized thread-owned local blocking locker.
    pub fn local_blocking_locker(&self, name: &str) -> Arc<LocalLocker> {
        self.local_blocking.get(name)
    }

    /// Memoized signal-only local blocking locker.
    pub fn local_signal_locker(&self, name: &str) -> Arc<SignalLocker> {
        self.local_signal.get(name)
    }

    /// Memoized local cooperative locker.
    pub fn local_cooperative_locker(&self, name: &str) -> Arc<LocalCooperativeLocker> {
        self.local_cooperative.get(name)
    }

    /// Fresh store-backed blocking locker with its own owner token.
    pub fn distributed_blocking_locker(&self, name: &str) -> Result<DistributedLocker, LockError> {
        match (&self.store, &self.handle) {
            (Some(store), Some(handle)) => {
                Ok(DistributedLocker::new(name, store.clone(), handle.clone()))
            }
            _ => Err(LockError::UnknownFamily {
                lock_type: LockType::Distributed.to_string(),
                lock_mode: LockMode::Blocking.to_string(),
            }),
        }
    }

    /// Fresh store-backed cooperative locker with its own owner token.
    pub fn distributed_cooperative_locker(
        &self,
        name: &str,
    ) -> Result<DistributedCooperativeLocker, LockError> {
        match &self.store {
            Some(store) => Ok(DistributedCooperativeLocker::new(name, store.clone())),
            None => Err(LockError::UnknownFamily {
                lock_type: LockType::Distributed.to_string(),
                lock_mode: LockMode::Cooperative.to_string(),
            }),
        }
    }

    /// Resolve a descriptor to a blocking locker.
    pub fn blocking_locker(
        &self,
        descriptor: &LockDescriptor,
    ) -> Result<Arc<dyn BlockingLocker>, LockError> {
        if !descriptor.lock_mode.is_blocking() {
            return Err(unknown_family(descriptor));
        }
        match descriptor.lock_type {
            LockType::Local => Ok(self.local_blocking_locker(&descriptor.name)),
            LockType::Distributed => Ok(Arc::new(
                self.distributed_blocking_locker(&descriptor.name)?,
            )),
        }
    }

    /// Resolve a descriptor to a cooperative locker.
    pub fn cooperative_locker(
        &self,
        descriptor: &LockDescriptor,
    ) -> Result<Arc<dyn CooperativeLocker>, LockError> {
        if !descriptor.lock_mode.is_cooperative() {
            return Err(unknown_family(descriptor));
        }
        match descriptor.lock_type {
            LockType::Local => Ok(self.local_cooperative_locker(&descriptor.name)),
            LockType::Distributed => Ok(Arc::new(
                self.distributed_cooperative_locker(&descriptor.name)?,
            )),
        }
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn LockFamily>)> {
        self.families
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop released lockers in every family. Held lockers survive, so a
    /// name stays pinned to its instance for as long as it is locked.
    /// Returns the number of families processed.
    pub async fn clean_all(&self) -> Result<u64, LockError> {
        let mut processed = 0;
        for (_, family) in self.snapshot() {
            family.clear_released().await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Age-based sweep: drop expired lockers inside every family, then
    /// retire whole families that are cleanable and older than `max_age`.
    /// Returns the number of families retired.
    pub async fn clean_all_aged(&self, max_age: Duration) -> Result<u64, LockError> {
        let mut retired = 0;
        for (factory_name, family) in self.snapshot() {
            family.clear_expired(max_age).await?;
            if family.context().cleanable && family.context().is_expired(max_age) {
                family.clear().await?;
                if self.families.remove(&factory_name).is_some() {
                    info!(family = %factory_name, "aged family retired");
                    retired += 1;
                }
            }
        }
        Ok(retired)
    }

    /// Targeted cleanup of the cleanable families matching the descriptor's
    /// (type, mode). Only released lockers are dropped: forgetting a held
    /// locker would let the next request for the name mint a fresh instance
    /// and acquire it while the holder is still inside its critical section.
    /// Returns the number of families processed.
    pub async fn clean(&self, descriptor: &LockDescriptor) -> Result<u64, LockError> {
        let mut processed = 0;
        for (_, family) in self.snapshot() {
            if family.lock_type() == descriptor.lock_type
                && family.lock_mode() == descriptor.lock_mode
                && family.context().cleanable
            {
                family.clear_released().await?;
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Number of registered families.
    pub fn existing_count(&self) -> usize {
        self.families.len()
    }

    /// Snapshot of every locker across every family.
    pub async fn list_all(&self) -> Result<Vec<LockerInfo>, LockError> {
        let mut all = Vec::new();
        for (_, family) in self.snapshot() {
            all.extend(family.lockers().await?);
        }
        Ok(all)
    }
}

fn unknown_family(descriptor: &LockDescriptor) -> LockError {
    LockError::UnknownFamily {
        lock_type: descriptor.lock_type.to_string(),
        lock_mode: descriptor.lock_mode.to_string(),
    }
}
