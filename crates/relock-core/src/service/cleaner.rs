//! Periodic cleanup sweep
//!
//! Locks are presumed abandoned once older than the configured max age,
//! which is a hard ceiling on how long any critical section is allowed to
//! run. The sweep waits out an initial warm-up delay, then runs on a fixed
//! cadence; a failed sweep is logged and the next one proceeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use relock_common::LockError;

use crate::model::{LockDescriptor, LocksConfig};
use crate::registry::LockRegistry;

pub struct LockCleanerService {
    registry: Arc<LockRegistry>,
    config: LocksConfig,
}

impl LockCleanerService {
    pub fn new(registry: Arc<LockRegistry>, config: LocksConfig) -> Self {
        Self { registry, config }
    }

    /// Spawn the background sweep. The returned handle aborts it.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.registry.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            if !config.enabled {
                debug!("lock cleanup disabled, sweep not started");
                return;
            }
            info!(
                initial_delay_secs = config.initial_delay.as_secs(),
                interval_secs = config.cleanup_interval.as_secs(),
                max_age_secs = config.max_age.as_secs(),
                "lock cleanup sweep scheduled"
            );
            tokio::time::sleep(config.initial_delay).await;
            let mut ticker = tokio::time::interval(config.cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match registry.clean_all_aged(config.max_age).await {
                    Ok(retired) => debug!(retired, "cleanup sweep finished"),
                    Err(err) => warn!(error = %err, "cleanup sweep failed"),
                }
            }
        })
    }

    /// Targeted cleanup of the families matching the descriptor.
    pub async fn clean(&self, descriptor: &LockDescriptor) -> Result<u64, LockError> {
        self.registry.clean(descriptor).await
    }

    /// Drop every released locker across all families.
    pub async fn clean_all(&self) -> Result<u64, LockError> {
        self.registry.clean_all().await
    }

    pub fn max_age(&self) -> Duration {
        self.config.max_age
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{LockMode, LockType};

    use super::*;

    fn sweep_config() -> LocksConfig {
        LocksConfig {
            enabled: true,
            debug_enabled: false,
            max_age: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(1),
            initial_delay: Duration::ZERO,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_stale_lockers() {
        let registry = Arc::new(LockRegistry::new(&sweep_config()));
        // Never acquired, so its last acquisition is infinitely old
        let _idle = registry.local_blocking_locker("idle");

        let cleaner = LockCleanerService::new(registry.clone(), sweep_config());
        let handle = cleaner.start();

        // First sweep fires right after the zero initial delay
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        // The sweep already dropped the stale locker
        assert!(registry.list_all().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cleaner_never_sweeps() {
        let registry = Arc::new(LockRegistry::new(&sweep_config()));
        let _idle = registry.local_blocking_locker("idle");

        let config = LocksConfig {
            enabled: false,
            ..sweep_config()
        };
        let cleaner = LockCleanerService::new(registry.clone(), config);
        let handle = cleaner.start();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(handle.is_finished());

        // The stale locker survived
        assert!(
            registry
                .list_all()
                .await
                .unwrap()
                .iter()
                .any(|info| info.name == "idle")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_waits_for_initial_delay() {
        let registry = Arc::new(LockRegistry::new(&sweep_config()));
        let _idle = registry.local_blocking_locker("idle");

        let config = LocksConfig {
            initial_delay: Duration::from_secs(600),
            ..sweep_config()
        };
        let cleaner = LockCleanerService::new(registry.clone(), config);
        let handle = cleaner.start();

        // Well before the warm-up delay elapses, nothing has been swept
        tokio::time::sleep(Duration::from_secs(60)).await;
        let family = registry.list_all().await.unwrap();
        assert_eq!(family.len(), 1);

        handle.abort();
        assert!(
            registry
                .list_all()
                .await
                .unwrap()
                .iter()
                .any(|info| info.name == "idle")
        );
    }

    #[tokio::test]
    async fn test_clean_all_delegates_to_registry() {
        let registry = Arc::new(LockRegistry::new(&sweep_config()));
        let _released = registry.local_cooperative_locker("released");

        let cleaner = LockCleanerService::new(registry.clone(), sweep_config());
        let descriptor = LockDescriptor::for_clean(LockType::Local, LockMode::Cooperative);
        // One family matches the descriptor, the released locker is dropped
        assert_eq!(cleaner.clean(&descriptor).await.unwrap(), 1);
        assert!(registry.list_all().await.unwrap().is_empty());

        // Every family is processed by the registry-wide pass
        assert_eq!(cleaner.clean_all().await.unwrap(), 3);
        assert_eq!(cleaner.max_age(), Duration::from_secs(60));
    }
}
