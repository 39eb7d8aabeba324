//! Descriptor dispatch
//!
//! Callers describe which lock they want with a `LockDescriptor`; the
//! executor resolves the family, applies the descriptor's wait policy and
//! wraps the step in the matching composition engine. A descriptor naming a
//! family the registry does not have fails eagerly, before any acquisition
//! attempt.

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use relock_common::LockError;

use crate::handler::auto::ReleaseGuard;
use crate::handler::{AutoHandler, CooperativeLockSupport};
use crate::model::LockDescriptor;
use crate::registry::LockRegistry;

pub struct LockExecutor {
    registry: Arc<LockRegistry>,
}

impl LockExecutor {
    pub fn new(registry: Arc<LockRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Run the step under a required blocking lock. Failing to acquire
    /// within the descriptor's wait is a `NotAcquired` failure and the step
    /// never runs.
    pub fn execute_blocking<T>(
        &self,
        descriptor: &LockDescriptor,
        step: impl FnOnce() -> anyhow::Result<T>,
    ) -> Result<T, LockError> {
        let locker = self.registry.blocking_locker(descriptor)?;
        let acquired = if descriptor.has_wait() {
            locker.obtain_lock(descriptor.wait_for)?
        } else {
            locker.try_lock()?
        };
        if !acquired {
            return Err(LockError::NotAcquired(descriptor.name.clone()));
        }

        let guard = ReleaseGuard::new(locker.as_ref());
        let outcome = step();
        let released = guard.release();

        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(err) => {
                if let Err(release_err) = released {
                    warn!(lock = %descriptor.name, error = %release_err, "release failed after step error");
                }
                Err(LockError::execution(&descriptor.name, err))
            }
        }
    }

    /// Run the step under an optional blocking lock: the step always runs
    /// and receives whether the lock was acquired.
    pub fn execute_blocking_with<T>(
        &self,
        descriptor: &LockDescriptor,
        step: impl FnOnce(bool) -> anyhow::Result<T>,
    ) -> Result<T, LockError> {
        let locker = self.registry.blocking_locker(descriptor)?;
        let mut handler = AutoHandler::new(locker.as_ref());
        if descriptor.has_wait() {
            handler = handler.wait_for(descriptor.wait_for);
        }
        handler.then_return(step)
    }

    /// Run the step under a required cooperative lock.
    pub async fn execute_cooperative<T, Fut, F>(
        &self,
        descriptor: &LockDescriptor,
        step: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let locker = self.registry.cooperative_locker(descriptor)?;
        let support = CooperativeLockSupport::new(locker);
        let timeout = descriptor.has_wait().then_some(descriptor.wait_for);
        support.with_lock_required(timeout, step).await
    }

    /// Run the step under an optional cooperative lock.
    pub async fn execute_cooperative_with<T, Fut, F>(
        &self,
        descriptor: &LockDescriptor,
        step: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let locker = self.registry.cooperative_locker(descriptor)?;
        let support = CooperativeLockSupport::new(locker);
        match descriptor.has_wait() {
            true => {
                support
                    .obtain_lock_with_async(descriptor.wait_for, step)
                    .await
            }
            false => support.try_lock_with_async(step).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;

    use crate::locker::BlockingLocker;
    use crate::model::{LockMode, LockType, LocksConfig};

    use super::*;

    fn executor() -> LockExecutor {
        LockExecutor::new(Arc::new(LockRegistry::new(&LocksConfig::default())))
    }

    fn local_blocking(name: &str) -> LockDescriptor {
        LockDescriptor::new(name, Duration::ZERO, LockType::Local, LockMode::Blocking)
    }

    fn local_cooperative(name: &str) -> LockDescriptor {
        LockDescriptor::new(name, Duration::ZERO, LockType::Local, LockMode::Cooperative)
    }

    #[test]
    fn test_execute_blocking_runs_and_releases() {
        let executor = executor();
        let value = executor
            .execute_blocking(&local_blocking("alpha"), || Ok(21))
            .unwrap();
        assert_eq!(value, 21);

        let locker = executor.registry().local_blocking_locker("alpha");
        assert!(locker.is_released().unwrap());
    }

    #[test]
    fn test_execute_blocking_not_acquired_skips_step() {
        let executor = executor();
        let locker = executor.registry().local_blocking_locker("alpha");
        assert!(locker.try_lock().unwrap());

        let mut ran = false;
        let result: Result<(), _> = executor.execute_blocking(&local_blocking("alpha"), || {
            ran = true;
            Ok(())
        });

        assert!(matches!(result, Err(LockError::NotAcquired(name)) if name == "alpha"));
        assert!(!ran);
        assert!(locker.is_locked().unwrap());
    }

    #[test]
    fn test_execute_blocking_releases_on_step_error() {
        let executor = executor();
        let result: Result<(), _> =
            executor.execute_blocking(&local_blocking("alpha"), || Err(anyhow!("boom")));

        assert!(matches!(result, Err(LockError::Execution { .. })));
        let locker = executor.registry().local_blocking_locker("alpha");
        assert!(locker.is_released().unwrap());
    }

    #[test]
    fn test_execute_blocking_with_runs_step_unacquired() {
        let executor = executor();
        let locker = executor.registry().local_blocking_locker("alpha");
        assert!(locker.try_lock().unwrap());

        let value = executor
            .execute_blocking_with(&local_blocking("alpha"), |acquired| Ok(acquired))
            .unwrap();
        assert!(!value);
    }

    #[test]
    fn test_mode_mismatch_fails_before_acquisition() {
        let executor = executor();
        let result = executor.execute_blocking(&local_cooperative("alpha"), || Ok(()));
        assert!(matches!(result, Err(LockError::UnknownFamily { .. })));

        // The cooperative family was never touched
        let locker = executor.registry().local_cooperative_locker("alpha");
        assert_eq!(locker.locked_at_sync(), 0);
    }

    #[tokio::test]
    async fn test_execute_cooperative_runs_and_releases() {
        let executor = executor();
        let value = executor
            .execute_cooperative(&local_cooperative("alpha"), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let locker = executor.registry().local_cooperative_locker("alpha");
        assert!(!locker.is_locked_sync());
    }

    #[tokio::test]
    async fn test_execute_cooperative_not_acquired() {
        let executor = executor();
        let locker = executor.registry().local_cooperative_locker("alpha");
        assert!(locker.try_lock_sync());

        let result: Result<(), _> = executor
            .execute_cooperative(&local_cooperative("alpha"), || async { Ok(()) })
            .await;
        assert!(matches!(result, Err(LockError::NotAcquired(_))));
    }

    #[tokio::test]
    async fn test_execute_cooperative_with_reports_acquisition() {
        let executor = executor();
        let locker = executor.registry().local_cooperative_locker("alpha");
        assert!(locker.try_lock_sync());

        let value = executor
            .execute_cooperative_with(&local_cooperative("alpha"), |acquired| async move {
                Ok(acquired)
            })
            .await
            .unwrap();
        assert!(!value);
    }
}
