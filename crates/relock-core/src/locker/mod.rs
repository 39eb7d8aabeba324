//! Lock primitives
//!
//! One capability contract per execution discipline. Composition engines
//! depend only on these traits, never on a concrete family.

pub mod distributed;
pub mod local;

use std::time::Duration;

use async_trait::async_trait;

use relock_common::{CancelToken, LockError};

use crate::model::{LockMode, LockType};

pub use distributed::{DistributedCooperativeLocker, DistributedLocker};
pub use local::{LocalCooperativeLocker, LocalLocker, SignalLocker};

/// A lock used under the thread-blocking discipline.
///
/// Contention is a boolean, never an error: `try_lock` and `obtain_lock`
/// report acquisition as `Ok(true)`/`Ok(false)`. Errors are reserved for
/// store failures and cancellation.
pub trait BlockingLocker: Send + Sync {
    fn lock_name(&self) -> &str;

    fn lock_type(&self) -> LockType;

    fn lock_mode(&self) -> LockMode {
        LockMode::Blocking
    }

    /// Single acquisition attempt.
    fn try_lock(&self) -> Result<bool, LockError>;

    /// Retry acquisition until it succeeds or `timeout` elapses. Returns
    /// `Ok(false)` no earlier than the deadline.
    fn obtain_lock(&self, timeout: Duration) -> Result<bool, LockError> {
        self.obtain_lock_cancellable(timeout, &CancelToken::new())
    }

    /// Like `obtain_lock`, but aborts the wait with `LockError::Cancelled`
    /// once `cancel` is set. Fails fast when already cancelled on entry.
    fn obtain_lock_cancellable(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, LockError>;

    /// Release the lock. Idempotent: releasing an already-free lock reports
    /// success without side effects.
    fn release_lock(&self) -> Result<bool, LockError>;

    fn is_locked(&self) -> Result<bool, LockError>;

    /// Whether the caller's identity matches the recorded owner.
    fn is_locked_by_caller(&self) -> Result<bool, LockError>;

    fn is_released(&self) -> Result<bool, LockError> {
        Ok(!self.is_locked()?)
    }

    /// Unix seconds of the last acquisition, 0 if never acquired.
    fn elapsed_time(&self) -> Result<i64, LockError>;
}

/// A lock used under the suspend-on-acquire cooperative discipline.
///
/// There is no cancellation token here: cancelling a cooperative wait is
/// dropping the future, which is structurally distinct from an `Ok(false)`
/// timeout.
#[async_trait]
pub trait CooperativeLocker: Send + Sync {
    fn lock_name(&self) -> &str;

    fn lock_type(&self) -> LockType;

    fn lock_mode(&self) -> LockMode {
        LockMode::Cooperative
    }

    /// Single acquisition attempt. The retry-until-timeout loop lives in the
    /// composition engine, not here.
    async fn try_lock(&self) -> Result<bool, LockError>;

    /// Release the lock. Idempotent.
    async fn release_lock(&self) -> Result<bool, LockError>;

    async fn is_locked(&self) -> Result<bool, LockError>;

    async fn is_locked_by_caller(&self) -> Result<bool, LockError>;

    async fn is_released(&self) -> Result<bool, LockError> {
        Ok(!self.is_locked().await?)
    }

    /// Unix seconds of the last acquisition, 0 if never acquired.
    async fn elapsed_time(&self) -> Result<i64, LockError>;
}
