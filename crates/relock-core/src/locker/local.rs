//! In-process lock engines
//!
//! Acquisition is a compare-and-swap from free to held under a mutex, with a
//! condvar for bounded waits. A woken waiter always re-checks the predicate,
//! so spurious wakeups are harmless. Two blocking variants exist: the
//! thread-owned `LocalLocker` only lets the recorded owner thread release,
//! the signal-only `SignalLocker` lets anyone release.

use std::sync::atomic::{AtomicI64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use relock_common::{CancelToken, LockError, now_epoch_seconds};

use crate::locker::{BlockingLocker, CooperativeLocker};
use crate::model::LockType;

/// How long a single condvar wait round lasts; bounds cancellation latency.
const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Default)]
struct LockState {
    held: bool,
    owner: Option<ThreadId>,
}

/// Shared CAS state machine behind every local lock variant
struct LockCore {
    name: String,
    state: Mutex<LockState>,
    available: Condvar,
    last_locked_at: AtomicI64,
}

impl LockCore {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LockState::default()),
            available: Condvar::new(),
            last_locked_at: AtomicI64::new(0),
        }
    }

    fn try_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.held {
            debug!(lock = %self.name, "lock already held, try_lock lost");
            return false;
        }
        state.held = true;
        state.owner = Some(thread::current().id());
        self.last_locked_at
            .store(now_epoch_seconds(), Ordering::Release);
        debug!(lock = %self.name, "lock acquired");
        true
    }

    fn obtain(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool, LockError> {
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled(self.name.clone()));
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if !state.held {
                state.held = true;
                state.owner = Some(thread::current().id());
                self.last_locked_at
                    .store(now_epoch_seconds(), Ordering::Release);
                debug!(lock = %self.name, "lock acquired after wait");
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %self.name, "wait deadline reached");
                return Ok(false);
            }
            let wait = (deadline - now).min(WAIT_SLICE);
            self.available.wait_for(&mut state, wait);
            if cancel.is_cancelled() {
                return Err(LockError::Cancelled(self.name.clone()));
            }
        }
    }

    fn release(&self, require_owner: bool) -> bool {
        let mut state = self.state.lock();
        if !state.held {
            // Already free, releasing again is a success without side effects
            return true;
        }
        if require_owner && state.owner != Some(thread::current().id()) {
            debug!(lock = %self.name, "release refused, caller is not the owner");
            return false;
        }
        state.held = false;
        state.owner = None;
        drop(state);
        self.available.notify_all();
        debug!(lock = %self.name, "lock released");
        true
    }

    fn is_locked(&self) -> bool {
        self.state.lock().held
    }

    fn is_locked_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    fn locked_at(&self) -> i64 {
        self.last_locked_at.load(Ordering::Acquire)
    }
}

/// Thread-owned local blocking lock: only the thread that acquired it may
/// transition it back to free.
pub struct LocalLocker {
    core: LockCore,
}

impl LocalLocker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: LockCore::new(name),
        }
    }

    pub(crate) fn is_locked_sync(&self) -> bool {
        self.core.is_locked()
    }

    pub(crate) fn locked_at_sync(&self) -> i64 {
        self.core.locked_at()
    }
}

impl BlockingLocker for LocalLocker {
    fn lock_name(&self) -> &str {
        &self.core.name
    }

    fn lock_type(&self) -> LockType {
        LockType::Local
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        Ok(self.core.try_lock())
    }

    fn obtain_lock_cancellable(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, LockError> {
        self.core.obtain(timeout, cancel)
    }

    fn release_lock(&self) -> Result<bool, LockError> {
        Ok(self.core.release(true))
    }

    fn is_locked(&self) -> Result<bool, LockError> {
        Ok(self.core.is_locked())
    }

    fn is_locked_by_caller(&self) -> Result<bool, LockError> {
        Ok(self.core.is_locked_by_current_thread())
    }

    fn elapsed_time(&self) -> Result<i64, LockError> {
        Ok(self.core.locked_at())
    }
}

/// Signal-only local blocking lock: release is keyed on the signal alone,
/// any thread may free it.
pub struct SignalLocker {
    core: LockCore,
}

impl SignalLocker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: LockCore::new(name),
        }
    }

    pub(crate) fn is_locked_sync(&self) -> bool {
        self.core.is_locked()
    }

    pub(crate) fn locked_at_sync(&self) -> i64 {
        self.core.locked_at()
    }
}

impl BlockingLocker for SignalLocker {
    fn lock_name(&self) -> &str {
        &self.core.name
    }

    fn lock_type(&self) -> LockType {
        LockType::Local
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        Ok(self.core.try_lock())
    }

    fn obtain_lock_cancellable(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, LockError> {
        self.core.obtain(timeout, cancel)
    }

    fn release_lock(&self) -> Result<bool, LockError> {
        Ok(self.core.release(false))
    }

    fn is_locked(&self) -> Result<bool, LockError> {
        Ok(self.core.is_locked())
    }

    fn is_locked_by_caller(&self) -> Result<bool, LockError> {
        Ok(self.core.is_locked_by_current_thread())
    }

    fn elapsed_time(&self) -> Result<i64, LockError> {
        Ok(self.core.locked_at())
    }
}

/// In-process lock for the cooperative discipline.
///
/// Release is signal-only: the composition engine's release guard may fire
/// from whichever task or thread resumes last. The recorded owner is
/// informational and feeds `is_locked_by_caller` only.
pub struct LocalCooperativeLocker {
    core: LockCore,
}

impl LocalCooperativeLocker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: LockCore::new(name),
        }
    }

    #[cfg(test)]
    pub(crate) fn try_lock_sync(&self) -> bool {
        self.core.try_lock()
    }

    pub(crate) fn is_locked_sync(&self) -> bool {
        self.core.is_locked()
    }

    pub(crate) fn locked_at_sync(&self) -> i64 {
        self.core.locked_at()
    }
}

#[async_trait]
impl CooperativeLocker for LocalCooperativeLocker {
    fn lock_name(&self) -> &str {
        &self.core.name
    }

    fn lock_type(&self) -> LockType {
        LockType::Local
    }

    async fn try_lock(&self) -> Result<bool, LockError> {
        Ok(self.core.try_lock())
    }

    async fn release_lock(&self) -> Result<bool, LockError> {
        Ok(self.core.release(false))
    }

    async fn is_locked(&self) -> Result<bool, LockError> {
        Ok(self.core.is_locked())
    }

    async fn is_locked_by_caller(&self) -> Result<bool, LockError> {
        Ok(self.core.is_locked_by_current_thread())
    }

    async fn elapsed_time(&self) -> Result<i64, LockError> {
        Ok(self.core.locked_at())
    }
}
