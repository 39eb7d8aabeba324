//! Cooperative composition engine
//!
//! The acquire, run, release pipeline expressed as lazy futures and streams.
//! Nothing happens until the caller polls; waiting between acquisition
//! retries is a suspension, never a parked thread.
//!
//! The central correctness property: once acquisition succeeded, release
//! fires exactly once on any of normal completion, propagated error, or
//! cancellation of the enclosing task, and never fires when acquisition
//! failed. Completion and error paths await the release inline; the
//! cancellation path is covered by a drop guard that spawns the release on
//! the current runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use relock_common::LockError;

use crate::locker::CooperativeLocker;

/// Fixed cadence between acquisition retries.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Retry `try_lock` until success or the deadline. `None` (or zero) timeout
/// means a single try. Returns `Ok(false)` no earlier than the deadline.
async fn acquire(
    locker: &Arc<dyn CooperativeLocker>,
    timeout: Option<Duration>,
) -> Result<bool, LockError> {
    if locker.try_lock().await? {
        return Ok(true);
    }
    let Some(timeout) = timeout.filter(|timeout| !timeout.is_zero()) else {
        return Ok(false);
    };
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            debug!(lock = %locker.lock_name(), "retry deadline reached");
            return Ok(false);
        }
        tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        if locker.try_lock().await? {
            return Ok(true);
        }
    }
}

/// Scopes release to the pipeline's lifetime.
///
/// `release` consumes the guard and awaits the store call; dropping an
/// unconsumed guard (the cancellation path) spawns the release instead.
pub(crate) struct ReleaseGuard {
    locker: Option<Arc<dyn CooperativeLocker>>,
}

impl ReleaseGuard {
    pub(crate) fn new(locker: Arc<dyn CooperativeLocker>) -> Self {
        Self {
            locker: Some(locker),
        }
    }

    pub(crate) async fn release(mut self) -> Result<bool, LockError> {
        match self.locker.take() {
            Some(locker) => locker.release_lock().await,
            None => Ok(true),
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(locker) = self.locker.take() else {
            return;
        };
        let name = locker.lock_name().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = locker.release_lock().await {
                        warn!(lock = %name, error = %err, "release failed after cancellation");
                    }
                });
            }
            Err(_) => {
                warn!(lock = %name, "release skipped: no runtime available during drop");
            }
        }
    }
}

fn finish<T>(
    name: String,
    outcome: anyhow::Result<T>,
    released: Result<bool, LockError>,
) -> Result<T, LockError> {
    match outcome {
        Ok(value) => {
            released?;
            Ok(value)
        }
        Err(err) => {
            if let Err(release_err) = released {
                warn!(lock = %name, error = %release_err, "release failed after step error");
            }
            Err(LockError::execution(name, err))
        }
    }
}

/// Acquire, run, release pipelines over a cooperative locker.
pub struct CooperativeLockSupport {
    locker: Arc<dyn CooperativeLocker>,
}

impl CooperativeLockSupport {
    pub fn new(locker: Arc<dyn CooperativeLocker>) -> Self {
        Self { locker }
    }

    pub fn locker(&self) -> &Arc<dyn CooperativeLocker> {
        &self.locker
    }

    /// Single acquisition try, then run the step with the result.
    pub async fn try_lock_with<T, F>(&self, step: F) -> Result<T, LockError>
    where
        F: FnOnce(bool) -> anyhow::Result<T>,
    {
        self.run(None, step).await
    }

    /// Retry acquisition until `timeout`, then run the step with the result.
    /// A timeout is not an error: the step still runs, with `false`.
    pub async fn obtain_lock_with<T, F>(&self, timeout: Duration, step: F) -> Result<T, LockError>
    where
        F: FnOnce(bool) -> anyhow::Result<T>,
    {
        self.run(Some(timeout), step).await
    }

    /// Like `try_lock_with` for a step that is itself a future.
    pub async fn try_lock_with_async<T, Fut, F>(&self, step: F) -> Result<T, LockError>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_async(None, step).await
    }

    /// Like `obtain_lock_with` for a step that is itself a future.
    pub async fn obtain_lock_with_async<T, Fut, F>(
        &self,
        timeout: Duration,
        step: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_async(Some(timeout), step).await
    }

    /// Required-lock pipeline: the step runs only when the lock was
    /// acquired; an unacquired lock is a `NotAcquired` failure.
    pub async fn with_lock_required<T, Fut, F>(
        &self,
        timeout: Option<Duration>,
        step: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let name = self.locker.lock_name().to_string();
        let acquired = acquire(&self.locker, timeout).await?;
        if !acquired {
            return Err(LockError::NotAcquired(name));
        }
        let guard = ReleaseGuard::new(self.locker.clone());
        let outcome = step().await;
        let released = guard.release().await;
        finish(name, outcome, released)
    }

    /// Zero-or-many pipeline with a single acquisition try: the step maps
    /// the acquisition result to a stream, and release is scoped to that
    /// stream's lifetime.
    pub fn try_lock_stream<T, S, F>(&self, step: F) -> impl Stream<Item = Result<T, LockError>>
    where
        F: FnOnce(bool) -> S,
        S: Stream<Item = anyhow::Result<T>> + Unpin,
    {
        self.lock_stream(None, step)
    }

    /// Zero-or-many pipeline with retry-until-timeout acquisition.
    pub fn obtain_lock_stream<T, S, F>(
        &self,
        timeout: Duration,
        step: F,
    ) -> impl Stream<Item = Result<T, LockError>>
    where
        F: FnOnce(bool) -> S,
        S: Stream<Item = anyhow::Result<T>> + Unpin,
    {
        self.lock_stream(Some(timeout), step)
    }

    async fn run<T, F>(&self, timeout: Option<Duration>, step: F) -> Result<T, LockError>
    where
        F: FnOnce(bool) -> anyhow::Result<T>,
    {
        let name = self.locker.lock_name().to_string();
        let acquired = acquire(&self.locker, timeout).await?;
        if !acquired {
            return step(false).map_err(|err| LockError::execution(&name, err));
        }
        let guard = ReleaseGuard::new(self.locker.clone());
        let outcome = step(true);
        let released = guard.release().await;
        finish(name, outcome, released)
    }

    async fn run_async<T, Fut, F>(&self, timeout: Option<Duration>, step: F) -> Result<T, LockError>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let name = self.locker.lock_name().to_string();
        let acquired = acquire(&self.locker, timeout).await?;
        if !acquired {
            return step(false)
                .await
                .map_err(|err| LockError::execution(&name, err));
        }
        let guard = ReleaseGuard::new(self.locker.clone());
        let outcome = step(true).await;
        let released = guard.release().await;
        finish(name, outcome, released)
    }

    fn lock_stream<T, S, F>(
        &self,
        timeout: Option<Duration>,
        step: F,
    ) -> impl Stream<Item = Result<T, LockError>>
    where
        F: FnOnce(bool) -> S,
        S: Stream<Item = anyhow::Result<T>> + Unpin,
    {
        enum State<F, S> {
            Init {
                locker: Arc<dyn CooperativeLocker>,
                timeout: Option<Duration>,
                step: F,
            },
            Running {
                name: String,
                inner: S,
                guard: Option<ReleaseGuard>,
            },
            Done,
        }

        let initial = State::Init {
            locker: self.locker.clone(),
            timeout,
            step,
        };

        futures::stream::unfold(initial, |mut state| async move {
            loop {
                match state {
                    State::Init {
                        locker,
                        timeout,
                        step,
                    } => {
                        let name = locker.lock_name().to_string();
                        match acquire(&locker, timeout).await {
                            Ok(acquired) => {
                                let guard =
                                    acquired.then(|| ReleaseGuard::new(locker.clone()));
                                let inner = step(acquired);
                                state = State::Running { name, inner, guard };
                            }
                            Err(err) => return Some((Err(err), State::Done)),
                        }
                    }
                    State::Running {
                        name,
                        mut inner,
                        guard,
                    } => match inner.next().await {
                        Some(Ok(item)) => {
                            return Some((Ok(item), State::Running { name, inner, guard }));
                        }
                        Some(Err(err)) => {
                            if let Some(guard) = guard {
                                if let Err(release_err) = guard.release().await {
                                    warn!(lock = %name, error = %release_err, "release failed after stream error");
                                }
                            }
                            return Some((Err(LockError::execution(name, err)), State::Done));
                        }
                        None => {
                            if let Some(guard) = guard {
                                if let Err(release_err) = guard.release().await {
                                    return Some((Err(release_err), State::Done));
                                }
                            }
                            return None;
                        }
                    },
                    State::Done => return None,
                }
            }
        })
    }
}
