//! Blocking composition engine
//!
//! Wraps a blocking locker with an acquire, execute, release pipeline. The
//! two terminal operations (`then` for a side-effecting step, `then_return`
//! for a value-producing step) consume the handler, so a pipeline gets
//! exactly one terminal; mixing them does not compile.

use std::time::Duration;

use tracing::warn;

use relock_common::{CancelToken, LockError};

use crate::locker::BlockingLocker;

type ErrorPredicate<'a> = Box<dyn Fn(&anyhow::Error) -> bool + 'a>;
type ErrorMapper<'a> = Box<dyn FnOnce(anyhow::Error) -> anyhow::Error + 'a>;
type Fallback<'a, T> = Box<dyn FnOnce(anyhow::Error) -> T + 'a>;

/// Acquire, run, release pipeline for synchronous callers.
///
/// Release fires exactly once per terminal call, on every exit path
/// including a panicking step, and only if acquisition succeeded.
pub struct AutoHandler<'a, T> {
    locker: &'a dyn BlockingLocker,
    wait_for: Option<Duration>,
    cancel: Option<CancelToken>,
    error_map: Option<(ErrorPredicate<'a>, ErrorMapper<'a>)>,
    fallback: Option<(ErrorPredicate<'a>, Fallback<'a, T>)>,
}

impl<'a, T> AutoHandler<'a, T> {
    pub fn new(locker: &'a dyn BlockingLocker) -> Self {
        Self {
            locker,
            wait_for: None,
            cancel: None,
            error_map: None,
            fallback: None,
        }
    }

    /// Acquire with a bounded wait instead of a single try.
    pub fn wait_for(mut self, timeout: Duration) -> Self {
        self.wait_for = Some(timeout);
        self
    }

    /// Abort a bounded wait when the token is cancelled.
    pub fn cancel_with(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Map-and-rethrow policy: when `predicate` matches the step's error,
    /// the mapped error is rethrown and no further policy applies.
    pub fn error_map(
        mut self,
        predicate: impl Fn(&anyhow::Error) -> bool + 'a,
        mapper: impl FnOnce(anyhow::Error) -> anyhow::Error + 'a,
    ) -> Self {
        self.error_map = Some((Box::new(predicate), Box::new(mapper)));
        self
    }

    /// Resume-with-fallback policy: when `predicate` matches the step's
    /// error, `fallback` produces the pipeline's value instead.
    pub fn on_error_resume(
        mut self,
        predicate: impl Fn(&anyhow::Error) -> bool + 'a,
        fallback: impl FnOnce(anyhow::Error) -> T + 'a,
    ) -> Self {
        self.fallback = Some((Box::new(predicate), Box::new(fallback)));
        self
    }

    /// Terminal operation for a value-producing step.
    ///
    /// The step always runs: with `true` inside the guarded region when the
    /// lock was acquired, with `false` (and no release ever attempted)
    /// otherwise.
    pub fn then_return(
        self,
        step: impl FnOnce(bool) -> anyhow::Result<T>,
    ) -> Result<T, LockError> {
        let AutoHandler {
            locker,
            wait_for,
            cancel,
            error_map,
            fallback,
        } = self;
        let name = locker.lock_name().to_string();

        let acquired = match wait_for {
            Some(timeout) if !timeout.is_zero() => match &cancel {
                Some(token) => locker.obtain_lock_cancellable(timeout, token)?,
                None => locker.obtain_lock(timeout)?,
            },
            _ => locker.try_lock()?,
        };

        if !acquired {
            return step(false).map_err(|err| LockError::execution(&name, err));
        }

        let guard = ReleaseGuard::new(locker);
        let outcome = step(true);
        let released = guard.release();

        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(err) => {
                if let Err(release_err) = released {
                    warn!(lock = %name, error = %release_err, "release failed after step error");
                }
                resolve_error(name, error_map, fallback, err)
            }
        }
    }
}

impl<'a> AutoHandler<'a, ()> {
    /// Terminal operation for a side-effecting step.
    pub fn then(self, step: impl FnOnce(bool) -> anyhow::Result<()>) -> Result<(), LockError> {
        self.then_return(step)
    }
}

fn resolve_error<'a, T>(
    name: String,
    error_map: Option<(ErrorPredicate<'a>, ErrorMapper<'a>)>,
    fallback: Option<(ErrorPredicate<'a>, Fallback<'a, T>)>,
    err: anyhow::Error,
) -> Result<T, LockError> {
    if let Some((predicate, mapper)) = error_map
        && predicate(&err)
    {
        return Err(LockError::execution(name, mapper(err)));
    }
    if let Some((predicate, produce)) = fallback
        && predicate(&err)
    {
        return Ok(produce(err));
    }
    Err(LockError::execution(name, err))
}

/// Releases on drop unless explicitly consumed, covering the panic path.
pub(crate) struct ReleaseGuard<'a> {
    locker: Option<&'a dyn BlockingLocker>,
}

impl<'a> ReleaseGuard<'a> {
    pub(crate) fn new(locker: &'a dyn BlockingLocker) -> Self {
        Self {
            locker: Some(locker),
        }
    }

    pub(crate) fn release(mut self) -> Result<bool, LockError> {
        match self.locker.take() {
            Some(locker) => locker.release_lock(),
            None => Ok(true),
        }
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(locker) = self.locker.take()
            && let Err(err) = locker.release_lock()
        {
            warn!(lock = %locker.lock_name(), error = %err, "release failed during unwind");
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use crate::locker::SignalLocker;

    use super::*;

    #[test]
    fn test_then_runs_step_and_releases() {
        let locker = SignalLocker::new("alpha");
        let mut observed = None;

        AutoHandler::new(&locker)
            .then(|acquired| {
                observed = Some(acquired);
                Ok(())
            })
            .unwrap();

        assert_eq!(observed, Some(true));
        assert!(locker.is_released().unwrap());
    }

    #[test]
    fn test_then_return_releases_on_step_error() {
        let locker = SignalLocker::new("alpha");

        let result: Result<i32, _> =
            AutoHandler::new(&locker).then_return(|_| Err(anyhow!("boom")));

        assert!(matches!(result, Err(LockError::Execution { name, .. }) if name == "alpha"));
        assert!(locker.is_released().unwrap());
    }

    #[test]
    fn test_unacquired_runs_step_with_false_and_never_releases() {
        let locker = SignalLocker::new("alpha");
        assert!(locker.try_lock().unwrap());

        let mut observed = None;
        AutoHandler::new(&locker)
            .then(|acquired| {
                observed = Some(acquired);
                Ok(())
            })
            .unwrap();

        assert_eq!(observed, Some(false));
        // Still held by the outer acquisition: the handler did not release
        assert!(locker.is_locked().unwrap());
    }

    #[test]
    fn test_error_map_applies_first() {
        let locker = SignalLocker::new("alpha");

        let result: Result<i32, _> = AutoHandler::new(&locker)
            .error_map(
                |err| err.to_string().contains("boom"),
                |err| anyhow!("mapped: {}", err),
            )
            .on_error_resume(|_| true, |_| 42)
            .then_return(|_| Err(anyhow!("boom")));

        // The map-and-rethrow policy wins; the fallback never applies
        match result.unwrap_err() {
            LockError::Execution { name, source } => {
                assert_eq!(name, "alpha");
                assert_eq!(source.to_string(), "mapped: boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(locker.is_released().unwrap());
    }

    #[test]
    fn test_on_error_resume_produces_fallback() {
        let locker = SignalLocker::new("alpha");

        let result = AutoHandler::new(&locker)
            .on_error_resume(|err| err.to_string() == "boom", |_| 42)
            .then_return(|_| Err(anyhow!("boom")));

        assert_eq!(result.unwrap(), 42);
        assert!(locker.is_released().unwrap());
    }

    #[test]
    fn test_unmatched_error_propagates() {
        let locker = SignalLocker::new("alpha");

        let result = AutoHandler::new(&locker)
            .on_error_resume(|err| err.to_string() == "other", |_| 42)
            .then_return(|_| Err(anyhow!("boom")));

        assert!(matches!(result, Err(LockError::Execution { .. })));
    }

    #[test]
    fn test_release_on_panic() {
        let locker = SignalLocker::new("alpha");

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), _> = AutoHandler::new(&locker).then(|_| panic!("kaboom"));
        }));

        assert!(panicked.is_err());
        assert!(locker.is_released().unwrap());
    }

    #[test]
    fn test_wait_for_obtains_after_release() {
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let locker = Arc::new(SignalLocker::new("alpha"));
        assert!(locker.try_lock().unwrap());

        let holder = locker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            holder.release_lock().unwrap();
        });

        let started = Instant::now();
        let value = AutoHandler::new(locker.as_ref())
            .wait_for(Duration::from_millis(500))
            .then_return(|acquired| Ok(acquired))
            .unwrap();
        handle.join().unwrap();

        assert!(value);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(locker.is_released().unwrap());
    }
}
