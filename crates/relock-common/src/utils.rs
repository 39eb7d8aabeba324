//! Time helpers and cancellation token

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Current unix time in seconds
pub fn now_epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Cooperative cancellation flag for blocking waits.
///
/// A waiter polls the token between wait rounds; the owner flips it from any
/// thread. Cancellation surfaces as `LockError::Cancelled`, never as a plain
/// `false` acquisition result.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_now_epoch_seconds() {
        // Sanity bound: after 2020-01-01
        assert!(now_epoch_seconds() > 1_577_836_800);
    }
}
