//! Relock Common - Shared error types and utilities
//!
//! This crate provides:
//! - `LockError`: the error taxonomy shared by every lock engine
//! - `CancelToken`: cooperative cancellation for blocking waits
//! - Time helpers used for lock age bookkeeping

pub mod error;
pub mod utils;

pub use error::LockError;
pub use utils::{CancelToken, now_epoch_seconds};
