//! Composition engines
//!
//! Wrap a locker with the acquire, run, release lifecycle so callers never
//! sequence those calls by hand.

pub mod auto;
pub mod cooperative;

pub use auto::AutoHandler;
pub use cooperative::CooperativeLockSupport;
