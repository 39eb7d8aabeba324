//! Persistence trait abstractions

mod lock;

pub use lock::LockStore;
