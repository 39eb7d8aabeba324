//! Descriptor-driven services on top of the registry: the execution entry
//! points and the periodic cleanup sweep.

pub mod cleaner;
pub mod executor;

pub use cleaner::LockCleanerService;
pub use executor::LockExecutor;
