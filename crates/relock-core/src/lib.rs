//! Mutual-exclusion engine: in-process and store-backed named locks under a
//! thread-blocking or cooperative discipline, with composition engines that
//! scope a critical section between acquire and a guaranteed release, a
//! family registry, and a periodic cleanup sweep.

pub mod handler;
pub mod locker;
pub mod model;
pub mod registry;
pub mod service;

pub use handler::{AutoHandler, CooperativeLockSupport};
pub use locker::{
    BlockingLocker, CooperativeLocker, DistributedCooperativeLocker, DistributedLocker,
    LocalCooperativeLocker, LocalLocker, SignalLocker,
};
pub use model::{
    LockContext, LockDescriptor, LockMode, LockType, LockerInfo, LocksConfig,
};
pub use registry::{LockFamily, LockRegistry};
pub use service::{LockCleanerService, LockExecutor};

pub use relock_common::{CancelToken, LockError};
pub use relock_persistence::{LockStore, MemoryLockStore, SqlLockStore};
