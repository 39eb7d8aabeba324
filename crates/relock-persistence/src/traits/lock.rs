//! Lock store trait
//!
//! Defines the interface for distributed lock storage operations. The store
//! is relied upon for read-committed statement atomicity only; the insert's
//! primary-key constraint is what serializes competing acquirers.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::LockRow;

/// Distributed lock storage operations
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Make sure the `distributed_locks` table exists.
    /// Typically called once at startup.
    async fn ensure_schema(&self) -> anyhow::Result<()>;

    /// Attempt to acquire a lock by inserting a row keyed by `name`.
    ///
    /// Returns `Ok(false)` when the row already exists (the expected
    /// "already held" signal); any other store failure is an error.
    async fn insert_lock(&self, name: &str, owner: &str) -> anyhow::Result<bool>;

    /// Whether a lock row with the given name exists.
    async fn is_locked(&self, name: &str) -> anyhow::Result<bool>;

    /// Whether the lock is held by the given owner.
    async fn is_locked_by(&self, name: &str, owner: &str) -> anyhow::Result<bool>;

    /// Delete the lock row only if held by the given owner. A no-op when the
    /// row is absent or owned by someone else.
    async fn delete_lock_owned(&self, name: &str, owner: &str) -> anyhow::Result<()>;

    /// Delete the lock row regardless of owner.
    async fn delete_lock(&self, name: &str) -> anyhow::Result<()>;

    /// Delete every row whose `locked_at` precedes `now - max_age`.
    /// The only reclamation path for locks whose holder crashed.
    async fn delete_expired(&self, max_age: Duration) -> anyhow::Result<u64>;

    /// Number of currently held locks.
    async fn count_all(&self) -> anyhow::Result<u64>;

    /// Delete every lock row, returning how many were removed.
    async fn delete_all(&self) -> anyhow::Result<u64>;

    /// Acquisition timestamp (unix seconds) of the named lock, if held.
    async fn locked_at(&self, name: &str) -> anyhow::Result<Option<i64>>;

    /// Enumerate all held locks.
    async fn find_all(&self) -> anyhow::Result<Vec<LockRow>>;
}
