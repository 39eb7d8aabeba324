//! Relock Persistence - Lock store backends
//!
//! This crate provides:
//! - The SeaORM entity for the `distributed_locks` table
//! - The `LockStore` trait every distributed lock engine speaks to
//! - A SQL backend (MySQL/PostgreSQL via SeaORM) and an in-memory backend

pub mod entity;
pub mod memory;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

pub use memory::MemoryLockStore;
pub use model::LockRow;
pub use sql::SqlLockStore;
pub use traits::LockStore;
