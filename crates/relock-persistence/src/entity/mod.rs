//! SeaORM entities

pub mod distributed_locks;
