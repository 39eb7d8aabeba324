//! Domain model types for the lock store

use serde::{Deserialize, Serialize};

/// One held lock as stored in the backing store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub name: String,
    pub owner: String,
    /// Unix seconds at acquisition time
    pub locked_at: i64,
}

impl From<crate::entity::distributed_locks::Model> for LockRow {
    fn from(model: crate::entity::distributed_locks::Model) -> Self {
        LockRow {
            name: model.name,
            owner: model.owner,
            locked_at: model.locked_at,
        }
    }
}
