//! SQL-based lock store (MySQL/PostgreSQL via SeaORM)
//!
//! One row per held lock. Acquisition is an insert; the primary key on
//! `name` rejecting a second insert is the expected contention signal and is
//! mapped to `Ok(false)`, never propagated as an error.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::{ConnectionTrait, DatabaseConnection, SqlErr, prelude::*};
use tracing::{debug, info};

use relock_common::now_epoch_seconds;

use crate::entity::distributed_locks;
use crate::model::LockRow;
use crate::traits::LockStore;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS distributed_locks (\
     name VARCHAR(100) PRIMARY KEY, \
     owner VARCHAR(100), \
     locked_at BIGINT)";

/// Lock store backed by an external relational database
pub struct SqlLockStore {
    db: DatabaseConnection,
}

impl SqlLockStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl LockStore for SqlLockStore {
    async fn ensure_schema(&self) -> anyhow::Result<()> {
        info!("checking that distributed_locks table exists");
        self.db.execute_unprepared(CREATE_TABLE_SQL).await?;
        Ok(())
    }

    async fn insert_lock(&self, name: &str, owner: &str) -> anyhow::Result<bool> {
        let entity = distributed_locks::ActiveModel {
            name: Set(name.to_string()),
            owner: Set(owner.to_string()),
            locked_at: Set(now_epoch_seconds()),
        };

        match distributed_locks::Entity::insert(entity).exec(&self.db).await {
            Ok(_) => Ok(true),
            // Row already present: the lock is held, not an error
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn is_locked(&self, name: &str) -> anyhow::Result<bool> {
        let count = distributed_locks::Entity::find()
            .filter(distributed_locks::Column::Name.eq(name))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    async fn is_locked_by(&self, name: &str, owner: &str) -> anyhow::Result<bool> {
        let count = distributed_locks::Entity::find()
            .filter(distributed_locks::Column::Name.eq(name))
            .filter(distributed_locks::Column::Owner.eq(owner))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    async fn delete_lock_owned(&self, name: &str, owner: &str) -> anyhow::Result<()> {
        distributed_locks::Entity::delete_many()
            .filter(distributed_locks::Column::Name.eq(name))
            .filter(distributed_locks::Column::Owner.eq(owner))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_lock(&self, name: &str) -> anyhow::Result<()> {
        distributed_locks::Entity::delete_many()
            .filter(distributed_locks::Column::Name.eq(name))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, max_age: Duration) -> anyhow::Result<u64> {
        let cutoff = now_epoch_seconds() - max_age.as_secs() as i64;
        let result = distributed_locks::Entity::delete_many()
            .filter(distributed_locks::Column::LockedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        if result.rows_affected > 0 {
            info!(
                removed = result.rows_affected,
                "expired lock cleanup removed stale locks"
            );
        }
        Ok(result.rows_affected)
    }

    async fn count_all(&self) -> anyhow::Result<u64> {
        let count = distributed_locks::Entity::find().count(&self.db).await?;
        Ok(count)
    }

    async fn delete_all(&self) -> anyhow::Result<u64> {
        let result = distributed_locks::Entity::delete_many()
            .exec(&self.db)
            .await?;
        debug!(removed = result.rows_affected, "deleted all lock rows");
        Ok(result.rows_affected)
    }

    async fn locked_at(&self, name: &str) -> anyhow::Result<Option<i64>> {
        let row = distributed_locks::Entity::find_by_id(name.to_string())
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.locked_at))
    }

    async fn find_all(&self) -> anyhow::Result<Vec<LockRow>> {
        let rows = distributed_locks::Entity::find().all(&self.db).await?;
        Ok(rows.into_iter().map(LockRow::from).collect())
    }
}
