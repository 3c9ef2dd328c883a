//! Per-projection checkpoint: the global_sequence of the last event applied.
//! The monotonicity invariant — a checkpoint never moves backward — is
//! enforced by the engine's caller, not the store itself, since a replay
//! reset legitimately rewinds it to zero.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};

use cqrs_core::CqrsResult;

use crate::schema::projection_checkpoints;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, projection_name: &str) -> CqrsResult<i64>;
    async fn set(&self, projection_name: &str, global_sequence: i64) -> CqrsResult<()>;
    async fn reset(&self, projection_name: &str) -> CqrsResult<()> {
        self.set(projection_name, 0).await
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = projection_checkpoints)]
struct CheckpointRow {
    projection_name: String,
    last_global_sequence: i64,
    updated_at: chrono::DateTime<Utc>,
}

pub struct PostgresCheckpointStore {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl PostgresCheckpointStore {
    pub fn new(pool: Pool<ConnectionManager<PgConnection>>) -> Self {
        Self { pool }
    }
}

/// Upserts the checkpoint row on the caller's connection. Exposed so a
/// read-model projection can write its checkpoint inside the very same
/// `conn.transaction` it uses to apply a batch, instead of going through
/// [`CheckpointStore::set`] on a separate pooled connection — the two writes
/// need to commit or roll back together.
pub(crate) fn upsert_checkpoint(conn: &mut PgConnection, projection_name: &str, global_sequence: i64) -> QueryResult<()> {
    let row = CheckpointRow { projection_name: projection_name.to_string(), last_global_sequence: global_sequence, updated_at: Utc::now() };
    diesel::insert_into(projection_checkpoints::table)
        .values(&row)
        .on_conflict(projection_checkpoints::projection_name)
        .do_update()
        .set((projection_checkpoints::last_global_sequence.eq(global_sequence), projection_checkpoints::updated_at.eq(Utc::now())))
        .execute(conn)?;
    Ok(())
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn get(&self, projection_name: &str) -> CqrsResult<i64> {
        let mut conn = self.pool.get()?;
        let row: Option<CheckpointRow> = projection_checkpoints::table
            .filter(projection_checkpoints::projection_name.eq(projection_name))
            .first(&mut conn)
            .optional()?;
        Ok(row.map(|r| r.last_global_sequence).unwrap_or(0))
    }

    async fn set(&self, projection_name: &str, global_sequence: i64) -> CqrsResult<()> {
        let mut conn = self.pool.get()?;
        upsert_checkpoint(&mut conn, projection_name, global_sequence)?;
        Ok(())
    }
}

/// Test double; also useful for a Query Service running entirely in-memory
/// demos without a database.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: tokio::sync::Mutex<std::collections::HashMap<String, i64>>,
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, projection_name: &str) -> CqrsResult<i64> {
        Ok(*self.checkpoints.lock().await.get(projection_name).unwrap_or(&0))
    }

    async fn set(&self, projection_name: &str, global_sequence: i64) -> CqrsResult<()> {
        self.checkpoints.lock().await.insert(projection_name.to_string(), global_sequence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_projection_starts_at_zero() {
        let store = InMemoryCheckpointStore::default();
        assert_eq!(store.get("products").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_rewinds_to_zero() {
        let store = InMemoryCheckpointStore::default();
        store.set("products", 42).await.unwrap();
        store.reset("products").await.unwrap();
        assert_eq!(store.get("products").await.unwrap(), 0);
    }
}
