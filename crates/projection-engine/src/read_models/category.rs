//! Category read model: `category_read_models`, including the materialized
//! `path`/`depth` columns that make hierarchy queries O(1) instead of a
//! recursive CTE per request. Product counts are not stored here — see
//! `super::product` and `QueryApi` for why.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use uuid::Uuid;

use aggregate_runtime::CategoryEvent;
use cqrs_core::{CqrsError, CqrsResult};
use event_store::EventEnvelope;

use crate::checkpoint::{upsert_checkpoint, CheckpointStore};
use crate::projection::Projection;
use crate::schema::category_read_models;

#[derive(Queryable, Identifiable, Insertable)]
#[diesel(table_name = category_read_models)]
struct CategoryRow {
    id: Uuid,
    name: String,
    parent_id: Option<Uuid>,
    path: String,
    depth: i32,
    deleted: bool,
    updated_at: chrono::DateTime<Utc>,
}

pub struct CategoryReadModelProjection {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl CategoryReadModelProjection {
    pub fn new(pool: Pool<ConnectionManager<PgConnection>>) -> Self {
        Self { pool }
    }

    fn apply_one(conn: &mut PgConnection, event: &EventEnvelope) -> Result<(), CqrsError> {
        let category_id = event.stream_id;

        match event.event_type.as_str() {
            "CategoryCreated" => {
                if let CategoryEvent::CategoryCreated { name, parent_id, path, depth } = serde_json::from_value(event.payload.clone())? {
                    diesel::insert_into(category_read_models::table)
                        .values(&CategoryRow { id: category_id, name, parent_id, path, depth, deleted: false, updated_at: event.committed_at })
                        .on_conflict(category_read_models::id)
                        .do_nothing()
                        .execute(conn)?;
                }
            }
            "CategoryUpdated" => {
                if let CategoryEvent::CategoryUpdated { name } = serde_json::from_value(event.payload.clone())? {
                    diesel::update(category_read_models::table.find(category_id))
                        .set((category_read_models::name.eq(name), category_read_models::updated_at.eq(event.committed_at)))
                        .execute(conn)?;
                }
            }
            "CategoryMoved" => {
                if let CategoryEvent::CategoryMoved { parent_id, path, depth } = serde_json::from_value(event.payload.clone())? {
                    diesel::update(category_read_models::table.find(category_id))
                        .set((
                            category_read_models::parent_id.eq(parent_id),
                            category_read_models::path.eq(path),
                            category_read_models::depth.eq(depth),
                            category_read_models::updated_at.eq(event.committed_at),
                        ))
                        .execute(conn)?;
                }
            }
            "CategoryDeleted" => {
                diesel::update(category_read_models::table.find(category_id))
                    .set((category_read_models::deleted.eq(true), category_read_models::updated_at.eq(event.committed_at)))
                    .execute(conn)?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Projection for CategoryReadModelProjection {
    fn name(&self) -> &str {
        "category_read_models"
    }

    fn event_types(&self) -> &[&'static str] {
        &["CategoryCreated", "CategoryUpdated", "CategoryMoved", "CategoryDeleted"]
    }

    async fn apply_event(&self, event: &EventEnvelope) -> CqrsResult<()> {
        let mut conn = self.pool.get()?;
        conn.transaction::<(), CqrsError, _>(|conn| Self::apply_one(conn, event))?;
        Ok(())
    }

    async fn apply_batch(&self, events: &[EventEnvelope], new_checkpoint: i64, _checkpoints: &dyn CheckpointStore) -> CqrsResult<()> {
        let mut conn = self.pool.get()?;
        conn.transaction::<(), CqrsError, _>(|conn| {
            for event in events {
                if self.should_handle(event) {
                    Self::apply_one(conn, event)?;
                }
            }
            upsert_checkpoint(conn, self.name(), new_checkpoint)?;
            Ok(())
        })?;
        Ok(())
    }

    async fn reset(&self) -> CqrsResult<()> {
        let mut conn = self.pool.get()?;
        diesel::delete(category_read_models::table).execute(&mut conn)?;
        Ok(())
    }
}
