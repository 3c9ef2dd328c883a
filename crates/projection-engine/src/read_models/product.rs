//! Product read model. Owns `product_read_models` only — a category's
//! product count is derived at query time from this table (see
//! `QueryApi::get_category`/`category_tree`) rather than accumulated here,
//! so there is no cross-projection write to keep idempotent or ordered
//! against `category_read_models`.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use uuid::Uuid;

use aggregate_runtime::ProductEvent;
use cqrs_core::{CqrsError, CqrsResult};
use event_store::EventEnvelope;

use crate::checkpoint::{upsert_checkpoint, CheckpointStore};
use crate::projection::Projection;
use crate::schema::product_read_models;

#[derive(Queryable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = product_read_models)]
struct ProductRow {
    id: Uuid,
    name: String,
    price: i64,
    category_id: Option<Uuid>,
    deleted: bool,
    updated_at: chrono::DateTime<Utc>,
}

pub struct ProductReadModelProjection {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl ProductReadModelProjection {
    pub fn new(pool: Pool<ConnectionManager<PgConnection>>) -> Self {
        Self { pool }
    }

    fn apply_one(conn: &mut PgConnection, event: &EventEnvelope) -> Result<(), CqrsError> {
        let product_id = event.stream_id;

        match event.event_type.as_str() {
            "ProductCreated" => {
                if let ProductEvent::ProductCreated { name, price, category_id } = serde_json::from_value(event.payload.clone())? {
                    diesel::insert_into(product_read_models::table)
                        .values(&ProductRow { id: product_id, name, price, category_id, deleted: false, updated_at: event.committed_at })
                        .on_conflict(product_read_models::id)
                        .do_nothing()
                        .execute(conn)?;
                }
            }
            "ProductUpdated" => {
                if let ProductEvent::ProductUpdated { name, category_id } = serde_json::from_value(event.payload.clone())? {
                    if let Some(name) = &name {
                        diesel::update(product_read_models::table.find(product_id))
                            .set(product_read_models::name.eq(name.clone()))
                            .execute(conn)?;
                    }
                    if let Some(category_id) = category_id {
                        diesel::update(product_read_models::table.find(product_id))
                            .set(product_read_models::category_id.eq(category_id))
                            .execute(conn)?;
                    }
                    diesel::update(product_read_models::table.find(product_id))
                        .set(product_read_models::updated_at.eq(event.committed_at))
                        .execute(conn)?;
                }
            }
            "ProductPriceChanged" => {
                if let ProductEvent::ProductPriceChanged { new_price, .. } = serde_json::from_value(event.payload.clone())? {
                    diesel::update(product_read_models::table.find(product_id))
                        .set((product_read_models::price.eq(new_price), product_read_models::updated_at.eq(event.committed_at)))
                        .execute(conn)?;
                }
            }
            "ProductDeleted" => {
                diesel::update(product_read_models::table.find(product_id))
                    .set((product_read_models::deleted.eq(true), product_read_models::updated_at.eq(event.committed_at)))
                    .execute(conn)?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Projection for ProductReadModelProjection {
    fn name(&self) -> &str {
        "product_read_models"
    }

    fn event_types(&self) -> &[&'static str] {
        &["ProductCreated", "ProductUpdated", "ProductPriceChanged", "ProductDeleted"]
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
        diesel::delete(product_read_models::table).execute(&mut conn)?;
        Ok(())
    }
}
