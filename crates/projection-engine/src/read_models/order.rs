//! Order read model: `order_read_models`. `items` is stored as `Json` rather
//! than a join table — the Query Service only ever reads an order's lines
//! alongside the order itself, never queries across them.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use uuid::Uuid;

use aggregate_runtime::{OrderEvent, OrderLineItem, OrderStatus, OrderTotals};
use cqrs_core::{CqrsError, CqrsResult};
use event_store::EventEnvelope;

use crate::checkpoint::{upsert_checkpoint, CheckpointStore};
use crate::projection::Projection;
use crate::schema::order_read_models;

#[derive(Queryable, Identifiable, Insertable)]
#[diesel(table_name = order_read_models)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    subtotal: i64,
    tax: i64,
    shipping: i64,
    total: i64,
    items: serde_json::Value,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "Pending",
        OrderStatus::PaymentPending => "PaymentPending",
        OrderStatus::PaymentFailed => "PaymentFailed",
        OrderStatus::Processing => "Processing",
        OrderStatus::Shipped => "Shipped",
        OrderStatus::Delivered => "Delivered",
        OrderStatus::Completed => "Completed",
        OrderStatus::Cancelled => "Cancelled",
        OrderStatus::Returned => "Returned",
        OrderStatus::Refunded => "Refunded",
    }
}

fn items_json(items: &[OrderLineItem]) -> serde_json::Value {
    serde_json::to_value(items).expect("order line items always serialize")
}

pub struct OrderReadModelProjection {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl OrderReadModelProjection {
    pub fn new(pool: Pool<ConnectionManager<PgConnection>>) -> Self {
        Self { pool }
    }

    fn set_totals(conn: &mut PgConnection, order_id: Uuid, totals: OrderTotals, items: &[OrderLineItem], committed_at: chrono::DateTime<Utc>) -> QueryResult<()> {
        diesel::update(order_read_models::table.find(order_id))
            .set((
                order_read_models::subtotal.eq(totals.subtotal),
                order_read_models::tax.eq(totals.tax),
                order_read_models::shipping.eq(totals.shipping),
                order_read_models::total.eq(totals.total),
                order_read_models::items.eq(items_json(items)),
                order_read_models::updated_at.eq(committed_at),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn apply_one(conn: &mut PgConnection, event: &EventEnvelope) -> Result<(), CqrsError> {
        let order_id = event.stream_id;

        match event.event_type.as_str() {
            "OrderCreated" => {
                if let OrderEvent::OrderCreated { user_id, items, totals } = serde_json::from_value(event.payload.clone())? {
                    diesel::insert_into(order_read_models::table)
                        .values(&OrderRow {
                            id: order_id,
                            user_id,
                            status: status_label(OrderStatus::Pending).to_string(),
                            subtotal: totals.subtotal,
                            tax: totals.tax,
                            shipping: totals.shipping,
                            total: totals.total,
                            items: items_json(&items),
                            created_at: event.committed_at,
                            updated_at: event.committed_at,
                        })
                        .on_conflict(order_read_models::id)
                        .do_nothing()
                        .execute(conn)?;
                }
            }
            "OrderItemAdded" => {
                if let OrderEvent::OrderItemAdded { item, totals } = serde_json::from_value(event.payload.clone())? {
                    let mut items = current_items(conn, order_id)?;
                    items.push(item);
                    Self::set_totals(conn, order_id, totals, &items, event.committed_at)?;
                }
            }
            "OrderItemRemoved" => {
                if let OrderEvent::OrderItemRemoved { product_id, totals } = serde_json::from_value(event.payload.clone())? {
                    let mut items = current_items(conn, order_id)?;
                    items.retain(|i| i.product_id != product_id);
                    Self::set_totals(conn, order_id, totals, &items, event.committed_at)?;
                }
            }
            "OrderStatusChanged" => {
                if let OrderEvent::OrderStatusChanged { to, .. } = serde_json::from_value(event.payload.clone())? {
                    diesel::update(order_read_models::table.find(order_id))
                        .set((order_read_models::status.eq(status_label(to)), order_read_models::updated_at.eq(event.committed_at)))
                        .execute(conn)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Projection for OrderReadModelProjection {
    fn name(&self) -> &str {
        "order_read_models"
    }

    fn event_types(&self) -> &[&'static str] {
        &["OrderCreated", "OrderItemAdded", "OrderItemRemoved", "OrderStatusChanged"]
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
        diesel::delete(order_read_models::table).execute(&mut conn)?;
        Ok(())
    }
}

fn current_items(conn: &mut PgConnection, order_id: Uuid) -> QueryResult<Vec<OrderLineItem>> {
    let row: OrderRow = order_read_models::table.find(order_id).first(conn)?;
    Ok(serde_json::from_value(row.items).unwrap_or_default())
}
