//! Order aggregate: a fixed status adjacency table plus totals recomputed on
//! every item change. Tax and shipping constants below are an explicit design
//! decision (Open Question in spec terms) where the source spec names the
//! rates but not a home for the constants; they live here, next to the only
//! code that uses them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};

/// 10% of subtotal, in integer cents (truncating any fractional cent).
const TAX_RATE_NUM: i64 = 10;
const TAX_RATE_DEN: i64 = 100;
/// Orders below this subtotal (cents) are charged flat shipping; at or above, shipping is free.
const FREE_SHIPPING_THRESHOLD: i64 = 5000;
const FLAT_SHIPPING_FEE: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PaymentPending,
    PaymentFailed,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Returned,
    Refunded,
}

/// `None` means "absent" — no order has been created for this id yet.
pub type OrderAggregateStatus = Option<OrderStatus>;

fn allowed_transitions() -> HashMap<OrderStatus, HashSet<OrderStatus>> {
    use OrderStatus::*;
    HashMap::from([
        (Pending, HashSet::from([PaymentPending, Processing, Cancelled])),
        (PaymentPending, HashSet::from([Processing, PaymentFailed, Cancelled])),
        (PaymentFailed, HashSet::from([PaymentPending, Cancelled])),
        (Processing, HashSet::from([Shipped, Completed, Cancelled])),
        (Shipped, HashSet::from([Delivered])),
        (Delivered, HashSet::from([Completed, Returned])),
        (Completed, HashSet::from([Returned])),
        (Cancelled, HashSet::new()),
        (Returned, HashSet::from([Refunded])),
        (Refunded, HashSet::new()),
    ])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_id: Uuid,
    pub quantity: i64,
    pub unit_price: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
}

impl OrderTotals {
    fn compute(items: &[OrderLineItem]) -> Self {
        let subtotal: i64 = items.iter().map(|i| i.quantity * i.unit_price).sum();
        let tax = subtotal * TAX_RATE_NUM / TAX_RATE_DEN;
        let shipping = if subtotal < FREE_SHIPPING_THRESHOLD { FLAT_SHIPPING_FEE } else { 0 };
        Self { subtotal, tax, shipping, total: subtotal + tax + shipping }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderState {
    pub id: Uuid,
    pub version: i64,
    pub status: OrderAggregateStatus,
    pub user_id: Option<Uuid>,
    pub items: Vec<OrderLineItem>,
    pub totals: OrderTotals,
}

#[derive(Debug, Clone)]
pub enum OrderCommand {
    Create { user_id: Uuid, items: Vec<OrderLineItem> },
    AddItem(OrderLineItem),
    RemoveItem { product_id: Uuid },
    TransitionTo(OrderStatus),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated { user_id: Uuid, items: Vec<OrderLineItem>, totals: OrderTotals },
    OrderItemAdded { item: OrderLineItem, totals: OrderTotals },
    OrderItemRemoved { product_id: Uuid, totals: OrderTotals },
    OrderStatusChanged { from: OrderStatus, to: OrderStatus },
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "OrderCreated",
            OrderEvent::OrderItemAdded { .. } => "OrderItemAdded",
            OrderEvent::OrderItemRemoved { .. } => "OrderItemRemoved",
            OrderEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrderError {
    #[error("order {0} already exists")]
    AlreadyExists(Uuid),
    #[error("order {0} does not exist")]
    NotFound(Uuid),
    #[error("order must contain at least one item")]
    EmptyOrder,
    #[error("items can only be changed while the order is pending, current status is {0:?}")]
    NotEditable(OrderStatus),
    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },
}

impl Aggregate for OrderState {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn empty(id: Uuid) -> Self {
        Self { id, version: 0, status: None, user_id: None, items: Vec::new(), totals: OrderTotals::default() }
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn execute(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match (self.status, command) {
            (None, OrderCommand::Create { user_id, items }) => {
                if items.is_empty() {
                    return Err(OrderError::EmptyOrder);
                }
                let totals = OrderTotals::compute(items);
                Ok(vec![OrderEvent::OrderCreated { user_id: *user_id, items: items.clone(), totals }])
            }
            (Some(_), OrderCommand::Create { .. }) => Err(OrderError::AlreadyExists(self.id)),
            (None, _) => Err(OrderError::NotFound(self.id)),

            (Some(OrderStatus::Pending), OrderCommand::AddItem(item)) => {
                let mut items = self.items.clone();
                items.push(item.clone());
                let totals = OrderTotals::compute(&items);
                Ok(vec![OrderEvent::OrderItemAdded { item: item.clone(), totals }])
            }
            (Some(status), OrderCommand::AddItem(_)) => Err(OrderError::NotEditable(status)),

            (Some(OrderStatus::Pending), OrderCommand::RemoveItem { product_id }) => {
                let items: Vec<_> = self.items.iter().filter(|i| i.product_id != *product_id).cloned().collect();
                let totals = OrderTotals::compute(&items);
                Ok(vec![OrderEvent::OrderItemRemoved { product_id: *product_id, totals }])
            }
            (Some(status), OrderCommand::RemoveItem { .. }) => Err(OrderError::NotEditable(status)),

            (Some(from), OrderCommand::TransitionTo(to)) => {
                let table = allowed_transitions();
                if table.get(&from).is_some_and(|targets| targets.contains(to)) {
                    Ok(vec![OrderEvent::OrderStatusChanged { from, to: *to }])
                } else {
                    Err(OrderError::InvalidStatusTransition { from, to: *to })
                }
            }
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated { user_id, items, totals } => {
                self.status = Some(OrderStatus::Pending);
                self.user_id = Some(*user_id);
                self.items = items.clone();
                self.totals = *totals;
            }
            OrderEvent::OrderItemAdded { item, totals } => {
                self.items.push(item.clone());
                self.totals = *totals;
            }
            OrderEvent::OrderItemRemoved { product_id, totals } => {
                self.items.retain(|i| i.product_id != *product_id);
                self.totals = *totals;
            }
            OrderEvent::OrderStatusChanged { to, .. } => {
                self.status = Some(*to);
            }
        }
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: i64, qty: i64) -> OrderLineItem {
        OrderLineItem { product_id: Uuid::new_v4(), quantity: qty, unit_price: price }
    }

    #[test]
    fn totals_below_threshold_charge_flat_shipping() {
        let totals = OrderTotals::compute(&[item(1000, 2)]);
        assert_eq!(totals.subtotal, 2000);
        assert_eq!(totals.tax, 200);
        assert_eq!(totals.shipping, 500);
        assert_eq!(totals.total, 2700);
    }

    #[test]
    fn totals_at_threshold_waive_shipping() {
        let totals = OrderTotals::compute(&[item(5000, 1)]);
        assert_eq!(totals.shipping, 0);
        assert_eq!(totals.total, 5500);
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut order = OrderState::empty(Uuid::new_v4());
        for e in order.execute(&OrderCommand::Create { user_id: Uuid::new_v4(), items: vec![item(1000, 1)] }).unwrap() {
            order.apply(&e);
        }
        for e in order.execute(&OrderCommand::TransitionTo(OrderStatus::Processing)).unwrap() {
            order.apply(&e);
        }
        for e in order.execute(&OrderCommand::TransitionTo(OrderStatus::Completed)).unwrap() {
            order.apply(&e);
        }
        assert!(matches!(order.status, Some(OrderStatus::Completed)));
        assert_eq!(order.version, 3);
    }

    #[test]
    fn unlisted_transition_is_rejected() {
        let mut order = OrderState::empty(Uuid::new_v4());
        for e in order.execute(&OrderCommand::Create { user_id: Uuid::new_v4(), items: vec![item(1000, 1)] }).unwrap() {
            order.apply(&e);
        }
        let result = order.execute(&OrderCommand::TransitionTo(OrderStatus::Delivered));
        assert!(matches!(result, Err(OrderError::InvalidStatusTransition { .. })));
    }

    #[test]
    fn items_cannot_change_once_processing() {
        let mut order = OrderState::empty(Uuid::new_v4());
        for e in order.execute(&OrderCommand::Create { user_id: Uuid::new_v4(), items: vec![item(1000, 1)] }).unwrap() {
            order.apply(&e);
        }
        for e in order.execute(&OrderCommand::TransitionTo(OrderStatus::Processing)).unwrap() {
            order.apply(&e);
        }
        let result = order.execute(&OrderCommand::AddItem(item(500, 1)));
        assert!(matches!(result, Err(OrderError::NotEditable(OrderStatus::Processing))));
    }

    #[test]
    fn empty_order_is_rejected() {
        let order = OrderState::empty(Uuid::new_v4());
        let result = order.execute(&OrderCommand::Create { user_id: Uuid::new_v4(), items: vec![] });
        assert!(matches!(result, Err(OrderError::EmptyOrder)));
    }
}
