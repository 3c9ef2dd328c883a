//! Typed entrypoints the (out-of-scope) API surface calls into: one method
//! per command kind, each resolving the cross-aggregate facts its aggregate
//! cannot see for itself before handing off to the generic `CommandBus`.

use std::sync::Arc;

use uuid::Uuid;

use aggregate_runtime::{
    CategoryCommand, CategoryState, CommandBus, CommandOutcome, MoveTarget, NoPreCheck, OrderCommand, OrderLineItem, OrderState, OrderStatus, ProductCommand, ProductState,
};
use cqrs_core::{CqrsError, CqrsResult};
use event_store::EventMetadata;
use projection_engine::QueryApi;
use saga_coordinator::SagaCoordinator;

use crate::precheck::CategoryPreCheck;

pub struct CommandService {
    pub products: CommandBus<ProductState>,
    pub categories: CommandBus<CategoryState>,
    pub orders: Arc<CommandBus<OrderState>>,
    pub sagas: Arc<SagaCoordinator>,
    queries: Arc<QueryApi>,
    category_pre_check: CategoryPreCheck,
}

impl CommandService {
    pub fn new(products: CommandBus<ProductState>, categories: CommandBus<CategoryState>, orders: Arc<CommandBus<OrderState>>, sagas: Arc<SagaCoordinator>, queries: Arc<QueryApi>) -> Self {
        let category_pre_check = CategoryPreCheck::new(Arc::clone(&queries));
        Self { products, categories, orders, sagas, queries, category_pre_check }
    }

    pub async fn create_product(&self, name: String, price: i64, category_id: Option<Uuid>) -> CqrsResult<CommandOutcome> {
        let id = Uuid::new_v4();
        self.products.dispatch(id, ProductCommand::Create { name, price, category_id }, EventMetadata::new(), &NoPreCheck, None).await
    }

    pub async fn update_product(&self, product_id: Uuid, name: Option<String>, category_id: Option<Uuid>) -> CqrsResult<CommandOutcome> {
        self.products.dispatch(product_id, ProductCommand::Update { name, category_id }, EventMetadata::new(), &NoPreCheck, None).await
    }

    pub async fn change_product_price(&self, product_id: Uuid, new_price: i64) -> CqrsResult<CommandOutcome> {
        self.products.dispatch(product_id, ProductCommand::ChangePrice { new_price }, EventMetadata::new(), &NoPreCheck, None).await
    }

    pub async fn delete_product(&self, product_id: Uuid) -> CqrsResult<CommandOutcome> {
        self.products.dispatch(product_id, ProductCommand::Delete, EventMetadata::new(), &NoPreCheck, None).await
    }

    pub async fn create_category(&self, name: String, parent_id: Option<Uuid>) -> CqrsResult<CommandOutcome> {
        let (parent_path, parent_depth) = match parent_id {
            Some(parent_id) => {
                let parent = self
                    .queries
                    .get_category(parent_id)?
                    .ok_or_else(|| CqrsError::domain("Category", format!("parent category {parent_id} does not exist")))?;
                (Some(parent.path), Some(parent.depth))
            }
            None => (None, None),
        };

        let id = Uuid::new_v4();
        self.categories
            .dispatch(id, CategoryCommand::Create { name, parent_id, parent_path, parent_depth }, EventMetadata::new(), &self.category_pre_check, None)
            .await
    }

    pub async fn rename_category(&self, category_id: Uuid, name: String) -> CqrsResult<CommandOutcome> {
        self.categories
            .dispatch(category_id, CategoryCommand::Update { name: Some(name), move_to: None }, EventMetadata::new(), &self.category_pre_check, None)
            .await
    }

    pub async fn move_category(&self, category_id: Uuid, new_parent_id: Option<Uuid>) -> CqrsResult<CommandOutcome> {
        let move_to = match new_parent_id {
            Some(new_parent_id) => {
                let new_parent = self
                    .queries
                    .get_category(new_parent_id)?
                    .ok_or_else(|| CqrsError::domain("Category", format!("target parent category {new_parent_id} does not exist")))?;
                let is_descendant = new_parent.id == category_id || new_parent.path.starts_with(&format!("{category_id}/"));
                MoveTarget {
                    parent_id: Some(new_parent_id),
                    parent_path: Some(new_parent.path),
                    parent_depth: Some(new_parent.depth),
                    is_descendant,
                }
            }
            None => MoveTarget { parent_id: None, parent_path: None, parent_depth: None, is_descendant: false },
        };

        self.categories
            .dispatch(category_id, CategoryCommand::Update { name: None, move_to: Some(move_to) }, EventMetadata::new(), &self.category_pre_check, None)
            .await
    }

    pub async fn delete_category(&self, category_id: Uuid) -> CqrsResult<CommandOutcome> {
        let has_children = self.queries.has_children(category_id)?;
        let has_products = self.queries.has_products(category_id)?;
        self.categories
            .dispatch(category_id, CategoryCommand::Delete { has_children, has_products }, EventMetadata::new(), &self.category_pre_check, None)
            .await
    }

    pub async fn create_order(&self, user_id: Uuid, items: Vec<OrderLineItem>) -> CqrsResult<CommandOutcome> {
        let id = Uuid::new_v4();
        self.orders.dispatch(id, OrderCommand::Create { user_id, items }, EventMetadata::new(), &NoPreCheck, None).await
    }

    pub async fn add_order_item(&self, order_id: Uuid, item: OrderLineItem) -> CqrsResult<CommandOutcome> {
        self.orders.dispatch(order_id, OrderCommand::AddItem(item), EventMetadata::new(), &NoPreCheck, None).await
    }

    pub async fn remove_order_item(&self, order_id: Uuid, product_id: Uuid) -> CqrsResult<CommandOutcome> {
        self.orders.dispatch(order_id, OrderCommand::RemoveItem { product_id }, EventMetadata::new(), &NoPreCheck, None).await
    }

    pub async fn transition_order(&self, order_id: Uuid, to: OrderStatus) -> CqrsResult<CommandOutcome> {
        self.orders.dispatch(order_id, OrderCommand::TransitionTo(to), EventMetadata::new(), &NoPreCheck, None).await
    }

    /// Kicks off the order fulfillment saga once an order has been created;
    /// the saga itself drives inventory/payment/shipping and the order's own
    /// processing -> completed (or cancelled) transition.
    pub async fn start_order_fulfillment(&self, order_id: Uuid, user_id: Uuid, items: &[OrderLineItem]) -> CqrsResult<Uuid> {
        let context = serde_json::json!({
            "order_id": order_id,
            "user_id": user_id,
            "items": items,
        });
        self.sagas.start_saga(saga_coordinator::order_fulfillment::ORDER_FULFILLMENT_SAGA, context).await
    }
}
