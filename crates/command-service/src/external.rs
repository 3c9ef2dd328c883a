//! Outbound collaborators the order fulfillment saga calls into: inventory,
//! payment, and shipping. Their real implementations are out of scope here —
//! they live behind an RPC boundary owned by other services — but the
//! resilient-call wrapper around them (timeout, retry, circuit breaker) is
//! very much in scope, so the stub below is still routed through
//! [`cqrs_core::ResilientClient`] rather than called directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use aggregate_runtime::{CommandBus, NoPreCheck, OrderCommand, OrderState, OrderStatus};
use cqrs_core::{CallMetadata, CircuitBreakerConfig, CqrsError, CqrsResult, ResilientClient, RetryPolicy};
use event_store::EventMetadata;
use saga_coordinator::{SagaCommandDispatcher, SagaStepCommand};

/// One of the three out-of-scope external collaborators the saga coordinates
/// with. A real deployment replaces this with an RPC client; this one
/// answers every request with a domain-level "it worked", which is enough
/// to exercise the full saga drive loop end to end.
#[async_trait]
pub trait ExternalCollaborator: Send + Sync {
    async fn call(&self, command: &str, payload: &serde_json::Value) -> CqrsResult<serde_json::Value>;
}

pub struct AlwaysSucceedsCollaborator;

#[async_trait]
impl ExternalCollaborator for AlwaysSucceedsCollaborator {
    async fn call(&self, command: &str, payload: &serde_json::Value) -> CqrsResult<serde_json::Value> {
        let _ = payload;
        Ok(serde_json::json!({ "command": command, "result": "ok" }))
    }
}

/// Routes a saga step's [`SagaStepCommand`] to the right place: the three
/// external collaborators behind a resilient client, or this service's own
/// Order command bus for the `order` target.
pub struct CommandServiceDispatcher {
    inventory: Arc<dyn ExternalCollaborator>,
    payment: Arc<dyn ExternalCollaborator>,
    shipping: Arc<dyn ExternalCollaborator>,
    resilient_client: ResilientClient,
    order_bus: Arc<CommandBus<OrderState>>,
}

impl CommandServiceDispatcher {
    pub fn new(
        inventory: Arc<dyn ExternalCollaborator>,
        payment: Arc<dyn ExternalCollaborator>,
        shipping: Arc<dyn ExternalCollaborator>,
        order_bus: Arc<CommandBus<OrderState>>,
    ) -> Self {
        Self {
            inventory,
            payment,
            shipping,
            order_bus,
            resilient_client: ResilientClient::new(CircuitBreakerConfig::default(), RetryPolicy::default(), Duration::from_secs(10)),
        }
    }

    async fn call_collaborator(&self, endpoint: &str, collaborator: &Arc<dyn ExternalCollaborator>, command: &SagaStepCommand) -> CqrsResult<serde_json::Value> {
        let command_name = command.payload.get("command").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let payload = command.payload.clone();
        self.resilient_client
            .call(endpoint, CallMetadata { operation: command_name.clone(), ids: Vec::new() }, || {
                let collaborator = Arc::clone(collaborator);
                let command_name = command_name.clone();
                let payload = payload.clone();
                async move { collaborator.call(&command_name, &payload).await }
            })
            .await
    }

    async fn dispatch_order_command(&self, command: &SagaStepCommand) -> CqrsResult<serde_json::Value> {
        let command_name = command.payload.get("command").and_then(|v| v.as_str()).unwrap_or_default();
        let order_id = command
            .payload
            .get("order_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| CqrsError::Validation { message: "saga order command missing a valid order_id".to_string() })?;

        // ConfirmOrder/CancelOrder are opaque at the saga boundary; the order
        // aggregate itself only understands single-hop status transitions.
        let transitions: &[OrderStatus] = match command_name {
            "ConfirmOrder" => &[OrderStatus::Processing, OrderStatus::Completed],
            "CancelOrder" => &[OrderStatus::Cancelled],
            other => return Err(CqrsError::Validation { message: format!("unknown order saga command '{other}'") }),
        };

        for &status in transitions {
            self.order_bus
                .dispatch(order_id, OrderCommand::TransitionTo(status), EventMetadata::new(), &NoPreCheck, None)
                .await?;
        }

        Ok(serde_json::json!({ "order_id": order_id, "command": command_name }))
    }
}

#[async_trait]
impl SagaCommandDispatcher for CommandServiceDispatcher {
    async fn dispatch(&self, command: &SagaStepCommand) -> CqrsResult<serde_json::Value> {
        match command.target.as_str() {
            "inventory" => self.call_collaborator("inventory", &self.inventory, command).await,
            "payment" => self.call_collaborator("payment", &self.payment, command).await,
            "shipping" => self.call_collaborator("shipping", &self.shipping, command).await,
            "order" => self.dispatch_order_command(command).await,
            other => Err(CqrsError::Configuration { message: format!("no dispatch route for saga target '{other}'") }),
        }
    }
}
