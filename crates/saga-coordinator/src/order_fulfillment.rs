//! The concrete order fulfillment saga: ReserveInventory -> ProcessPayment ->
//! ArrangeShipping -> ConfirmOrder, with inventory released on any downstream
//! failure. This is the saga exercised end-to-end by the platform's two
//! canonical scenarios: every step succeeding, and a payment failure that
//! rolls back the inventory reservation.

use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::{CommandBuilder, SagaDefinition, SagaStepCommand, SagaStepSpec};

pub const ORDER_FULFILLMENT_SAGA: &str = "order_fulfillment";

fn builder(f: impl Fn(&serde_json::Value) -> SagaStepCommand + Send + Sync + 'static) -> CommandBuilder {
    Arc::new(f)
}

/// `context` is expected to carry `{ "order_id", "user_id", "items": [...] }`
/// as seeded by `SagaCoordinator::start_saga`.
pub fn definition() -> SagaDefinition {
    SagaDefinition {
        saga_type: ORDER_FULFILLMENT_SAGA,
        timeout: Duration::from_secs(5 * 60),
        steps: vec![
            SagaStepSpec {
                name: "reserve_inventory",
                forward: builder(|ctx| SagaStepCommand {
                    target: "inventory".to_string(),
                    payload: serde_json::json!({ "command": "ReserveInventory", "items": ctx.get("items") }),
                }),
                compensation: Some(builder(|ctx| SagaStepCommand {
                    target: "inventory".to_string(),
                    payload: serde_json::json!({ "command": "ReleaseInventory", "items": ctx.get("items") }),
                })),
            },
            SagaStepSpec {
                name: "process_payment",
                forward: builder(|ctx| SagaStepCommand {
                    target: "payment".to_string(),
                    payload: serde_json::json!({ "command": "ProcessPayment", "order_id": ctx.get("order_id") }),
                }),
                compensation: Some(builder(|ctx| SagaStepCommand {
                    target: "payment".to_string(),
                    payload: serde_json::json!({ "command": "RefundPayment", "order_id": ctx.get("order_id") }),
                })),
            },
            SagaStepSpec {
                name: "arrange_shipping",
                forward: builder(|ctx| SagaStepCommand {
                    target: "shipping".to_string(),
                    payload: serde_json::json!({ "command": "ArrangeShipping", "order_id": ctx.get("order_id") }),
                }),
                compensation: Some(builder(|ctx| SagaStepCommand {
                    target: "shipping".to_string(),
                    payload: serde_json::json!({ "command": "CancelShipping", "order_id": ctx.get("order_id") }),
                })),
            },
            // `ConfirmOrder`/`CancelOrder` are handled on the order-service side as the
            // two-hop transitions pending->processing->completed and ...->cancelled;
            // the saga itself only needs one command per direction.
            SagaStepSpec {
                name: "confirm_order",
                forward: builder(|ctx| SagaStepCommand {
                    target: "order".to_string(),
                    payload: serde_json::json!({ "command": "ConfirmOrder", "order_id": ctx.get("order_id") }),
                }),
                compensation: Some(builder(|ctx| SagaStepCommand {
                    target: "order".to_string(),
                    payload: serde_json::json!({ "command": "CancelOrder", "order_id": ctx.get("order_id") }),
                })),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_has_four_ordered_steps() {
        let def = definition();
        let names: Vec<_> = def.steps.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["reserve_inventory", "process_payment", "arrange_shipping", "confirm_order"]);
        assert!(def.steps.iter().all(|s| s.compensation.is_some()));
    }
}
