//! Long-running saga orchestration: forward steps dispatched through the
//! command bus, compensation on failure, timeout-driven compensation, and
//! recovery by replaying each saga's own event log on restart.

pub mod coordinator;
pub mod order_fulfillment;
pub mod saga;

pub use coordinator::{CommandBuilder, SagaCommandDispatcher, SagaCoordinator, SagaDefinition, SagaStepCommand, SagaStepSpec};
pub use saga::{SagaAggregateState, SagaCommand, SagaError, SagaEvent, SagaMachineState, StepRecord, StepStatus};
