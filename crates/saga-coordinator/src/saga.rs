//! The saga's own aggregate: a six-state machine persisted through the same
//! `Aggregate`/`AggregateRepository` contract the domain aggregates use, with
//! its event log recorded under stream id `saga_id` like any other aggregate.
//!
//! `started` is the instant `SagaStarted` is recorded; there is no further
//! event separating it from `running`, so `apply` folds a `SagaStarted`
//! straight into the `Running` state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aggregate_runtime::{Aggregate, DomainEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaMachineState {
    Started,
    Running,
    Compensating,
    Completed,
    Failed,
    Compensated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Completed,
    Compensating,
    Compensated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
}

/// `None` means "absent" — no saga has been started for this id yet.
pub type SagaLifecycle = Option<SagaMachineState>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaAggregateState {
    pub id: Uuid,
    pub version: i64,
    pub state: SagaLifecycle,
    pub saga_type: String,
    pub steps: Vec<StepRecord>,
    pub position: usize,
    pub context: serde_json::Value,
    pub error: Option<String>,
}

impl SagaAggregateState {
    /// Name of the step currently awaiting completion, if the saga is running.
    pub fn current_step(&self) -> Option<&str> {
        self.steps.get(self.position).map(|s| s.name.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, Some(SagaMachineState::Completed) | Some(SagaMachineState::Failed) | Some(SagaMachineState::Compensated))
    }
}

#[derive(Debug, Clone)]
pub enum SagaCommand {
    Start { saga_type: String, step_names: Vec<String>, context: serde_json::Value },
    RecordStepCompleted { step_name: String, output: serde_json::Value },
    BeginCompensation { failed_step: String, error: String },
    RecordCompensationStep { step_name: String },
    RecordCompensated,
    RecordFailed { error: String },
    RecordCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SagaEvent {
    SagaStarted { saga_type: String, step_names: Vec<String>, context: serde_json::Value },
    SagaStepCompleted { step_name: String, output: serde_json::Value },
    SagaCompensationStarted { failed_step: String, error: String },
    SagaCompensationStepCompleted { step_name: String },
    SagaCompensated,
    SagaFailed { error: String },
    SagaCompleted,
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted { .. } => "SagaStarted",
            SagaEvent::SagaStepCompleted { .. } => "SagaStepCompleted",
            SagaEvent::SagaCompensationStarted { .. } => "SagaCompensationStarted",
            SagaEvent::SagaCompensationStepCompleted { .. } => "SagaCompensationStepCompleted",
            SagaEvent::SagaCompensated => "SagaCompensated",
            SagaEvent::SagaFailed { .. } => "SagaFailed",
            SagaEvent::SagaCompleted => "SagaCompleted",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SagaError {
    #[error("saga {0} already started")]
    AlreadyStarted(Uuid),
    #[error("saga {0} has not been started")]
    NotStarted(Uuid),
    #[error("saga {0} is already in a terminal state")]
    Terminal(Uuid),
    #[error("step '{expected}' is awaited but '{got}' was reported")]
    StepMismatch { expected: String, got: String },
    #[error("saga {0} is not currently compensating")]
    NotCompensating(Uuid),
}

impl Aggregate for SagaAggregateState {
    type Command = SagaCommand;
    type Event = SagaEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        "Saga"
    }

    fn empty(id: Uuid) -> Self {
        Self { id, version: 0, state: None, saga_type: String::new(), steps: Vec::new(), position: 0, context: serde_json::Value::Null, error: None }
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn execute(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match self.state {
            None => match command {
                SagaCommand::Start { saga_type, step_names, context } => Ok(vec![SagaEvent::SagaStarted {
                    saga_type: saga_type.clone(),
                    step_names: step_names.clone(),
                    context: context.clone(),
                }]),
                _ => Err(SagaError::NotStarted(self.id)),
            },
            Some(SagaMachineState::Running) => match command {
                SagaCommand::Start { .. } => Err(SagaError::AlreadyStarted(self.id)),
                SagaCommand::RecordStepCompleted { step_name, output } => match self.current_step() {
                    Some(expected) if expected == step_name => {
                        let mut events = vec![SagaEvent::SagaStepCompleted { step_name: step_name.clone(), output: output.clone() }];
                        if self.position + 1 == self.steps.len() {
                            events.push(SagaEvent::SagaCompleted);
                        }
                        Ok(events)
                    }
                    Some(expected) => Err(SagaError::StepMismatch { expected: expected.to_string(), got: step_name.clone() }),
                    None => Err(SagaError::Terminal(self.id)),
                },
                SagaCommand::BeginCompensation { failed_step, error } => {
                    Ok(vec![SagaEvent::SagaCompensationStarted { failed_step: failed_step.clone(), error: error.clone() }])
                }
                SagaCommand::RecordCompleted if self.position >= self.steps.len() => Ok(vec![SagaEvent::SagaCompleted]),
                _ => Err(SagaError::NotCompensating(self.id)),
            },
            Some(SagaMachineState::Compensating) => match command {
                SagaCommand::Start { .. } => Err(SagaError::AlreadyStarted(self.id)),
                SagaCommand::RecordCompensationStep { step_name } => {
                    Ok(vec![SagaEvent::SagaCompensationStepCompleted { step_name: step_name.clone() }])
                }
                SagaCommand::RecordCompensated => Ok(vec![SagaEvent::SagaCompensated]),
                SagaCommand::RecordFailed { error } => Ok(vec![SagaEvent::SagaFailed { error: error.clone() }]),
                _ => Err(SagaError::NotCompensating(self.id)),
            },
            Some(SagaMachineState::Started)
            | Some(SagaMachineState::Completed)
            | Some(SagaMachineState::Failed)
            | Some(SagaMachineState::Compensated) => match command {
                SagaCommand::Start { .. } => Err(SagaError::AlreadyStarted(self.id)),
                _ => Err(SagaError::Terminal(self.id)),
            },
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SagaEvent::SagaStarted { saga_type, step_names, context } => {
                self.state = Some(SagaMachineState::Running);
                self.saga_type = saga_type.clone();
                self.steps = step_names.iter().map(|name| StepRecord { name: name.clone(), status: StepStatus::Pending, output: None }).collect();
                self.position = 0;
                self.context = context.clone();
            }
            SagaEvent::SagaStepCompleted { step_name, output } => {
                if let Some(step) = self.steps.iter_mut().find(|s| &s.name == step_name) {
                    step.status = StepStatus::Completed;
                    step.output = Some(output.clone());
                }
                self.position += 1;
            }
            SagaEvent::SagaCompensationStarted { failed_step, error } => {
                self.state = Some(SagaMachineState::Compensating);
                self.error = Some(error.clone());
                let _ = failed_step;
            }
            SagaEvent::SagaCompensationStepCompleted { step_name } => {
                if let Some(step) = self.steps.iter_mut().find(|s| &s.name == step_name) {
                    step.status = StepStatus::Compensated;
                }
            }
            SagaEvent::SagaCompensated => {
                self.state = Some(SagaMachineState::Compensated);
            }
            SagaEvent::SagaFailed { error } => {
                self.state = Some(SagaMachineState::Failed);
                self.error = Some(error.clone());
            }
            SagaEvent::SagaCompleted => {
                self.state = Some(SagaMachineState::Completed);
            }
        }
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(step_names: &[&str]) -> SagaAggregateState {
        let mut saga = SagaAggregateState::empty(Uuid::new_v4());
        let events = saga
            .execute(&SagaCommand::Start {
                saga_type: "order_fulfillment".into(),
                step_names: step_names.iter().map(|s| s.to_string()).collect(),
                context: serde_json::json!({}),
            })
            .unwrap();
        for e in events {
            saga.apply(&e);
        }
        saga
    }

    #[test]
    fn all_steps_completing_in_order_reaches_completed() {
        let mut saga = started(&["reserve", "pay"]);
        for e in saga.execute(&SagaCommand::RecordStepCompleted { step_name: "reserve".into(), output: serde_json::json!({}) }).unwrap() {
            saga.apply(&e);
        }
        assert_eq!(saga.state, Some(SagaMachineState::Running));

        for e in saga.execute(&SagaCommand::RecordStepCompleted { step_name: "pay".into(), output: serde_json::json!({}) }).unwrap() {
            saga.apply(&e);
        }
        assert_eq!(saga.state, Some(SagaMachineState::Completed));
    }

    #[test]
    fn out_of_order_step_completion_is_rejected() {
        let saga = started(&["reserve", "pay"]);
        let result = saga.execute(&SagaCommand::RecordStepCompleted { step_name: "pay".into(), output: serde_json::json!({}) });
        assert!(matches!(result, Err(SagaError::StepMismatch { .. })));
    }

    #[test]
    fn failure_then_compensation_reaches_compensated() {
        let mut saga = started(&["reserve", "pay"]);
        for e in saga.execute(&SagaCommand::BeginCompensation { failed_step: "pay".into(), error: "payment declined".into() }).unwrap() {
            saga.apply(&e);
        }
        assert_eq!(saga.state, Some(SagaMachineState::Compensating));

        for e in saga.execute(&SagaCommand::RecordCompensationStep { step_name: "reserve".into() }).unwrap() {
            saga.apply(&e);
        }
        for e in saga.execute(&SagaCommand::RecordCompensated).unwrap() {
            saga.apply(&e);
        }
        assert_eq!(saga.state, Some(SagaMachineState::Compensated));
    }
}
