//! Drives sagas to completion: dispatch the current step's command, await its
//! outcome, advance or start compensating, repeat. Mirrors the forward step
//! execution / compensation paragraphs of the saga design: a step's outcome
//! is a domain event representing success, or any error (domain violation,
//! timeout, circuit open) that starts compensation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use cqrs_core::{CqrsError, CqrsResult, LruCache};
use event_store::EventStore;

use aggregate_runtime::{Aggregate, AggregateRepository};

use crate::saga::{SagaAggregateState, SagaCommand, SagaMachineState};

/// One forward/compensating command a saga step can issue; `target` names
/// the aggregate type or external service the dispatcher should route to.
#[derive(Debug, Clone)]
pub struct SagaStepCommand {
    pub target: String,
    pub payload: serde_json::Value,
}

/// Builds the command for a step given the saga's running context (seeded at
/// start, and not otherwise mutated by the coordinator itself).
pub type CommandBuilder = Arc<dyn Fn(&serde_json::Value) -> SagaStepCommand + Send + Sync>;

pub struct SagaStepSpec {
    pub name: &'static str,
    pub forward: CommandBuilder,
    pub compensation: Option<CommandBuilder>,
}

pub struct SagaDefinition {
    pub saga_type: &'static str,
    pub steps: Vec<SagaStepSpec>,
    pub timeout: Duration,
}

/// Dispatches a saga step's command and reports its outcome. Implementations
/// wrap the command bus (possibly over RPC to another service) with the
/// resilient client's timeout/retry/circuit-breaker behavior; any failure
/// surfaces here as a plain `CqrsError`.
#[async_trait::async_trait]
pub trait SagaCommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: &SagaStepCommand) -> CqrsResult<serde_json::Value>;
}

pub struct SagaCoordinator {
    repository: AggregateRepository<SagaAggregateState>,
    definitions: HashMap<&'static str, SagaDefinition>,
    dispatcher: Arc<dyn SagaCommandDispatcher>,
    deadlines: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    processed_events: Mutex<LruCache<Uuid, ()>>,
}

impl SagaCoordinator {
    pub fn new(store: Arc<dyn EventStore>, dispatcher: Arc<dyn SagaCommandDispatcher>) -> Self {
        Self {
            repository: AggregateRepository::new(store, 20),
            definitions: HashMap::new(),
            dispatcher,
            deadlines: Mutex::new(HashMap::new()),
            processed_events: Mutex::new(LruCache::new(10_000)),
        }
    }

    pub fn register(&mut self, definition: SagaDefinition) {
        self.definitions.insert(definition.saga_type, definition);
    }

    fn definition(&self, saga_type: &str) -> CqrsResult<&SagaDefinition> {
        self.definitions
            .get(saga_type)
            .ok_or_else(|| CqrsError::Configuration { message: format!("no saga definition registered for '{saga_type}'") })
    }

    /// `StartSaga`: creates the saga aggregate and immediately drives its
    /// first step.
    pub async fn start_saga(&self, saga_type: &str, context: serde_json::Value) -> CqrsResult<Uuid> {
        let definition = self.definition(saga_type)?;
        let step_names = definition.steps.iter().map(|s| s.name.to_string()).collect();
        let id = Uuid::new_v4();

        let mut saga = self.repository.load(id).await?;
        let events = saga
            .execute(&SagaCommand::Start { saga_type: saga_type.to_string(), step_names, context })
            .map_err(|e| CqrsError::domain("Saga", e.to_string()))?;
        self.repository.save(&mut saga, events, 0, event_store::EventMetadata::new()).await?;

        self.deadlines.lock().await.insert(id, Utc::now() + chrono::Duration::from_std(definition.timeout).unwrap_or(chrono::Duration::minutes(5)));

        info!(saga_id = %id, saga_type, "saga started");
        self.drive(id).await?;
        Ok(id)
    }

    /// `HandleEvent`: the dedup set protects against a redelivered event
    /// driving the same step twice. Most events simply trigger `drive`.
    pub async fn handle_event(&self, saga_id: Uuid, event_id: Uuid) -> CqrsResult<()> {
        {
            let mut processed = self.processed_events.lock().await;
            if processed.get(&event_id).is_some() {
                return Ok(());
            }
            processed.put(event_id, ());
        }
        self.drive(saga_id).await
    }

    /// `ResumeAll`: loaded from the event log like any other aggregate, so
    /// there is nothing saga-specific to reconstruct here beyond re-entering
    /// the drive loop for everything non-terminal.
    pub async fn resume_all(&self, saga_ids: &[Uuid]) -> CqrsResult<()> {
        for &id in saga_ids {
            let saga = self.repository.load(id).await?;
            if !saga.is_terminal() {
                info!(saga_id = %id, "resuming saga after restart");
                self.drive(id).await?;
            }
        }
        Ok(())
    }

    /// Any saga whose deadline has passed and is still running is pushed
    /// into compensation.
    pub async fn tick_timeouts(&self) -> CqrsResult<()> {
        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let deadlines = self.deadlines.lock().await;
            deadlines.iter().filter(|(_, deadline)| **deadline <= now).map(|(id, _)| *id).collect()
        };
        for id in expired {
            let saga = self.repository.load(id).await?;
            if saga.state == Some(SagaMachineState::Running) {
                warn!(saga_id = %id, "saga exceeded its deadline, compensating");
                self.fail_current_step(id, "saga timeout exceeded".to_string()).await?;
            }
            self.deadlines.lock().await.remove(&id);
        }
        Ok(())
    }

    /// Executes the current step (if running) or the next compensation (if
    /// compensating), looping until the saga reaches a terminal state or is
    /// left waiting on an in-flight call.
    async fn drive(&self, id: Uuid) -> CqrsResult<()> {
        loop {
            let saga = self.repository.load(id).await?;
            let definition = self.definition(&saga.saga_type)?;

            match saga.state {
                Some(SagaMachineState::Running) => {
                    let Some(step_name) = saga.current_step() else { return Ok(()) };
                    let step = definition
                        .steps
                        .iter()
                        .find(|s| s.name == step_name)
                        .ok_or_else(|| CqrsError::Fatal { message: format!("step '{step_name}' missing from definition") })?;

                    let command = (step.forward)(&saga.context);
                    match self.dispatcher.dispatch(&command).await {
                        Ok(output) => {
                            let mut saga = self.repository.load(id).await?;
                            let events = saga
                                .execute(&SagaCommand::RecordStepCompleted { step_name: step_name.to_string(), output })
                                .map_err(|e| CqrsError::domain("Saga", e.to_string()))?;
                            self.repository.save(&mut saga, events, saga.version, event_store::EventMetadata::new()).await?;
                        }
                        Err(err) => {
                            error!(saga_id = %id, step = step_name, error = %err, "saga step failed, compensating");
                            self.fail_current_step(id, err.to_string()).await?;
                        }
                    }
                }
                Some(SagaMachineState::Compensating) => {
                    let pending = saga
                        .steps
                        .iter()
                        .rev()
                        .find(|s| matches!(s.status, crate::saga::StepStatus::Completed));
                    match pending {
                        Some(step_record) => {
                            let step = definition.steps.iter().find(|s| s.name == step_record.name);
                            if let Some(step) = step.and_then(|s| s.compensation.as_ref()) {
                                let command = step(&saga.context);
                                if let Err(err) = self.dispatcher.dispatch(&command).await {
                                    error!(saga_id = %id, step = step_record.name, error = %err, "compensation step failed");
                                    let mut saga = self.repository.load(id).await?;
                                    let events = saga
                                        .execute(&SagaCommand::RecordFailed { error: err.to_string() })
                                        .map_err(|e| CqrsError::domain("Saga", e.to_string()))?;
                                    self.repository.save(&mut saga, events, saga.version, event_store::EventMetadata::new()).await?;
                                    return Ok(());
                                }
                            }
                            let mut saga = self.repository.load(id).await?;
                            let events = saga
                                .execute(&SagaCommand::RecordCompensationStep { step_name: step_record.name.clone() })
                                .map_err(|e| CqrsError::domain("Saga", e.to_string()))?;
                            self.repository.save(&mut saga, events, saga.version, event_store::EventMetadata::new()).await?;
                        }
                        None => {
                            let mut saga = self.repository.load(id).await?;
                            let events = saga.execute(&SagaCommand::RecordCompensated).map_err(|e| CqrsError::domain("Saga", e.to_string()))?;
                            self.repository.save(&mut saga, events, saga.version, event_store::EventMetadata::new()).await?;
                            return Ok(());
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    async fn fail_current_step(&self, id: Uuid, error: String) -> CqrsResult<()> {
        let mut saga = self.repository.load(id).await?;
        let Some(step_name) = saga.current_step().map(str::to_string) else { return Ok(()) };
        let events = saga
            .execute(&SagaCommand::BeginCompensation { failed_step: step_name, error })
            .map_err(|e| CqrsError::domain("Saga", e.to_string()))?;
        self.repository.save(&mut saga, events, saga.version, event_store::EventMetadata::new()).await?;
        self.drive(id).await
    }
}
