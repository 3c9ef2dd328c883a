//! Per-command protocol: validate -> load -> execute -> append with an
//! optimistic expected_version -> retry on conflict -> return. Idempotent
//! replay and version-conflict retry live here rather than in the aggregate
//! repository, which knows nothing about command identity.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use cqrs_core::{CqrsError, CqrsResult};
use event_store::EventMetadata;

use crate::aggregate::{Aggregate, AggregateRepository};
use crate::idempotency::{CommandOutcome, IdempotencyCache};

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(20);
const RETRY_MAX_DELAY: Duration = Duration::from_millis(250);

fn jittered_backoff(attempt: u32) -> Duration {
    let exp = RETRY_BASE_DELAY.saturating_mul(1 << attempt.min(8)).min(RETRY_MAX_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Resolves facts a pure `Aggregate::execute` cannot see for itself — a
/// category's duplicate-name check, a descendant check on move, whether an
/// order's referenced products still exist. The default does nothing; most
/// command kinds don't need one.
#[async_trait::async_trait]
pub trait PreCheck<A: Aggregate>: Send + Sync {
    async fn check(&self, aggregate_id: Uuid, command: &A::Command) -> CqrsResult<()> {
        let _ = (aggregate_id, command);
        Ok(())
    }
}

/// A pre-check that never rejects; used where a command kind has none.
pub struct NoPreCheck;

#[async_trait::async_trait]
impl<A: Aggregate> PreCheck<A> for NoPreCheck {}

pub struct CommandBus<A: Aggregate> {
    repository: AggregateRepository<A>,
    idempotency: Arc<IdempotencyCache>,
    max_retries: u32,
}

impl<A: Aggregate> CommandBus<A> {
    pub fn new(repository: AggregateRepository<A>, idempotency: Arc<IdempotencyCache>) -> Self {
        Self { repository, idempotency, max_retries: DEFAULT_MAX_RETRIES }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Runs the full per-command protocol against aggregate `aggregate_id`.
    /// `idempotency_key`, if given, short-circuits a replay of the same
    /// command to the cached outcome instead of re-executing it.
    pub async fn dispatch(
        &self,
        aggregate_id: Uuid,
        command: A::Command,
        metadata: EventMetadata,
        pre_check: &dyn PreCheck<A>,
        idempotency_key: Option<&str>,
    ) -> CqrsResult<CommandOutcome> {
        if let Some(key) = idempotency_key {
            if let Some(cached) = self.idempotency.get(key) {
                info!(idempotency_key = key, "returning cached command outcome");
                return Ok(cached);
            }
        }

        pre_check.check(aggregate_id, &command).await?;

        let mut attempt = 0;
        loop {
            let mut aggregate = self.repository.load(aggregate_id).await?;
            let expected_version = aggregate.version();

            let new_events = aggregate
                .execute(&command)
                .map_err(|e| CqrsError::domain(A::aggregate_type(), e.to_string()))?;

            match self.repository.save(&mut aggregate, new_events, expected_version, metadata.clone()).await {
                Ok(new_version) => {
                    let outcome = CommandOutcome { aggregate_id, new_version };
                    if let Some(key) = idempotency_key {
                        self.idempotency.put(key.to_string(), outcome.clone());
                    }
                    return Ok(outcome);
                }
                Err(CqrsError::VersionConflict { .. }) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = jittered_backoff(attempt);
                    warn!(aggregate_id = %aggregate_id, attempt, delay_ms = delay.as_millis() as u64, "version conflict, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::{ProductCommand, ProductState};
    use event_store::InMemoryEventStore;

    #[tokio::test]
    async fn dispatch_creates_and_returns_version_one() {
        let store: Arc<dyn event_store::EventStore> = Arc::new(InMemoryEventStore::default());
        let repo: AggregateRepository<ProductState> = AggregateRepository::new(store, 100);
        let bus = CommandBus::new(repo, Arc::new(IdempotencyCache::new(10)));

        let id = Uuid::new_v4();
        let outcome = bus
            .dispatch(
                id,
                ProductCommand::Create { name: "Widget".into(), price: 1000, category_id: None },
                EventMetadata::new(),
                &NoPreCheck,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.new_version, 1);
    }

    #[tokio::test]
    async fn replayed_idempotency_key_skips_second_execution() {
        let store: Arc<dyn event_store::EventStore> = Arc::new(InMemoryEventStore::default());
        let repo: AggregateRepository<ProductState> = AggregateRepository::new(store, 100);
        let bus = CommandBus::new(repo, Arc::new(IdempotencyCache::new(10)));

        let id = Uuid::new_v4();
        let command = ProductCommand::Create { name: "Widget".into(), price: 1000, category_id: None };
        let first = bus.dispatch(id, command.clone(), EventMetadata::new(), &NoPreCheck, Some("key-1")).await.unwrap();
        let second = bus.dispatch(id, command, EventMetadata::new(), &NoPreCheck, Some("key-1")).await.unwrap();
        assert_eq!(first.new_version, second.new_version);
    }
}
