//! The aggregate contract: `Load` does I/O (snapshot fetch + event replay),
//! `Execute` and `Apply` are pure. Concurrency safety comes entirely from the
//! event store's optimistic version check at append time, not from any
//! in-process locking here.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use cqrs_core::{CqrsError, CqrsResult};
use event_store::{AggregateSnapshot, EventMetadata, EventStore, NewEvent};

/// A domain event with a stable wire tag, used as `EventEnvelope::event_type`.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug {
    fn event_type(&self) -> &'static str;
}

/// One entity's folded state (Product, Category, Order).
///
/// `execute` never touches the event store or the read model: any
/// cross-aggregate fact it needs (a category's resolved path, a duplicate-name
/// check) is resolved by the caller and passed in as part of the command.
pub trait Aggregate: Send + Sync + Sized + Clone + Serialize + DeserializeOwned {
    type Command;
    type Event: DomainEvent;
    type Error: Send + Sync + std::fmt::Display;

    fn aggregate_type() -> &'static str;

    /// The "version 0, no history" value returned by `Load` when nothing has
    /// been committed for this id yet.
    fn empty(id: Uuid) -> Self;

    fn id(&self) -> Uuid;
    fn version(&self) -> i64;

    /// Pure: command -> new events, or a domain error. Does not mutate `self`.
    fn execute(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Pure: fold one event into state, advancing `version` by exactly one.
    fn apply(&mut self, event: &Self::Event);
}

/// Loads and persists aggregates of type `A`, snapshotting every
/// `snapshot_frequency` committed versions.
pub struct AggregateRepository<A: Aggregate> {
    store: Arc<dyn EventStore>,
    snapshot_frequency: i64,
    _marker: PhantomData<A>,
}

impl<A: Aggregate> AggregateRepository<A> {
    pub fn new(store: Arc<dyn EventStore>, snapshot_frequency: i64) -> Self {
        Self {
            store,
            snapshot_frequency: snapshot_frequency.max(1),
            _marker: PhantomData,
        }
    }

    /// Fetch the latest snapshot (if any), then replay every event committed
    /// after it. Returns an empty aggregate at version 0 if nothing exists yet.
    pub async fn load(&self, id: Uuid) -> CqrsResult<A> {
        let (mut aggregate, from_version) = match self.store.get_latest_snapshot(id).await? {
            Some(snapshot) => {
                let aggregate: A = serde_json::from_value(snapshot.snapshot_data)?;
                (aggregate, snapshot.aggregate_version)
            }
            None => (A::empty(id), 0),
        };

        let events = self.store.read_stream(id, from_version, None).await?;
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(&event);
        }

        Ok(aggregate)
    }

    /// Append `new_events` (already produced by `Aggregate::execute`) with the
    /// given optimistic `expected_version`, fold them into `aggregate`, and
    /// snapshot if the new version crosses a `snapshot_frequency` boundary.
    ///
    /// A no-op `Execute` (empty `new_events`) is a no-op here too: no append,
    /// no version advance, per the emission rules.
    pub async fn save(&self, aggregate: &mut A, new_events: Vec<A::Event>, expected_version: i64, metadata: EventMetadata) -> CqrsResult<i64> {
        if new_events.is_empty() {
            return Ok(expected_version);
        }

        let store_events: Vec<NewEvent> = new_events
            .iter()
            .map(|event| {
                let payload = serde_json::to_value(event)?;
                Ok(NewEvent::new(event.event_type(), payload, metadata.clone()))
            })
            .collect::<CqrsResult<Vec<_>>>()?;

        let new_version = self.store.append_to_stream(aggregate.id(), store_events, expected_version).await?;

        for event in &new_events {
            aggregate.apply(event);
        }

        if new_version % self.snapshot_frequency == 0 {
            let snapshot_data = serde_json::to_value(&*aggregate)?;
            self.store
                .save_snapshot(AggregateSnapshot::new(aggregate.id(), new_version, snapshot_data))
                .await?;
        }

        Ok(new_version)
    }
}

/// Converts an aggregate-specific domain error into the shared [`CqrsError`]
/// taxonomy; every aggregate's `Error` type implements `Into<CqrsError>` via
/// this helper rather than a blanket `From` (kept explicit per aggregate so
/// the error code stays meaningful).
pub fn domain_error(code: &str, message: impl Into<String>) -> CqrsError {
    CqrsError::domain(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CounterState {
        id: Uuid,
        version: i64,
        value: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented { by: i64 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            "CounterIncremented"
        }
    }

    enum CounterCommand {
        Increment(i64),
    }

    impl Aggregate for CounterState {
        type Command = CounterCommand;
        type Event = CounterEvent;
        type Error = String;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn empty(id: Uuid) -> Self {
            Self { id, version: 0, value: 0 }
        }

        fn id(&self) -> Uuid {
            self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn execute(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            match command {
                CounterCommand::Increment(by) => Ok(vec![CounterEvent::Incremented { by: *by }]),
            }
        }

        fn apply(&mut self, event: &Self::Event) {
            match event {
                CounterEvent::Incremented { by } => self.value += by,
            }
            self.version += 1;
        }
    }

    #[tokio::test]
    async fn load_after_save_equals_apply_fold() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::default());
        let repo: AggregateRepository<CounterState> = AggregateRepository::new(store, 100);

        let id = Uuid::new_v4();
        let mut aggregate = repo.load(id).await.unwrap();
        assert_eq!(aggregate.version, 0);

        let events = aggregate.execute(&CounterCommand::Increment(5)).unwrap();
        let version = repo.save(&mut aggregate, events, 0, EventMetadata::new()).await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(aggregate.value, 5);

        let reloaded = repo.load(id).await.unwrap();
        assert_eq!(reloaded.value, 5);
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    async fn no_events_does_not_advance_version() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::default());
        let repo: AggregateRepository<CounterState> = AggregateRepository::new(store, 100);
        let mut aggregate = CounterState::empty(Uuid::new_v4());
        let version = repo.save(&mut aggregate, vec![], 0, EventMetadata::new()).await.unwrap();
        assert_eq!(version, 0);
    }
}
