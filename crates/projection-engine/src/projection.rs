//! The `Projection` contract: a read model that consumes ordered events and
//! knows how to reset itself for a full rebuild.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cqrs_core::CqrsResult;
use event_store::EventEnvelope;

use crate::checkpoint::CheckpointStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionState {
    Building,
    Active,
    Failed,
    Rebuilding,
    Stopped,
}

#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &str;

    /// Event type tags this projection cares about; anything else is skipped
    /// without invoking `apply_event`.
    fn event_types(&self) -> &[&'static str];

    /// Fold one ordered event into the read model. Must be idempotent under
    /// redelivery of an already-applied event (the engine only dedups by
    /// checkpoint, not by event id).
    async fn apply_event(&self, event: &EventEnvelope) -> CqrsResult<()>;

    /// Truncate all of this projection's tables; called before a rebuild.
    async fn reset(&self) -> CqrsResult<()>;

    fn should_handle(&self, event: &EventEnvelope) -> bool {
        self.event_types().contains(&event.event_type.as_str())
    }

    /// Apply a whole batch and advance the checkpoint to `new_checkpoint` as
    /// one unit: on crash, the batch is either fully visible or not visible
    /// at all, never partially applied with the checkpoint left behind (or
    /// vice versa). The default folds `apply_event` over each matching event
    /// and then writes the checkpoint through `checkpoints` — adequate for a
    /// projection with no single transactional resource to tie the two
    /// together (e.g. an in-memory test double). A Postgres-backed
    /// projection overrides this to apply every event *and* upsert its
    /// checkpoint row on the same connection inside one `conn.transaction`.
    async fn apply_batch(&self, events: &[EventEnvelope], new_checkpoint: i64, checkpoints: &dyn CheckpointStore) -> CqrsResult<()> {
        for event in events {
            if self.should_handle(event) {
                self.apply_event(event).await?;
            }
        }
        checkpoints.set(self.name(), new_checkpoint).await
    }
}
