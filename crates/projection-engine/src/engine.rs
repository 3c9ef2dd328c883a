//! The projection runtime: load checkpoint, pull a batch of ordered events
//! from `global_sequence`, apply the whole batch to a projection and advance
//! its checkpoint as one atomic step (see `Projection::apply_batch`). Catch-up
//! (backlog) and live tailing use the same loop — there is no separate "live
//! mode", only a shorter poll interval once the backlog empties.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use cqrs_core::{CqrsError, CqrsResult};
use event_store::EventStore;

use crate::checkpoint::CheckpointStore;
use crate::projection::Projection;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ProjectionEngine {
    store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    projections: HashMap<String, Arc<dyn Projection>>,
    batch_size: i64,
    poll_interval: Duration,
}

impl ProjectionEngine {
    pub fn new(store: Arc<dyn EventStore>, checkpoints: Arc<dyn CheckpointStore>, batch_size: i64) -> Self {
        Self { store, checkpoints, projections: HashMap::new(), batch_size: batch_size.max(1), poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.insert(projection.name().to_string(), projection);
    }

    /// Runs one catch-up pass: apply every batch available right now, return
    /// once the store has nothing left from the checkpoint forward. Callers
    /// that want continuous tailing loop this with `poll_interval` between
    /// empty passes (see `run_forever`).
    pub async fn catch_up(&self, projection_name: &str) -> CqrsResult<()> {
        let projection = self
            .projections
            .get(projection_name)
            .ok_or_else(|| CqrsError::Configuration { message: format!("no projection registered as '{projection_name}'") })?;

        loop {
            let checkpoint = self.checkpoints.get(projection_name).await?;
            let batch = self.store.read_all_from(checkpoint, self.batch_size).await?;
            if batch.is_empty() {
                return Ok(());
            }

            let last_sequence = batch.last().expect("checked non-empty above").global_sequence;
            let batch_len = batch.len();
            projection.apply_batch(&batch, last_sequence, self.checkpoints.as_ref()).await?;
            debug!(projection = projection_name, last_sequence, applied = batch_len, "projection batch applied");
        }
    }

    pub async fn catch_up_all(&self) -> CqrsResult<()> {
        for name in self.projections.keys() {
            self.catch_up(name).await?;
        }
        Ok(())
    }

    /// Runs catch-up passes indefinitely, sleeping `poll_interval` whenever a
    /// pass finds nothing new. Exits only on a `Fatal` error — a corrupt
    /// event or checkpoint ahead of the store is an operator problem, not
    /// something to keep retrying.
    pub async fn run_forever(&self) -> CqrsResult<()> {
        loop {
            let mut made_progress = false;
            for name in self.projections.keys() {
                let before = self.checkpoints.get(name).await?;
                self.catch_up(name).await?;
                let after = self.checkpoints.get(name).await?;
                made_progress |= after != before;
            }
            if !made_progress {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// Truncates the projection's tables and rewinds its checkpoint to zero,
    /// then replays the full event log into it.
    pub async fn reset_and_rebuild(&self, projection_name: &str) -> CqrsResult<()> {
        let projection = self
            .projections
            .get(projection_name)
            .ok_or_else(|| CqrsError::Configuration { message: format!("no projection registered as '{projection_name}'") })?;

        warn!(projection = projection_name, "resetting projection for full rebuild");
        projection.reset().await?;
        self.checkpoints.reset(projection_name).await?;
        self.catch_up(projection_name).await?;
        info!(projection = projection_name, "projection rebuild complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use async_trait::async_trait;
    use event_store::{EventMetadata, EventStore, InMemoryEventStore, NewEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingProjection {
        applied: AtomicUsize,
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &str {
            "counting"
        }

        fn event_types(&self) -> &[&'static str] {
            &["Counted"]
        }

        async fn apply_event(&self, _event: &event_store::EventEnvelope) -> CqrsResult<()> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reset(&self) -> CqrsResult<()> {
            self.applied.store(0, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn catch_up_applies_every_event_once_and_advances_checkpoint() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::default());
        let stream_id = Uuid::new_v4();
        store
            .append_to_stream(
                stream_id,
                vec![NewEvent::new("Counted", serde_json::json!({}), EventMetadata::new()), NewEvent::new("Counted", serde_json::json!({}), EventMetadata::new())],
                0,
            )
            .await
            .unwrap();

        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::default());
        let projection = Arc::new(CountingProjection { applied: AtomicUsize::new(0) });

        let mut engine = ProjectionEngine::new(store, checkpoints.clone(), 100);
        engine.register(projection.clone());

        engine.catch_up("counting").await.unwrap();
        assert_eq!(projection.applied.load(Ordering::SeqCst), 2);
        assert_eq!(checkpoints.get("counting").await.unwrap(), 2);

        engine.catch_up("counting").await.unwrap();
        assert_eq!(projection.applied.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reset_and_rebuild_replays_from_zero() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::default());
        let stream_id = Uuid::new_v4();
        store.append_to_stream(stream_id, vec![NewEvent::new("Counted", serde_json::json!({}), EventMetadata::new())], 0).await.unwrap();

        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::default());
        let projection = Arc::new(CountingProjection { applied: AtomicUsize::new(0) });
        let mut engine = ProjectionEngine::new(store, checkpoints.clone(), 100);
        engine.register(projection.clone());

        engine.catch_up("counting").await.unwrap();
        engine.reset_and_rebuild("counting").await.unwrap();
        assert_eq!(projection.applied.load(Ordering::SeqCst), 1);
        assert_eq!(checkpoints.get("counting").await.unwrap(), 1);
    }
}
