//! In-process event bus: fire-and-forget push after a successful commit.
//!
//! This is *not* the durability boundary — `projection_engine` and
//! `saga_coordinator` must use pull (`EventStore::read_all_from` with a stored
//! checkpoint); this bus only serves low-latency, best-effort consumers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::types::EventEnvelope;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A filter matching events by type; `None` matches everything.
pub type EventFilter = Option<Vec<String>>;

pub fn filter_matches(filter: &EventFilter, event: &EventEnvelope) -> bool {
    match filter {
        None => true,
        Some(types) => types.iter().any(|t| t == &event.event_type),
    }
}

/// Broadcasts committed events to any number of push subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<EventEnvelope>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a committed event. Dropped silently if there are no subscribers,
    /// or if a lagging subscriber's queue overflows — push delivery is best effort.
    pub fn publish(&self, event: EventEnvelope) {
        let event = Arc::new(event);
        if self.sender.send(event).is_err() {
            tracing::trace!("event bus publish with no active subscribers");
        }
    }

    /// Subscribe to events matching `filter`. The returned receiver yields
    /// `Arc<EventEnvelope>`; callers should filter again if they passed `None`
    /// and only want a subset, since the filter here is advisory bookkeeping
    /// for callers that want to record what they asked for.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventEnvelope>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventMetadata;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let event = EventEnvelope::new(Uuid::new_v4(), "ProductCreated", serde_json::json!({}), EventMetadata::new());
        bus.publish(event.clone());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_id, event.event_id);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        let event = EventEnvelope::new(Uuid::new_v4(), "ProductCreated", serde_json::json!({}), EventMetadata::new());
        bus.publish(event);
    }

    #[test]
    fn filter_matches_event_type() {
        let event = EventEnvelope::new(Uuid::new_v4(), "ProductCreated", serde_json::json!({}), EventMetadata::new());
        assert!(filter_matches(&None, &event));
        assert!(filter_matches(&Some(vec!["ProductCreated".to_string()]), &event));
        assert!(!filter_matches(&Some(vec!["ProductDeleted".to_string()]), &event));
    }
}
