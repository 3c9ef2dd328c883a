//! Wire types for the event store: envelopes, metadata, and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Correlates a committed event back to the command/saga step that caused it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    pub command_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub actor: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self {
            occurred_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_causation_id(mut self, id: Uuid) -> Self {
        self.causation_id = Some(id);
        self
    }

    pub fn with_command_id(mut self, id: Uuid) -> Self {
        self.command_id = Some(id);
        self
    }
}

/// A single committed (or about-to-be-committed) event.
///
/// `global_sequence` and `committed_at` are server-assigned at commit time; a
/// freshly constructed envelope (before `AppendToStream`) carries placeholder
/// values for both (`0` and the construction time respectively).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub stream_id: Uuid,
    pub stream_version: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
    pub global_sequence: i64,
    pub committed_at: DateTime<Utc>,
    pub schema_version: i32,
    pub checksum: Option<String>,
}

impl EventEnvelope {
    /// Construct a new, not-yet-committed envelope. `stream_version` and
    /// `global_sequence` are finalized by the store on append.
    pub fn new(stream_id: Uuid, event_type: impl Into<String>, payload: serde_json::Value, metadata: EventMetadata) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            stream_id,
            stream_version: 0,
            event_type: event_type.into(),
            payload,
            metadata,
            global_sequence: 0,
            committed_at: Utc::now(),
            schema_version: 1,
            checksum: None,
        }
    }

    /// SHA-256 over the payload bytes, used for archival integrity checking.
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.payload.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn with_checksum(mut self) -> Self {
        self.checksum = Some(self.compute_checksum());
        self
    }
}

/// Compression applied to a snapshot's `snapshot_data`, chosen per
/// deployment; `None` stores the JSON payload as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionKind {
    None,
    Gzip,
    Lz4,
}

impl CompressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Lz4 => "lz4",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "gzip" => CompressionKind::Gzip,
            "lz4" => CompressionKind::Lz4,
            _ => CompressionKind::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateSnapshot {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_version: i64,
    pub snapshot_data: serde_json::Value,
    pub compression: CompressionKind,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl AggregateSnapshot {
    pub fn new(aggregate_id: Uuid, aggregate_version: i64, snapshot_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            aggregate_version,
            snapshot_data,
            compression: CompressionKind::None,
            created_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        let e = EventEnvelope::new(Uuid::nil(), "ProductCreated", serde_json::json!({"a":1}), EventMetadata::new());
        assert_eq!(e.compute_checksum(), e.compute_checksum());
    }

    #[test]
    fn compression_kind_round_trips_through_string() {
        for kind in [CompressionKind::None, CompressionKind::Gzip, CompressionKind::Lz4] {
            assert_eq!(CompressionKind::from_str(kind.as_str()), kind);
        }
    }
}
