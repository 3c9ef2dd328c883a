//! The `EventStore` contract and its two implementations: `PostgresEventStore`
//! (the real backend) and `InMemoryEventStore` (a test double used across the
//! workspace wherever a Postgres instance isn't available).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use uuid::Uuid;

use cqrs_core::{CqrsError, CqrsResult};

use crate::bus::EventBus;
use crate::schema::{event_snapshots, event_store, event_store_archive};
use crate::types::{AggregateSnapshot, CompressionKind, EventEnvelope, EventMetadata};
use crate::version_cache::VersionCache;

/// A not-yet-committed event: `stream_version`, `global_sequence`, and
/// `committed_at` are assigned by the store on append.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value, metadata: EventMetadata) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata,
        }
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events to `stream_id`, failing with `VersionConflict` unless the
    /// stream's current version equals `expected_version`. Returns the new
    /// current version on success.
    async fn append_to_stream(
        &self,
        stream_id: Uuid,
        events: Vec<NewEvent>,
        expected_version: i64,
    ) -> CqrsResult<i64>;

    /// Ordered events for one stream, starting strictly after `from_version`.
    async fn read_stream(&self, stream_id: Uuid, from_version: i64, limit: Option<i64>) -> CqrsResult<Vec<EventEnvelope>>;

    /// Ordered events across all streams, for projection/saga catch-up.
    async fn read_all_from(&self, from_global: i64, limit: i64) -> CqrsResult<Vec<EventEnvelope>>;

    /// Ordered events of one type across all streams.
    async fn read_by_type(&self, event_type: &str, from_global: i64, limit: i64) -> CqrsResult<Vec<EventEnvelope>>;

    async fn current_version(&self, stream_id: Uuid) -> CqrsResult<i64>;

    async fn save_snapshot(&self, snapshot: AggregateSnapshot) -> CqrsResult<()>;

    async fn get_latest_snapshot(&self, aggregate_id: Uuid) -> CqrsResult<Option<AggregateSnapshot>>;

    /// Move one batch (≤ `batch_size`) of events older than `older_than_days`
    /// into the archive table, within a single transaction. Returns the number
    /// of rows moved; callers loop until this returns 0.
    async fn archive_batch(&self, older_than_days: i64, batch_size: i64) -> CqrsResult<u64>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

#[derive(Queryable, Identifiable, Debug, Clone)]
#[diesel(table_name = event_store, primary_key(global_sequence))]
struct EventStoreRow {
    event_id: Uuid,
    stream_id: Uuid,
    stream_version: i64,
    event_type: String,
    payload: serde_json::Value,
    metadata: serde_json::Value,
    global_sequence: i64,
    committed_at: DateTime<Utc>,
    schema_version: i32,
    checksum: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = event_store)]
struct NewEventStoreRow {
    event_id: Uuid,
    stream_id: Uuid,
    stream_version: i64,
    event_type: String,
    payload: serde_json::Value,
    metadata: serde_json::Value,
    committed_at: DateTime<Utc>,
    schema_version: i32,
    checksum: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = event_store_archive)]
struct ArchivedEventRow {
    event_id: Uuid,
    stream_id: Uuid,
    stream_version: i64,
    event_type: String,
    payload: serde_json::Value,
    metadata: serde_json::Value,
    global_sequence: i64,
    committed_at: DateTime<Utc>,
    schema_version: i32,
    checksum: Option<String>,
}

#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = event_snapshots)]
struct SnapshotRow {
    id: Uuid,
    aggregate_id: Uuid,
    aggregate_version: i64,
    snapshot_data: serde_json::Value,
    compression: String,
    created_at: DateTime<Utc>,
    metadata: serde_json::Value,
}

fn row_to_envelope(row: EventStoreRow) -> CqrsResult<EventEnvelope> {
    let metadata: EventMetadata = serde_json::from_value(row.metadata)?;
    Ok(EventEnvelope {
        event_id: row.event_id,
        stream_id: row.stream_id,
        stream_version: row.stream_version,
        event_type: row.event_type,
        payload: row.payload,
        metadata,
        global_sequence: row.global_sequence,
        committed_at: row.committed_at,
        schema_version: row.schema_version,
        checksum: row.checksum,
    })
}

fn row_to_snapshot(row: SnapshotRow) -> CqrsResult<AggregateSnapshot> {
    Ok(AggregateSnapshot {
        id: row.id,
        aggregate_id: row.aggregate_id,
        aggregate_version: row.aggregate_version,
        snapshot_data: row.snapshot_data,
        compression: CompressionKind::from_str(&row.compression),
        created_at: row.created_at,
        metadata: row.metadata,
    })
}

pub struct PostgresEventStore {
    pool: Arc<Pool<ConnectionManager<PgConnection>>>,
    version_cache: VersionCache,
    bus: EventBus,
}

impl PostgresEventStore {
    pub fn new(database_url: &str, pool_size: u32, bus: EventBus) -> CqrsResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| CqrsError::Configuration {
                message: format!("failed to build event store connection pool: {e}"),
            })?;
        Ok(Self {
            pool: Arc::new(pool),
            version_cache: VersionCache::new(10_000),
            bus,
        })
    }

    fn conn(&self) -> CqrsResult<PooledConnection<ConnectionManager<PgConnection>>> {
        Ok(self.pool.get()?)
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append_to_stream(&self, stream_id: Uuid, events: Vec<NewEvent>, expected_version: i64) -> CqrsResult<i64> {
        if events.is_empty() {
            return Ok(expected_version);
        }
        let mut conn = self.conn()?;

        let inserted: Vec<EventStoreRow> = conn.transaction(|conn| {
            let current: Option<i64> = event_store::table
                .filter(event_store::stream_id.eq(stream_id))
                .select(diesel::dsl::max(event_store::stream_version))
                .first(conn)?;
            let current = current.unwrap_or(0);

            if current != expected_version {
                return Err(diesel::result::Error::RollbackTransaction);
            }

            let now = Utc::now();
            let rows: Vec<NewEventStoreRow> = events
                .iter()
                .enumerate()
                .map(|(i, event)| NewEventStoreRow {
                    event_id: Uuid::new_v4(),
                    stream_id,
                    stream_version: expected_version + 1 + i as i64,
                    event_type: event.event_type.clone(),
                    payload: event.payload.clone(),
                    metadata: serde_json::to_value(&event.metadata).unwrap_or(serde_json::Value::Null),
                    committed_at: now,
                    schema_version: 1,
                    checksum: None,
                })
                .collect();

            diesel::insert_into(event_store::table).values(&rows).get_results(conn)
        }).map_err(|e| match e {
            diesel::result::Error::RollbackTransaction => CqrsError::VersionConflict {
                stream_id,
                expected: expected_version,
                actual: self.version_cache.get(stream_id).unwrap_or(expected_version),
            },
            other => CqrsError::from(other),
        })?;

        let mut envelopes: Vec<EventEnvelope> = inserted
            .into_iter()
            .map(row_to_envelope)
            .collect::<CqrsResult<Vec<_>>>()?;
        envelopes.sort_by_key(|e| e.stream_version);

        let new_version = envelopes.last().map(|e| e.stream_version).unwrap_or(expected_version);
        self.version_cache.put(stream_id, new_version);

        for event in envelopes {
            self.bus.publish(event);
        }

        Ok(new_version)
    }

    async fn read_stream(&self, stream_id: Uuid, from_version: i64, limit: Option<i64>) -> CqrsResult<Vec<EventEnvelope>> {
        let mut conn = self.conn()?;
        let mut query = event_store::table
            .filter(event_store::stream_id.eq(stream_id))
            .filter(event_store::stream_version.gt(from_version))
            .order(event_store::stream_version.asc())
            .into_boxed();
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        let rows: Vec<EventStoreRow> = query.load(&mut conn)?;
        rows.into_iter().map(row_to_envelope).collect()
    }

    async fn read_all_from(&self, from_global: i64, limit: i64) -> CqrsResult<Vec<EventEnvelope>> {
        let mut conn = self.conn()?;
        let rows: Vec<EventStoreRow> = event_store::table
            .filter(event_store::global_sequence.gt(from_global))
            .order(event_store::global_sequence.asc())
            .limit(limit)
            .load(&mut conn)?;
        rows.into_iter().map(row_to_envelope).collect()
    }

    async fn read_by_type(&self, event_type: &str, from_global: i64, limit: i64) -> CqrsResult<Vec<EventEnvelope>> {
        let mut conn = self.conn()?;
        let rows: Vec<EventStoreRow> = event_store::table
            .filter(event_store::event_type.eq(event_type))
            .filter(event_store::global_sequence.gt(from_global))
            .order(event_store::global_sequence.asc())
            .limit(limit)
            .load(&mut conn)?;
        rows.into_iter().map(row_to_envelope).collect()
    }

    async fn current_version(&self, stream_id: Uuid) -> CqrsResult<i64> {
        if let Some(cached) = self.version_cache.get(stream_id) {
            return Ok(cached);
        }
        let mut conn = self.conn()?;
        let version: Option<i64> = event_store::table
            .filter(event_store::stream_id.eq(stream_id))
            .select(diesel::dsl::max(event_store::stream_version))
            .first(&mut conn)?;
        let version = version.unwrap_or(0);
        self.version_cache.put(stream_id, version);
        Ok(version)
    }

    async fn save_snapshot(&self, snapshot: AggregateSnapshot) -> CqrsResult<()> {
        let mut conn = self.conn()?;
        let row = SnapshotRow {
            id: snapshot.id,
            aggregate_id: snapshot.aggregate_id,
            aggregate_version: snapshot.aggregate_version,
            snapshot_data: snapshot.snapshot_data,
            compression: snapshot.compression.as_str().to_string(),
            created_at: snapshot.created_at,
            metadata: snapshot.metadata,
        };
        diesel::insert_into(event_snapshots::table).values(&row).execute(&mut conn)?;
        Ok(())
    }

    async fn get_latest_snapshot(&self, aggregate_id: Uuid) -> CqrsResult<Option<AggregateSnapshot>> {
        let mut conn = self.conn()?;
        let row: Option<SnapshotRow> = event_snapshots::table
            .filter(event_snapshots::aggregate_id.eq(aggregate_id))
            .order(event_snapshots::aggregate_version.desc())
            .first(&mut conn)
            .optional()?;
        row.map(row_to_snapshot).transpose()
    }

    async fn archive_batch(&self, older_than_days: i64, batch_size: i64) -> CqrsResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);
        let mut conn = self.conn()?;

        let moved: i64 = conn.transaction(|conn| {
            let rows: Vec<EventStoreRow> = event_store::table
                .filter(event_store::committed_at.lt(cutoff))
                .order(event_store::global_sequence.asc())
                .limit(batch_size)
                .load(conn)?;

            if rows.is_empty() {
                return Ok(0i64);
            }

            let archived: Vec<ArchivedEventRow> = rows
                .iter()
                .map(|r| ArchivedEventRow {
                    event_id: r.event_id,
                    stream_id: r.stream_id,
                    stream_version: r.stream_version,
                    event_type: r.event_type.clone(),
                    payload: r.payload.clone(),
                    metadata: r.metadata.clone(),
                    global_sequence: r.global_sequence,
                    committed_at: r.committed_at,
                    schema_version: r.schema_version,
                    checksum: r.checksum.clone(),
                })
                .collect();

            diesel::insert_into(event_store_archive::table).values(&archived).execute(conn)?;

            let ids: Vec<i64> = rows.iter().map(|r| r.global_sequence).collect();
            let deleted = diesel::delete(event_store::table.filter(event_store::global_sequence.eq_any(ids))).execute(conn)?;

            Ok(deleted as i64)
        })?;

        Ok(moved as u64)
    }
}

// ---------------------------------------------------------------------------
// In-memory test double
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InMemoryState {
    events: Vec<EventEnvelope>,
    snapshots: HashMap<Uuid, Vec<AggregateSnapshot>>,
    next_global_sequence: i64,
}

/// An in-memory `EventStore` used across the workspace's own test suites.
/// Implements the same concurrency algorithm as `PostgresEventStore` under a
/// single mutex instead of a database transaction.
pub struct InMemoryEventStore {
    state: Mutex<InMemoryState>,
    bus: EventBus,
}

impl InMemoryEventStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            bus,
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(EventBus::new())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_to_stream(&self, stream_id: Uuid, events: Vec<NewEvent>, expected_version: i64) -> CqrsResult<i64> {
        if events.is_empty() {
            return Ok(expected_version);
        }
        let mut state = self.state.lock().unwrap();

        let current = state
            .events
            .iter()
            .filter(|e| e.stream_id == stream_id)
            .map(|e| e.stream_version)
            .max()
            .unwrap_or(0);

        if current != expected_version {
            return Err(CqrsError::VersionConflict {
                stream_id,
                expected: expected_version,
                actual: current,
            });
        }

        let now = Utc::now();
        let mut committed = Vec::with_capacity(events.len());
        for (i, event) in events.into_iter().enumerate() {
            state.next_global_sequence += 1;
            let envelope = EventEnvelope {
                event_id: Uuid::new_v4(),
                stream_id,
                stream_version: expected_version + 1 + i as i64,
                event_type: event.event_type,
                payload: event.payload,
                metadata: event.metadata,
                global_sequence: state.next_global_sequence,
                committed_at: now,
                schema_version: 1,
                checksum: None,
            };
            state.events.push(envelope.clone());
            committed.push(envelope);
        }

        let new_version = committed.last().map(|e| e.stream_version).unwrap_or(expected_version);
        drop(state);

        for event in committed {
            self.bus.publish(event);
        }

        Ok(new_version)
    }

    async fn read_stream(&self, stream_id: Uuid, from_version: i64, limit: Option<i64>) -> CqrsResult<Vec<EventEnvelope>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<EventEnvelope> = state
            .events
            .iter()
            .filter(|e| e.stream_id == stream_id && e.stream_version > from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.stream_version);
        if let Some(limit) = limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    async fn read_all_from(&self, from_global: i64, limit: i64) -> CqrsResult<Vec<EventEnvelope>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<EventEnvelope> = state.events.iter().filter(|e| e.global_sequence > from_global).cloned().collect();
        events.sort_by_key(|e| e.global_sequence);
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn read_by_type(&self, event_type: &str, from_global: i64, limit: i64) -> CqrsResult<Vec<EventEnvelope>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<EventEnvelope> = state
            .events
            .iter()
            .filter(|e| e.event_type == event_type && e.global_sequence > from_global)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.global_sequence);
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn current_version(&self, stream_id: Uuid) -> CqrsResult<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.events.iter().filter(|e| e.stream_id == stream_id).map(|e| e.stream_version).max().unwrap_or(0))
    }

    async fn save_snapshot(&self, snapshot: AggregateSnapshot) -> CqrsResult<()> {
        let mut state = self.state.lock().unwrap();
        state.snapshots.entry(snapshot.aggregate_id).or_default().push(snapshot);
        Ok(())
    }

    async fn get_latest_snapshot(&self, aggregate_id: Uuid) -> CqrsResult<Option<AggregateSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .get(&aggregate_id)
            .and_then(|snaps| snaps.iter().max_by_key(|s| s.aggregate_version).cloned()))
    }

    async fn archive_batch(&self, older_than_days: i64, batch_size: i64) -> CqrsResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);
        let mut state = self.state.lock().unwrap();
        let mut moved = 0u64;
        let eligible: Vec<Uuid> = state
            .events
            .iter()
            .filter(|e| e.committed_at < cutoff)
            .take(batch_size as usize)
            .map(|e| e.event_id)
            .collect();
        state.events.retain(|e| {
            if eligible.contains(&e.event_id) {
                moved += 1;
                false
            } else {
                true
            }
        });
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventMetadata;

    fn new_event(event_type: &str) -> NewEvent {
        NewEvent::new(event_type, serde_json::json!({}), EventMetadata::new())
    }

    #[tokio::test]
    async fn append_then_read_yields_contiguous_versions() {
        let store = InMemoryEventStore::default();
        let stream = Uuid::new_v4();
        let version = store
            .append_to_stream(stream, vec![new_event("A"), new_event("B")], 0)
            .await
            .unwrap();
        assert_eq!(version, 2);

        let events = store.read_stream(stream, 0, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream_version, 1);
        assert_eq!(events[1].stream_version, 2);
    }

    #[tokio::test]
    async fn mismatched_expected_version_conflicts() {
        let store = InMemoryEventStore::default();
        let stream = Uuid::new_v4();
        store.append_to_stream(stream, vec![new_event("A")], 0).await.unwrap();

        let result = store.append_to_stream(stream, vec![new_event("B")], 0).await;
        assert!(matches!(result, Err(CqrsError::VersionConflict { expected: 0, actual: 1, .. })));
    }

    #[tokio::test]
    async fn global_sequence_is_monotonic_across_streams() {
        let store = InMemoryEventStore::default();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        store.append_to_stream(s1, vec![new_event("A")], 0).await.unwrap();
        store.append_to_stream(s2, vec![new_event("A")], 0).await.unwrap();
        store.append_to_stream(s1, vec![new_event("B")], 1).await.unwrap();

        let all = store.read_all_from(0, 100).await.unwrap();
        let sequences: Vec<i64> = all.iter().map(|e| e.global_sequence).collect();
        let mut sorted = sequences.clone();
        sorted.sort();
        assert_eq!(sequences, sorted);
    }

    #[tokio::test]
    async fn snapshot_round_trips_latest_only() {
        let store = InMemoryEventStore::default();
        let aggregate_id = Uuid::new_v4();
        store.save_snapshot(AggregateSnapshot::new(aggregate_id, 5, serde_json::json!({"v":5}))).await.unwrap();
        store.save_snapshot(AggregateSnapshot::new(aggregate_id, 10, serde_json::json!({"v":10}))).await.unwrap();

        let latest = store.get_latest_snapshot(aggregate_id).await.unwrap().unwrap();
        assert_eq!(latest.aggregate_version, 10);
    }

    #[tokio::test]
    async fn empty_event_list_does_not_advance_version() {
        let store = InMemoryEventStore::default();
        let stream = Uuid::new_v4();
        let version = store.append_to_stream(stream, vec![], 0).await.unwrap();
        assert_eq!(version, 0);
        assert_eq!(store.current_version(stream).await.unwrap(), 0);
    }
}
