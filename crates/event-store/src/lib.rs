//! Append-only per-aggregate event store: optimistic concurrency on append,
//! snapshots, an in-process push bus, and batch archival. Pull-based catch-up
//! (`read_all_from`/`read_by_type`) is the durability boundary for projections
//! and sagas; the bus in this crate is best-effort only.

pub mod bus;
pub mod compress;
pub mod schema;
pub mod store;
pub mod types;
pub mod version_cache;

pub use bus::EventBus;
pub use compress::{compressor_for, SnapshotCompressor};
pub use store::{EventStore, InMemoryEventStore, NewEvent, PostgresEventStore};
pub use types::{AggregateSnapshot, CompressionKind, EventEnvelope, EventMetadata};
pub use version_cache::VersionCache;
