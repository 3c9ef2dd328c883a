//! Checkpointed projection runtime plus the Query Service's read-only API
//! surface. The Command Service never links this crate.

pub mod checkpoint;
pub mod engine;
pub mod projection;
pub mod query;
pub mod read_models;
pub mod schema;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, PostgresCheckpointStore};
pub use engine::ProjectionEngine;
pub use projection::{Projection, ProjectionState};
pub use query::{CategoryTreeNode, CategoryView, OrderStatsBucket, OrderView, Page, Pagination, ProductView, QueryApi, SortDirection};
pub use read_models::{CategoryReadModelProjection, OrderReadModelProjection, ProductReadModelProjection};
