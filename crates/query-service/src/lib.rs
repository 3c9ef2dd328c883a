//! Query Service: wires the projection engine's three read models to the
//! event store and exposes [`projection_engine::QueryApi`] as the read-only
//! surface a transport binding (out of scope here) would embed.

use std::sync::Arc;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

use cqrs_core::CqrsResult;
use event_store::EventStore;
use projection_engine::{CategoryReadModelProjection, CheckpointStore, OrderReadModelProjection, PostgresCheckpointStore, ProductReadModelProjection, ProjectionEngine, QueryApi};

pub struct QueryService {
    pub engine: ProjectionEngine,
    pub queries: Arc<QueryApi>,
}

impl QueryService {
    pub fn new(store: Arc<dyn EventStore>, read_pool: Pool<ConnectionManager<PgConnection>>, batch_size: i64) -> CqrsResult<Self> {
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(PostgresCheckpointStore::new(read_pool.clone()));
        let mut engine = ProjectionEngine::new(store, checkpoints, batch_size);
        engine.register(Arc::new(ProductReadModelProjection::new(read_pool.clone())));
        engine.register(Arc::new(CategoryReadModelProjection::new(read_pool.clone())));
        engine.register(Arc::new(OrderReadModelProjection::new(read_pool.clone())));

        let queries = Arc::new(QueryApi::new(read_pool));
        Ok(Self { engine, queries })
    }
}
