//! Query Service process: runs the projection catch-up loop forever,
//! keeping the read models fresh. The Query API itself
//! ([`query_service::QueryService::queries`]) is a library surface; binding
//! it to a transport is out of scope here.

use std::sync::Arc;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use tracing::error;

use cqrs_core::{telemetry, EngineConfig};
use event_store::{EventBus, EventStore, PostgresEventStore};
use query_service::QueryService;

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_STORE_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    telemetry::init_tracing("query-service");

    if let Err(err) = run(config).await {
        error!(error = %err, "query service exited with a fatal error");
        std::process::exit(EXIT_STORE_ERROR);
    }
}

async fn run(config: EngineConfig) -> cqrs_core::CqrsResult<()> {
    let bus = EventBus::new();
    let store: Arc<dyn EventStore> = Arc::new(PostgresEventStore::new(&config.database_url, 10, bus)?);

    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let read_pool: Pool<ConnectionManager<PgConnection>> = Pool::builder().max_size(10).build(manager).map_err(|e| cqrs_core::CqrsError::Configuration {
        message: format!("failed to build read-model connection pool: {e}"),
    })?;

    let batch_size = config.projection_batch_size("default") as i64;
    let service = QueryService::new(store, read_pool, batch_size)?;

    tracing::info!("query service ready, entering projection catch-up loop");

    tokio::select! {
        result = service.engine.run_forever() => {
            if let Err(err) = result {
                error!(error = %err, "projection engine loop exited");
                return Err(err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
