//! Command Service process. Startup order follows the platform-wide layering:
//! store -> bus -> projections (read-only, for pre-checks) -> saga coordinator
//! -> command bus. Shutdown is the reverse: stop accepting new sagas/commands
//! before the store connection pool is dropped.

use std::sync::Arc;
use std::time::Duration;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use tracing::{error, info};

use aggregate_runtime::{AggregateRepository, CategoryState, CommandBus, IdempotencyCache, OrderState, ProductState};
use command_service::{AlwaysSucceedsCollaborator, CommandService, CommandServiceDispatcher};
use cqrs_core::{telemetry, EngineConfig};
use event_store::{EventBus, EventStore, PostgresEventStore};
use projection_engine::QueryApi;
use saga_coordinator::{order_fulfillment, SagaCoordinator};

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

    telemetry::init_tracing("command-service");

    if let Err(err) = run(config).await {
        error!(error = %err, "command service exited with a fatal error");
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
    let queries = Arc::new(QueryApi::new(read_pool));

    let idempotency = Arc::new(IdempotencyCache::default());

    let products: CommandBus<ProductState> = CommandBus::new(AggregateRepository::new(Arc::clone(&store), config.event_store.snapshot_frequency as i64), Arc::clone(&idempotency))
        .with_max_retries(config.command_bus.max_retries);
    let categories: CommandBus<CategoryState> = CommandBus::new(AggregateRepository::new(Arc::clone(&store), config.event_store.snapshot_frequency as i64), Arc::clone(&idempotency))
        .with_max_retries(config.command_bus.max_retries);
    let orders = Arc::new(
        CommandBus::<OrderState>::new(AggregateRepository::new(Arc::clone(&store), config.event_store.snapshot_frequency as i64), Arc::clone(&idempotency))
            .with_max_retries(config.command_bus.max_retries),
    );

    let dispatcher = Arc::new(CommandServiceDispatcher::new(
        Arc::new(AlwaysSucceedsCollaborator),
        Arc::new(AlwaysSucceedsCollaborator),
        Arc::new(AlwaysSucceedsCollaborator),
        Arc::clone(&orders),
    ));
    let mut coordinator = SagaCoordinator::new(Arc::clone(&store), dispatcher);
    coordinator.register(order_fulfillment::definition());
    let coordinator = Arc::new(coordinator);

    // ResumeAll: nothing to enumerate yet without a saga index read model, so
    // this starts fresh on every restart. TODO: list non-terminal saga ids
    // from a lightweight read model once one exists, then call resume_all.

    // `service` is the command-dispatch surface a transport binding (gRPC,
    // HTTP) would embed; wiring a transport in front of it is out of scope
    // for this process, so it only needs to stay constructed and alive here.
    let _service = Arc::new(CommandService::new(products, categories, orders, Arc::clone(&coordinator), queries));

    info!("command service ready");

    let timeout_sweeper = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                if let Err(err) = coordinator.tick_timeouts().await {
                    error!(error = %err, "saga timeout sweep failed");
                }
            }
        })
    };

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    timeout_sweeper.abort();
    Ok(())
}
