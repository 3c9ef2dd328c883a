//! # Telemetry
//!
//! Structured logging init and the span helpers that every layer — command bus,
//! saga coordinator, projection engine — wraps its unit of work in. Exporting to
//! an external backend (Prometheus, Jaeger) is out of scope; this module only
//! establishes the logging/tracing spine that those exporters would consume.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize the global tracing subscriber: JSON-formatted events honoring
/// `RUST_LOG`, defaulting to `info`. Call once at process startup.
pub fn init_tracing(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = fmt::layer().with_target(true).with_thread_ids(false).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .init();

    tracing::info!(service = service_name, "telemetry initialized");
}

/// Span covering one command dispatch: aggregate type, aggregate id, command name.
pub fn command_span(aggregate_type: &str, aggregate_id: Uuid, command_name: &str) -> tracing::Span {
    tracing::info_span!(
        "command_dispatch",
        aggregate.type = aggregate_type,
        aggregate.id = %aggregate_id,
        command.name = command_name,
    )
}

/// Span covering one saga step execution, forward or compensating.
pub fn saga_step_span(saga_id: Uuid, saga_type: &str, step_name: &str, compensating: bool) -> tracing::Span {
    tracing::info_span!(
        "saga_step",
        saga.id = %saga_id,
        saga.type = saga_type,
        step.name = step_name,
        step.compensating = compensating,
    )
}

/// Span covering one projection batch application.
pub fn projection_batch_span(projection_name: &str, from_sequence: i64, batch_len: usize) -> tracing::Span {
    tracing::info_span!(
        "projection_batch",
        projection.name = projection_name,
        batch.from_sequence = from_sequence,
        batch.len = batch_len,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_carry_expected_fields() {
        // Smoke test: constructing a span without an active subscriber must not panic.
        let span = command_span("Product", Uuid::nil(), "CreateProduct");
        let _entered = span.enter();
    }
}
