//! # Configuration
//!
//! Typed configuration for every tunable named across the platform: event store
//! adapter selection and retention, saga timeouts, per-endpoint circuit breaker
//! tuning, command bus retry budget, and projection batch sizing. Loaded from
//! environment variables (with an optional `.env` file via `dotenvy`), validated
//! once at startup so a misconfigured deployment fails fast instead of surfacing
//! confusing errors deep in a handler.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CqrsError, CqrsResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub event_store: EventStoreConfig,
    pub saga: SagaConfig,
    pub command_bus: CommandBusConfig,
    pub projections: ProjectionConfigMap,
    #[serde(default)]
    pub circuit_breakers: HashMap<String, CircuitBreakerSettings>,
    pub database_url: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStoreConfig {
    /// Storage backend identifier; currently only `"postgres"` is implemented.
    pub adapter: String,
    /// Events older than this many days become eligible for archival.
    pub archive_after_days: u32,
    /// Snapshot cadence: every Nth event on a stream triggers a new snapshot.
    pub snapshot_frequency: u32,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            adapter: "postgres".to_string(),
            archive_after_days: 90,
            snapshot_frequency: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaConfig {
    pub default_timeout_ms: u64,
}

impl SagaConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBusConfig {
    pub max_retries: u32,
}

impl Default for CommandBusConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSettings {
    pub batch_size: u32,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self { batch_size: 200 }
    }
}

/// Per-projection-name overrides, e.g. `projection.order_stats.batch_size`.
pub type ProjectionConfigMap = HashMap<String, ProjectionSettings>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub threshold: u32,
    pub window_ms: u64,
    pub cooldown_ms: u64,
}

impl CircuitBreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to a `.env` file if present.
    pub fn from_env() -> CqrsResult<Self> {
        let _ = dotenvy::dotenv();

        let event_store = EventStoreConfig {
            adapter: env_or("EVENT_STORE_ADAPTER", "postgres"),
            archive_after_days: parse_env("EVENT_STORE_ARCHIVE_AFTER_DAYS", 90)?,
            snapshot_frequency: parse_env("EVENT_STORE_SNAPSHOT_FREQUENCY", 50)?,
        };

        let saga = SagaConfig {
            default_timeout_ms: parse_env("SAGA_DEFAULT_TIMEOUT_MS", 30_000)?,
        };

        let command_bus = CommandBusConfig {
            max_retries: parse_env("COMMAND_BUS_MAX_RETRIES", 3)?,
        };

        let database_url = env::var("DATABASE_URL").map_err(|_| CqrsError::Configuration {
            message: "DATABASE_URL must be set".to_string(),
        })?;

        let log_level = env_or("LOG_LEVEL", "info");

        let config = Self {
            event_store,
            saga,
            command_bus,
            projections: HashMap::new(),
            circuit_breakers: HashMap::new(),
            database_url,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Per-projection batch size, falling back to the built-in default when the
    /// deployment has not overridden it.
    pub fn projection_batch_size(&self, name: &str) -> u32 {
        self.projections
            .get(name)
            .map(|s| s.batch_size)
            .unwrap_or_else(|| ProjectionSettings::default().batch_size)
    }

    /// Per-endpoint circuit breaker settings, falling back to the library default.
    pub fn circuit_breaker_for(&self, endpoint: &str) -> CircuitBreakerSettings {
        self.circuit_breakers.get(endpoint).cloned().unwrap_or(CircuitBreakerSettings {
            threshold: 5,
            window_ms: 60_000,
            cooldown_ms: 30_000,
        })
    }

    pub fn validate(&self) -> CqrsResult<()> {
        if self.event_store.adapter != "postgres" {
            return Err(CqrsError::Configuration {
                message: format!("unsupported event_store.adapter '{}'", self.event_store.adapter),
            });
        }
        if self.event_store.snapshot_frequency == 0 {
            return Err(CqrsError::Configuration {
                message: "event_store.snapshot_frequency must be greater than 0".to_string(),
            });
        }
        if self.saga.default_timeout_ms == 0 {
            return Err(CqrsError::Configuration {
                message: "saga.default_timeout_ms must be greater than 0".to_string(),
            });
        }
        if self.command_bus.max_retries == 0 {
            return Err(CqrsError::Configuration {
                message: "command_bus.max_retries must be greater than 0".to_string(),
            });
        }
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(CqrsError::Configuration {
                message: format!(
                    "invalid log_level '{}', must be one of: {}",
                    self.log_level,
                    valid_log_levels.join(", ")
                ),
            });
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> CqrsResult<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| CqrsError::Configuration {
            message: format!("{key}: {e}"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_adapter() {
        let mut config = base_config();
        config.event_store.adapter = "mysql".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_snapshot_frequency() {
        let mut config = base_config();
        config.event_store.snapshot_frequency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = base_config();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn projection_batch_size_falls_back_to_default() {
        let config = base_config();
        assert_eq!(config.projection_batch_size("unknown"), 200);
    }

    fn base_config() -> EngineConfig {
        EngineConfig {
            event_store: EventStoreConfig::default(),
            saga: SagaConfig::default(),
            command_bus: CommandBusConfig::default(),
            projections: HashMap::new(),
            circuit_breakers: HashMap::new(),
            database_url: "postgres://localhost/test".to_string(),
            log_level: "info".to_string(),
        }
    }
}
