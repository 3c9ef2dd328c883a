//! # Circuit Breaker
//!
//! Guards an outbound call site (DB write, cross-service command dispatch) by
//! tripping open after a run of consecutive failures, cooling down, then probing
//! once before fully closing again. States: `closed`, `open`, `half-open`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening ("M" in the spec).
    pub failure_threshold: u32,
    /// Successful probes in half-open before closing.
    pub success_threshold: u32,
    /// Cooldown before an open circuit allows a half-open probe ("T").
    pub cooldown: Duration,
    /// Rolling window over which failures are counted.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            cooldown: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

/// A single named circuit breaker instance.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitState>>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_at: Mutex<Option<Instant>>,
    state_changed_at: Mutex<Instant>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_at: Mutex::new(None),
            state_changed_at: Mutex::new(Instant::now()),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, lazily transitioning Open -> HalfOpen once the cooldown elapses.
    pub async fn state(&self) -> CircuitState {
        let current = *self.state.read().await;
        if current == CircuitState::Open {
            let elapsed = self.state_changed_at.lock().unwrap().elapsed();
            if elapsed >= self.config.cooldown {
                self.transition_to(CircuitState::HalfOpen).await;
                return CircuitState::HalfOpen;
            }
        }
        current
    }

    /// Returns true if a call may proceed right now.
    pub async fn allow_call(&self) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        !matches!(self.state().await, CircuitState::Open)
    }

    pub async fn record_success(&self) {
        let current = *self.state.read().await;
        match current {
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed).await;
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let current = *self.state.read().await;
        match current {
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open).await;
            }
            CircuitState::Closed => {
                let now = Instant::now();
                let mut last = self.last_failure_at.lock().unwrap();
                let within_window = last.map(|t| now.duration_since(t) <= self.config.window).unwrap_or(false);
                *last = Some(now);
                drop(last);

                let count = if within_window {
                    self.failure_count.fetch_add(1, Ordering::SeqCst) + 1
                } else {
                    self.failure_count.store(1, Ordering::SeqCst);
                    1
                };
                if count >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open).await;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.state.write().await;
        let old = *state;
        if old == new_state {
            return;
        }
        *state = new_state;
        *self.state_changed_at.lock().unwrap() = Instant::now();
        match new_state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => self.success_count.store(0, Ordering::SeqCst),
            CircuitState::Open => self.failure_count.store(0, Ordering::SeqCst),
        }
        tracing::info!(breaker = %self.name, ?old, new = ?new_state, "circuit breaker state changed");
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub total_failures: u64,
}

/// A named collection of circuit breakers, one per outbound endpoint.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<std::collections::HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(std::collections::HashMap::new()),
            default_config,
        }
    }

    pub async fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().await.get(endpoint) {
            return b.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.default_config.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_and_half_opens_after_cooldown() {
        let cb = CircuitBreaker::new(
            "db",
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                cooldown: Duration::from_millis(50),
                window: Duration::from_secs(60),
            },
        );

        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(
            "rpc",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                cooldown: Duration::from_millis(10),
                window: Duration::from_secs(60),
            },
        );
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn registry_reuses_breakers_by_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("payments").await;
        let b = registry.get("payments").await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
