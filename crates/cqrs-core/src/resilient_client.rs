//! # Resilient Client
//!
//! Shared guarding primitive used by command handlers (outbound DB/RPC) and by
//! sagas (inter-aggregate command dispatch): per-call timeout, bounded retry with
//! exponential backoff + jitter, and a circuit breaker per named endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::{CqrsError, CqrsResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with full jitter: a uniform draw in `[0, cap)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis().saturating_mul(1u128 << attempt.min(20));
        let cap = exp.min(self.max_delay.as_millis());
        let jittered = rand::thread_rng().gen_range(0..=cap.max(1));
        Duration::from_millis(jittered as u64)
    }
}

/// Metadata attached to a guarded call, surfaced in telemetry.
#[derive(Debug, Clone, Default)]
pub struct CallMetadata {
    pub operation: String,
    pub ids: Vec<String>,
}

/// Guards an outbound call site with timeout, retry, and a named circuit breaker.
pub struct ResilientClient {
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ResilientClient {
    pub fn new(breaker_config: CircuitBreakerConfig, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            breakers: Arc::new(CircuitBreakerRegistry::new(breaker_config)),
            retry,
            timeout,
        }
    }

    /// Execute `f` through the named circuit breaker with timeout and retry.
    /// `f` is re-invoked on each attempt; only [`CqrsError::is_retryable`] errors
    /// are retried, everything else (including `Validation`/`DomainViolation`)
    /// propagates immediately.
    pub async fn call<F, Fut, T>(&self, endpoint: &str, metadata: CallMetadata, mut f: F) -> CqrsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CqrsResult<T>>,
    {
        let breaker = self.breakers.get(endpoint).await;

        for attempt in 0..self.retry.max_attempts {
            if !breaker.allow_call().await {
                tracing::warn!(endpoint, operation = %metadata.operation, "circuit open, failing fast");
                return Err(CqrsError::CircuitOpen {
                    endpoint: endpoint.to_string(),
                });
            }

            let outcome = tokio::time::timeout(self.timeout, f()).await;

            let result = match outcome {
                Ok(inner) => inner,
                Err(_) => Err(CqrsError::Transient {
                    message: format!("call to '{endpoint}' timed out after {:?}", self.timeout),
                }),
            };

            match result {
                Ok(value) => {
                    breaker.record_success().await;
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    breaker.record_failure().await;
                    let delay = self.retry.backoff_for_attempt(attempt);
                    tracing::warn!(
                        endpoint,
                        operation = %metadata.operation,
                        attempt,
                        ?delay,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    breaker.record_failure().await;
                    return Err(if err.is_retryable() {
                        CqrsError::ServiceUnavailable {
                            message: format!("'{endpoint}' exhausted retries: {err}"),
                        }
                    } else {
                        err
                    });
                }
            }
        }

        unreachable!("loop always returns before exhausting max_attempts iterations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let client = ResilientClient::new(
            CircuitBreakerConfig::default(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            Duration::from_secs(1),
        );
        let calls = AtomicU32::new(0);
        let result = client
            .call("db", CallMetadata::default(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CqrsError::Transient { message: "boom".into() })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_service_unavailable_after_exhaustion() {
        let client = ResilientClient::new(
            CircuitBreakerConfig {
                failure_threshold: 100,
                ..Default::default()
            },
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            Duration::from_secs(1),
        );
        let result: CqrsResult<()> = client
            .call("db", CallMetadata::default(), || async {
                Err(CqrsError::Transient { message: "down".into() })
            })
            .await;
        assert!(matches!(result, Err(CqrsError::ServiceUnavailable { .. })));
    }

    #[tokio::test]
    async fn does_not_retry_domain_violation() {
        let client = ResilientClient::new(
            CircuitBreakerConfig::default(),
            RetryPolicy::default(),
            Duration::from_secs(1),
        );
        let calls = AtomicU32::new(0);
        let result: CqrsResult<()> = client
            .call("handler", CallMetadata::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CqrsError::domain("dup_name", "already exists")) }
            })
            .await;
        assert!(matches!(result, Err(CqrsError::DomainViolation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
