//! # Error Taxonomy
//!
//! A single [`CqrsError`] enum covers every error kind named in the platform's
//! error handling design: commands rejected before touching state
//! ([`Validation`](CqrsError::Validation)), aggregate-level rule violations
//! ([`DomainViolation`](CqrsError::DomainViolation)), optimistic concurrency losses
//! ([`VersionConflict`](CqrsError::VersionConflict)), transient failures retried by
//! the resilient client ([`Transient`](CqrsError::Transient) /
//! [`ServiceUnavailable`](CqrsError::ServiceUnavailable)), and unrecoverable
//! conditions that stop a component's loop ([`Fatal`](CqrsError::Fatal)).
//!
//! Handlers never swallow an error outside this set: anything else is re-raised to
//! the top of its loop and logged with full context via `tracing::error!`.

use uuid::Uuid;

/// Result type used throughout the platform.
pub type CqrsResult<T> = Result<T, CqrsError>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum CqrsError {
    /// Command rejected before touching state.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Aggregate-level rule broken (duplicate name, invalid transition, deleted target...).
    #[error("domain violation ({code}): {message}")]
    DomainViolation { code: String, message: String },

    /// Optimistic concurrency loss on append.
    #[error("version conflict on stream {stream_id}: expected {expected}, actual {actual}")]
    VersionConflict {
        stream_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Timeout, circuit open, or connection reset — retried with backoff.
    #[error("transient error: {message}")]
    Transient { message: String },

    /// Retries exhausted; caller should treat as "service busy, try again".
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Circuit breaker is open for the named endpoint.
    #[error("circuit open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: String },

    /// Corrupt event, checkpoint ahead of global_sequence, schema mismatch — the
    /// component logs this and stops its loop; an operator must intervene.
    #[error("fatal error: {message}")]
    Fatal { message: String },

    /// Malformed event payload rejected by `AppendToStream`.
    #[error("invalid event: {message}")]
    InvalidEvent { message: String },

    /// Requested aggregate, stream, or saga does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Configuration failed to load or validate.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Failed to serialize or deserialize a payload.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Underlying database driver failure not covered by a more specific kind.
    #[error("database error: {message}")]
    Database { message: String },
}

impl CqrsError {
    pub fn domain(code: impl Into<String>, message: impl Into<String>) -> Self {
        CqrsError::DomainViolation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CqrsError::Validation {
            message: message.into(),
        }
    }

    /// Whether the resilient client should retry a call that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CqrsError::Transient { .. } | CqrsError::VersionConflict { .. })
    }

    /// The user-visible surface translation described in the error handling design:
    /// DomainViolation/Validation become descriptive messages, Transient and
    /// exhausted VersionConflict become "service busy, try again", Fatal becomes a
    /// 5xx-equivalent.
    pub fn user_message(&self) -> String {
        match self {
            CqrsError::Validation { message } => message.clone(),
            CqrsError::DomainViolation { message, .. } => message.clone(),
            CqrsError::ServiceUnavailable { .. } | CqrsError::CircuitOpen { .. } => {
                "service busy, try again".to_string()
            }
            CqrsError::Transient { .. } => "service busy, try again".to_string(),
            CqrsError::VersionConflict { .. } => "service busy, try again".to_string(),
            CqrsError::Fatal { .. } => "internal error".to_string(),
            _ => "internal error".to_string(),
        }
    }
}

impl From<diesel::result::Error> for CqrsError {
    fn from(error: diesel::result::Error) -> Self {
        CqrsError::Database {
            message: error.to_string(),
        }
    }
}

impl From<diesel::r2d2::PoolError> for CqrsError {
    fn from(error: diesel::r2d2::PoolError) -> Self {
        CqrsError::Database {
            message: format!("connection pool error: {error}"),
        }
    }
}

impl From<serde_json::Error> for CqrsError {
    fn from(error: serde_json::Error) -> Self {
        CqrsError::Serialization {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(CqrsError::Transient { message: "x".into() }.is_retryable());
        assert!(CqrsError::VersionConflict {
            stream_id: Uuid::nil(),
            expected: 1,
            actual: 2
        }
        .is_retryable());
        assert!(!CqrsError::Fatal { message: "x".into() }.is_retryable());
    }

    #[test]
    fn user_message_hides_internals() {
        let err = CqrsError::Fatal {
            message: "disk corrupt at offset 42".into(),
        };
        assert_eq!(err.user_message(), "internal error");
    }
}
