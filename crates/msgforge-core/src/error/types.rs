//! Error types for the msgforge pipeline.
//!
//! All fallible operations across the workspace return [`PipelineError`]. Variants map
//! directly onto the error-kind taxonomy in the pipeline's error handling design: each
//! kind has a distinct propagation and retry story (see [`PipelineError::category`]).

/// Primary error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Deadlocks, timeouts, 5xx from a collaborator — safe to retry a bounded number of times.
    #[error("transient error: {message}")]
    Transient { message: String },

    /// Schema violation or unknown enum value on an inbound event. Not retryable.
    #[error("bad input: {message}")]
    PermanentInput { message: String },

    /// Quota exceeded, SSRF denial, deny-list hit. Not an error for alerting purposes —
    /// callers should record a skip metric and ack, never DLQ.
    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    /// An external collaborator (vision/crawl provider) is unavailable; the circuit breaker
    /// should open and callers should fall back if a fallback path exists.
    #[error("external unavailable: {message}")]
    ExternalUnavailable { message: String },

    /// An upsert path hit a uniqueness conflict that should have been impossible by
    /// construction. Logged as a bug; the triggering event is acked, never retried.
    #[error("integrity violation: {message}")]
    IntegrityViolation { message: String },

    /// The operation was cancelled cooperatively (supervisor shutdown).
    #[error("cancelled")]
    Cancelled,

    #[error("database error: {message}")]
    DatabaseError { message: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },

    #[error("object store error: {message}")]
    ObjectStoreError { message: String },

    #[error("event bus error: {message}")]
    EventBusError { message: String },

    #[error("configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("user not subscribed to channel {0}")]
    UserNotSubscribed(String),

    #[error("subscription inactive for channel {0}")]
    SubscriptionInactive(String),

    #[error("quota exceeded for tenant {tenant_id}: used {used_bytes}, limit {limit_bytes}")]
    QuotaExceeded {
        tenant_id: String,
        used_bytes: u64,
        limit_bytes: u64,
    },
}

impl PipelineError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    pub fn permanent_input(message: impl Into<String>) -> Self {
        Self::PermanentInput { message: message.into() }
    }

    pub fn policy_denied(reason: impl Into<String>) -> Self {
        Self::PolicyDenied { reason: reason.into() }
    }

    pub fn external_unavailable(message: impl Into<String>) -> Self {
        Self::ExternalUnavailable { message: message.into() }
    }

    pub fn integrity_violation(message: impl Into<String>) -> Self {
        Self::IntegrityViolation { message: message.into() }
    }

    /// The error-kind code used in DLQ records and structured logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::PermanentInput { .. } => "bad_input",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::ExternalUnavailable { .. } => "external_unavailable",
            Self::IntegrityViolation { .. } => "integrity_violation",
            Self::Cancelled => "cancelled",
            Self::DatabaseError { .. } => "database_error",
            Self::SerializationError { .. } => "serialization_error",
            Self::ObjectStoreError { .. } => "object_store_error",
            Self::EventBusError { .. } => "event_bus_error",
            Self::ConfigurationError { .. } => "configuration_error",
            Self::ValidationError { .. } => "validation_error",
            Self::ChannelNotFound(_) => "channel_not_found",
            Self::UserNotSubscribed(_) => "user_not_subscribed",
            Self::SubscriptionInactive(_) => "subscription_inactive",
            Self::QuotaExceeded { .. } => "quota_exceeded",
        }
    }

    /// Whether a consumer loop should retry locally before DLQing, per the error handling
    /// design: only transient and external-unavailable errors are worth a local retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::ExternalUnavailable { .. })
    }

    /// Whether the triggering event should be acked without DLQing (policy denials are
    /// skip-metrics, not failures; cancellation finishes the current entry cleanly).
    pub fn is_ack_without_dlq(&self) -> bool {
        matches!(self, Self::PolicyDenied { .. } | Self::Cancelled | Self::IntegrityViolation { .. })
    }
}

impl From<diesel::result::Error> for PipelineError {
    fn from(error: diesel::result::Error) -> Self {
        PipelineError::DatabaseError { message: error.to_string() }
    }
}

impl From<diesel::r2d2::PoolError> for PipelineError {
    fn from(error: diesel::r2d2::PoolError) -> Self {
        PipelineError::DatabaseError { message: format!("connection pool: {error}") }
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(error: redis::RedisError) -> Self {
        PipelineError::EventBusError { message: error.to_string() }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::SerializationError { message: error.to_string() }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        PipelineError::ExternalUnavailable { message: error.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(PipelineError::transient("x").is_retryable());
        assert!(PipelineError::external_unavailable("x").is_retryable());
        assert!(!PipelineError::permanent_input("x").is_retryable());
        assert!(!PipelineError::policy_denied("x").is_retryable());
    }

    #[test]
    fn ack_without_dlq_kinds() {
        assert!(PipelineError::policy_denied("x").is_ack_without_dlq());
        assert!(PipelineError::Cancelled.is_ack_without_dlq());
        assert!(!PipelineError::transient("x").is_ack_without_dlq());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(PipelineError::transient("x").error_code(), "transient");
        assert_eq!(PipelineError::policy_denied("x").error_code(), "policy_denied");
        assert_eq!(
            PipelineError::QuotaExceeded { tenant_id: "t".into(), used_bytes: 1, limit_bytes: 2 }
                .error_code(),
            "quota_exceeded"
        );
    }
}
