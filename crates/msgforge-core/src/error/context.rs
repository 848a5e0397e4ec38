//! Rich error context for structured logs: category/severity classification, a
//! correlation id, and arbitrary key/value context — independent of §1's Non-goals,
//! this is ambient stack every consumer loop needs to log DLQ transitions usefully.

use super::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    PermanentInput,
    PolicyDenied,
    ExternalUnavailable,
    IntegrityViolation,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Error with additional structured context, built up at each layer a `PipelineError`
/// crosses before it is logged or turned into a DLQ record.
#[derive(Debug)]
pub struct ErrorContext {
    pub error: PipelineError,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub trace_id: Option<String>,
    pub fields: HashMap<String, Value>,
}

impl ErrorContext {
    pub fn new(error: PipelineError) -> Self {
        let (category, severity) = categorize(&error);
        Self { error, category, severity, trace_id: None, fields: HashMap::new() }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.fields.insert(key.into(), json_value);
        }
        self
    }

    /// Flattened JSON suitable for a `tracing::error!(context = %ctx.to_json(), ...)` call
    /// or a DLQ `payload_snippet`.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": self.error.to_string(),
            "error_code": self.error.error_code(),
            "category": self.category,
            "severity": self.severity,
            "trace_id": self.trace_id,
            "fields": self.fields,
        })
    }
}

pub trait ErrorContextExt: Sized {
    fn context(self) -> ErrorContext;
    fn with_field(self, key: impl Into<String>, value: impl Serialize) -> ErrorContext;
}

impl ErrorContextExt for PipelineError {
    fn context(self) -> ErrorContext {
        ErrorContext::new(self)
    }

    fn with_field(self, key: impl Into<String>, value: impl Serialize) -> ErrorContext {
        ErrorContext::new(self).with_field(key, value)
    }
}

fn categorize(error: &PipelineError) -> (ErrorCategory, ErrorSeverity) {
    use PipelineError::*;
    match error {
        Transient { .. } => (ErrorCategory::Transient, ErrorSeverity::Warning),
        PermanentInput { .. } => (ErrorCategory::PermanentInput, ErrorSeverity::Error),
        PolicyDenied { .. } => (ErrorCategory::PolicyDenied, ErrorSeverity::Info),
        ExternalUnavailable { .. } => (ErrorCategory::ExternalUnavailable, ErrorSeverity::Error),
        IntegrityViolation { .. } => (ErrorCategory::IntegrityViolation, ErrorSeverity::Critical),
        Cancelled => (ErrorCategory::Cancelled, ErrorSeverity::Debug),
        DatabaseError { .. } => (ErrorCategory::Transient, ErrorSeverity::Error),
        SerializationError { .. } => (ErrorCategory::PermanentInput, ErrorSeverity::Error),
        ObjectStoreError { .. } => (ErrorCategory::Transient, ErrorSeverity::Error),
        EventBusError { .. } => (ErrorCategory::Transient, ErrorSeverity::Error),
        ConfigurationError { .. } => (ErrorCategory::PermanentInput, ErrorSeverity::Critical),
        ValidationError { .. } => (ErrorCategory::PermanentInput, ErrorSeverity::Warning),
        ChannelNotFound(_) => (ErrorCategory::PolicyDenied, ErrorSeverity::Info),
        UserNotSubscribed(_) => (ErrorCategory::PolicyDenied, ErrorSeverity::Info),
        SubscriptionInactive(_) => (ErrorCategory::PolicyDenied, ErrorSeverity::Info),
        QuotaExceeded { .. } => (ErrorCategory::PolicyDenied, ErrorSeverity::Warning),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_policy_denials_as_info() {
        let ctx = PipelineError::policy_denied("quota").context();
        assert_eq!(ctx.category, ErrorCategory::PolicyDenied);
        assert_eq!(ctx.severity, ErrorSeverity::Info);
    }

    #[test]
    fn json_includes_error_code_and_fields() {
        let ctx = PipelineError::transient("timeout")
            .with_field("attempt", 2)
            .with_trace_id("t-1");
        let json = ctx.to_json();
        assert_eq!(json["error_code"], "transient");
        assert_eq!(json["trace_id"], "t-1");
        assert_eq!(json["fields"]["attempt"], 2);
    }
}
