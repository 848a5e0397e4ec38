//! Error handling: the [`PipelineError`] taxonomy (§7), per-provider circuit breakers
//! (§4.6, §4.8, §5), structured error context for logs, and the retry policy.

pub mod circuit_breaker;
pub mod context;
pub mod retry;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use context::{ErrorContext, ErrorContextExt};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use types::PipelineError;

pub type PipelineResult<T> = Result<T, PipelineError>;
