//! Per-provider circuit breaker (vision, crawl) used by §4.6/§4.8 and the retry policy in §5.

use super::PipelineError;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Successes in half-open before the circuit closes again.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing with a half-open call.
    pub recovery: Duration,
    /// Sliding window for counting consecutive failures in the closed state.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery: Duration::from_secs(60),
            window: Duration::from_secs(60),
        }
    }
}

/// Per-provider circuit breaker. `call` short-circuits to [`PipelineError::ExternalUnavailable`]
/// while open; callers are expected to route that into their fallback path (OCR for vision,
/// skip for crawl) rather than retry.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
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
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_at: Mutex::new(None),
            state_changed_at: Mutex::new(Instant::now()),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> CircuitState {
        let state = *self.state.read().await;
        if state == CircuitState::Open {
            let changed_at = *self.state_changed_at.lock().unwrap();
            if changed_at.elapsed() >= self.config.recovery {
                self.transition_to(CircuitState::HalfOpen).await;
                return CircuitState::HalfOpen;
            }
        }
        state
    }

    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if self.state().await == CircuitState::Open {
            return Err(PipelineError::external_unavailable(format!(
                "circuit breaker '{}' is open",
                self.name
            )));
        }

        match f().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(error) => {
                self.on_failure().await;
                Err(error)
            }
        }
    }

    async fn on_success(&self) {
        match *self.state.read().await {
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

    async fn on_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        match *self.state.read().await {
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open).await;
            }
            CircuitState::Closed => {
                let now = Instant::now();
                let should_increment = {
                    let mut last = self.last_failure_at.lock().unwrap();
                    match *last {
                        Some(prev) if now.duration_since(prev) > self.config.window => {
                            self.failure_count.store(1, Ordering::SeqCst);
                            *last = Some(now);
                            false
                        }
                        _ => {
                            *last = Some(now);
                            true
                        }
                    }
                };

                if should_increment {
                    let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                    if count >= self.config.failure_threshold {
                        self.transition_to(CircuitState::Open).await;
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn transition_to(&self, new_state: CircuitState) {
        let mut state = self.state.write().await;
        let old_state = *state;
        if old_state == new_state {
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

        tracing::info!(
            breaker = %self.name,
            old_state = ?old_state,
            new_state = ?new_state,
            "circuit breaker state changed"
        );
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }
}

/// A named registry of circuit breakers, one per external provider.
pub struct CircuitBreakerRegistry {
    breakers: std::sync::RwLock<std::collections::HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: std::sync::RwLock::new(std::collections::HashMap::new()),
            default_config,
        }
    }

    pub fn get_or_create(&self, provider: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().unwrap().get(provider) {
            return existing.clone();
        }

        let mut write = self.breakers.write().unwrap();
        write
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, self.default_config.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn failing() -> Result<(), PipelineError> {
        Err(PipelineError::external_unavailable("boom"))
    }

    async fn succeeding() -> Result<(), PipelineError> {
        Ok(())
    }

    #[tokio::test]
    async fn opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(
            "vision",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 1,
                recovery: Duration::from_millis(20),
                window: Duration::from_secs(60),
            },
        );

        for _ in 0..3 {
            let _ = breaker.call(failing).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        // short-circuits without calling the closure
        let result = breaker.call(succeeding).await;
        assert!(matches!(result, Err(PipelineError::ExternalUnavailable { .. })));

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let result = breaker.call(succeeding).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            "crawl",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                recovery: Duration::from_millis(10),
                window: Duration::from_secs(60),
            },
        );

        let _ = breaker.call(failing).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let _ = breaker.call(failing).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[test]
    fn registry_reuses_breakers_by_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("vision");
        let b = registry.get_or_create("vision");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
