use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards a flaky downstream (the message broker). After enough consecutive
// failures calls are rejected without being attempted until a cool-down has
// passed; then a trial period decides whether to close again.
//
//   Closed --(failure_threshold failures)--> Open
//   Open   --(cool_down elapsed)-----------> HalfOpen
//   HalfOpen --(success_threshold successes)--> Closed
//   HalfOpen --(any failure)----------------> Open
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric form for the `circuit_breaker_state` gauge.
    pub fn gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// How long to stay open before allowing a trial call
    pub cool_down: Duration,
    /// Trial successes needed to close from half-open
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    inner: Arc<Mutex<Inner>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Operation failed: {0}")]
    OperationFailed(E),

    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
        }
    }

    /// Run `operation` unless the circuit is open. The outcome is recorded.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        self.admit().await?;
        let result = operation.await;
        self.settle(result).await
    }

    /// Like [`CircuitBreaker::call`], but gives up after `limit` and counts
    /// that as a failure.
    ///
    /// Callers wrapping `call` in their own timeout drop the operation before
    /// its outcome is recorded, so a hanging downstream would never trip the
    /// breaker. Use this instead.
    pub async fn call_with_timeout<F, T, E>(
        &self,
        limit: Duration,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        self.admit().await?;
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => self.settle(result).await,
            Err(_) => {
                tracing::debug!(breaker = self.name, ?limit, "Guarded call timed out");
                self.record_failure().await;
                Err(CircuitBreakerError::TimedOut(limit))
            }
        }
    }

    async fn settle<T, E>(&self, result: Result<T, E>) -> Result<T, CircuitBreakerError<E>> {
        match result {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let cooled = inner
            .opened_at
            .map_or(true, |at| at.elapsed() >= self.config.cool_down);
        if !cooled {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        tracing::info!(breaker = self.name, "Circuit breaker half-open, allowing trial calls");
        inner.state = CircuitState::HalfOpen;
        inner.success_count = 0;
        Ok(())
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        breaker = self.name,
                        successes = inner.success_count,
                        "Circuit breaker closed"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            // a call admitted before another one tripped the breaker
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                tracing::warn!(
                    breaker = self.name,
                    failures = inner.failure_count,
                    "Circuit breaker opened"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = self.name, "Trial call failed, reopening circuit");
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        tracing::info!(breaker = self.name, "Circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
    }
}
