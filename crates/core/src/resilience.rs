//! Resilience wrappers for the LLM gateway: retry with exponential backoff
//! and jitter, and a three-state circuit breaker.

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::llm::LlmGateway;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Run `operation` with exponential backoff. Only retryable errors (transient
/// I/O, transport) are retried; everything else surfaces immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt = attempt + 1, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                let exponent = policy.exponential_base.powi(attempt as i32);
                let mut delay = (policy.initial_delay * exponent).min(policy.max_delay);
                if policy.jitter > 0.0 {
                    delay += delay * policy.jitter * rand::thread_rng().gen::<f64>();
                }
                attempt += 1;
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_retries + 1,
                    delay_secs = delay,
                    error = %error,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
            Err(error) => {
                if attempt > 0 {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %error,
                        "Retries exhausted"
                    );
                }
                return Err(error);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Three-state breaker protecting a downstream service. Thread-safe; the
/// lock is held only around state transitions, never across calls.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Current state, promoting open → half-open once the timeout elapses.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == BreakerState::Open {
            let elapsed = inner.last_failure.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
            if elapsed >= self.config.timeout {
                inner.state = BreakerState::HalfOpen;
                inner.success_count = 0;
                info!(breaker = self.name.as_str(), "Circuit breaker entering half-open state");
            }
        }
        inner.state
    }

    /// Fails with `CircuitOpen` while the breaker is open.
    pub fn ensure_available(&self) -> Result<()> {
        if self.state() == BreakerState::Open {
            return Err(Error::CircuitOpen {
                service: self.name.clone(),
                retry_after_secs: self.config.timeout as u64,
            });
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failure_count = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.state = BreakerState::Closed;
                inner.success_count = 0;
                info!(breaker = self.name.as_str(), "Circuit breaker closed (service recovered)");
            }
        }
    }

    pub fn record_failure(&self, error: &Error) {
        // Caller mistakes say nothing about service health.
        if error.is_caller_fault() {
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.failure_count = 0;
                warn!(breaker = self.name.as_str(), "Circuit breaker reopened (probe failed)");
            }
            BreakerState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    breaker = self.name.as_str(),
                    failures = inner.failure_count,
                    timeout_secs = self.config.timeout,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure = None;
    }
}

// ---------------------------------------------------------------------------
// Resilient gateway wrapper
// ---------------------------------------------------------------------------

/// Wraps any gateway with the retry policy and circuit breaker from §5. The
/// breaker observes the outcome after retries are exhausted, so one flaky
/// call does not trip it.
pub struct ResilientGateway<G> {
    inner: G,
    retry: RetryConfig,
    breaker: CircuitBreaker,
}

impl<G: LlmGateway> ResilientGateway<G> {
    pub fn new(inner: G, retry: RetryConfig, breaker_config: CircuitBreakerConfig) -> Self {
        Self { inner, retry, breaker: CircuitBreaker::new("llm_gateway", breaker_config) }
    }

    async fn guarded<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker.ensure_available()?;
        match retry_with_backoff(&self.retry, operation_name, operation).await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(error) => {
                self.breaker.record_failure(&error);
                Err(error)
            }
        }
    }
}

#[async_trait]
impl<G: LlmGateway> LlmGateway for ResilientGateway<G> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.guarded("embed", || self.inner.embed(text)).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.guarded("embed_batch", || self.inner.embed_batch(texts)).await
    }

    async fn analyze_code_security(&self, context: &str, system_prompt: &str) -> Result<String> {
        self.guarded("analyze_code_security", || {
            self.inner.analyze_code_security(context, system_prompt)
        })
        .await
    }

    async fn validate_findings(
        &self,
        code: &str,
        findings_json: &str,
        context: &str,
    ) -> Result<String> {
        self.guarded("validate_findings", || {
            self.inner.validate_findings(code, findings_json, context)
        })
        .await
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.inner.count_tokens(text)
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }
}
