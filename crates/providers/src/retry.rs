//! Bounded retry with exponential backoff and a per-call timeout.
//!
//! Wraps any provider. Transient failures (timeout, rate limit, network,
//! 5xx) are retried up to `max_retries` times; anything else fails at once.
//! When retries run out the caller gets [`ProviderError::Exhausted`], which
//! surfaces to the user as `model_unavailable`.

use async_trait::async_trait;
use parley_core::error::ProviderError;
use parley_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How a [`RetryProvider`] retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Applied to every individual call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &parley_config::AgentSettings) -> Self {
        Self {
            max_retries: config.model_max_retries,
            base_delay: config.retry_base_delay(),
            call_timeout: config.model_timeout(),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based), honoring a server hint.
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        let hinted = match error {
            ProviderError::RateLimited { retry_after_secs } => Duration::from_secs(*retry_after_secs),
            _ => Duration::ZERO,
        };
        backoff.max(hinted).min(self.max_delay)
    }
}

/// A provider that retries transient failures of the wrapped provider.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.policy.max_retries + 1;
        let mut last_error = ProviderError::NotConfigured("no attempt made".into());

        for attempt in 0..attempts {
            let outcome = match tokio::time::timeout(self.policy.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "{operation} on '{}' took longer than {}s",
                    self.inner.name(),
                    self.policy.call_timeout.as_secs()
                ))),
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(provider = %self.inner.name(), operation, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                warn!(provider = %self.inner.name(), operation, error = %error, "Non-retryable provider error");
                return Err(error);
            }

            if attempt + 1 < attempts {
                let delay = self.policy.delay_for(attempt, &error);
                warn!(
                    provider = %self.inner.name(),
                    operation,
                    attempt = attempt + 1,
                    of = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            last_error = error;
        }

        warn!(provider = %self.inner.name(), operation, attempts, "Provider retries exhausted");
        Err(ProviderError::Exhausted {
            attempts,
            last_error: last_error.to_string(),
        })
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.run("complete", || self.inner.complete(request.clone())).await
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        self.run("embed", || self.inner.embed(request.clone())).await
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
