//! Retrying LLM provider wrapper
//!
//! Applies a per-attempt timeout and retries transient failures with
//! exponential backoff. Callers above this layer never retry themselves:
//! they either get a response or a terminal error.
//!
//! A timed-out attempt is dropped, which cancels the in-flight request.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{LlmError, LlmProvider, LlmRequest, LlmResponse};

/// Retry policy for outbound calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Upper bound on a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Factor applied to the delay after each retry
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_factor: 1.5,
        }
    }
}

impl RetryConfig {
    /// No retries, short timeout
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay to wait before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.retry_delay
            .mul_f64(self.backoff_factor.max(1.0).powi(retry as i32))
    }
}

/// Provider wrapper adding timeout, retry and backoff
#[derive(Debug)]
pub struct RetryingProvider<P: LlmProvider> {
    inner: Arc<P>,
    config: RetryConfig,
    total_requests: AtomicU64,
    total_retries: AtomicU64,
    total_failures: AtomicU64,
}

impl<P: LlmProvider> RetryingProvider<P> {
    pub fn new(provider: P, config: RetryConfig) -> Self {
        Self::from_arc(Arc::new(provider), config)
    }

    /// Wrap a provider that is shared elsewhere
    pub fn from_arc(provider: Arc<P>, config: RetryConfig) -> Self {
        Self {
            inner: provider,
            config,
            total_requests: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// Wrap with the default policy
    pub fn wrap(provider: P) -> Self {
        Self::new(provider, RetryConfig::default())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// (requests, retries, terminal failures)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.total_retries.load(Ordering::Relaxed),
            self.total_failures.load(Ordering::Relaxed),
        )
    }

    async fn attempt(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        match tokio::time::timeout(self.config.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.config.timeout)),
        }
    }

    fn fail(&self, error: LlmError) -> Result<LlmResponse, LlmError> {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        Err(error)
    }
}

#[async_trait]
impl<P: LlmProvider + 'static> LlmProvider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut retry = 0;

        loop {
            match self.attempt(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_transient() => {
                    tracing::warn!(provider = %self.inner.name(), error = %e, "Non-retryable LLM failure");
                    return self.fail(e);
                }
                Err(e) if retry >= self.config.max_retries => {
                    tracing::warn!(
                        provider = %self.inner.name(),
                        attempts = retry + 1,
                        error = %e,
                        "LLM retries exhausted"
                    );
                    return self.fail(LlmError::RetriesExhausted {
                        attempts: retry + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.config.delay_for(retry);
                    tracing::info!(
                        provider = %self.inner.name(),
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient LLM failure, retrying with backoff"
                    );
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("evoprompt_llm_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProvider;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            timeout: Duration::from_millis(200),
            max_retries,
            retry_delay: Duration::from_millis(1),
            backoff_factor: 1.5,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let config = RetryConfig {
            retry_delay: Duration::from_millis(1000),
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for(1), Duration::from_millis(1500));
        assert_eq!(config.delay_for(2), Duration::from_millis(2250));
    }

    #[tokio::test]
    async fn test_passes_through() {
        let provider = RetryingProvider::new(MockProvider::constant("ok"), fast(2));
        assert_eq!(provider.ask("hi").await.unwrap(), "ok");
        assert_eq!(provider.stats(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let mock = Arc::new(MockProvider::flaky(2, "recovered"));
        let provider = RetryingProvider::from_arc(mock.clone(), fast(3));

        assert_eq!(provider.ask("hi").await.unwrap(), "recovered");
        assert_eq!(mock.calls(), 3);
        assert_eq!(provider.stats(), (1, 2, 0));
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let mock = Arc::new(MockProvider::flaky(10, "never"));
        let provider = RetryingProvider::from_arc(mock.clone(), fast(2));

        let err = provider.ask("hi").await.unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let mock = Arc::new(MockProvider::failing("bad request"));
        let provider = RetryingProvider::from_arc(mock.clone(), fast(5));

        let err = provider.ask("hi").await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_terminal() {
        let mock = MockProvider::constant("slow").with_latency(Duration::from_secs(5));
        let provider = RetryingProvider::new(mock, fast(1));

        let err = provider.ask("hi").await.unwrap_err();
        match err {
            LlmError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, LlmError::Timeout(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
