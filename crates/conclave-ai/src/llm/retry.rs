//! Exponential-backoff decorator around any `LlmClient` (spec §4.6 step 3,
//! model profile `retry_policy`, spec §7 `LLMTransientError`). Grounded on
//! `restflow-ai/src/llm/retry.rs`'s `RetryingLlmClient`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave_models::RetryPolicy;
use conclave_traits::{CompletionRequest, CompletionResponse, LlmClient, LlmError, LlmResult};

#[derive(Debug, Clone)]
pub struct LlmRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for LlmRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl From<RetryPolicy> for LlmRetryConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay_ms,
            max_delay_ms: 30_000,
            multiplier: policy.multiplier,
        }
    }
}

impl LlmRetryConfig {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

fn is_retryable(error: &LlmError) -> bool {
    matches!(error, LlmError::Transient(_) | LlmError::Timeout(_))
}

/// Wraps a `LlmClient` with exponential-backoff retry per the agent's
/// model profile `retry_policy` (spec §3, §4.6 step 3).
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: LlmRetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: LlmRetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
        let mut last_error = None;

        for attempt in 0..self.config.max_attempts {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !is_retryable(&error) || attempt + 1 == self.config.max_attempts {
                        return Err(error);
                    }
                    let delay = self.config.delay_for(attempt + 1);
                    tracing::warn!(
                        provider = self.inner.provider(),
                        model = self.inner.model(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying LLM request"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Transient("retries exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_progression_matches_backoff_shape() {
        let config = LlmRetryConfig {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(2), Duration::from_millis(400));
        assert_eq!(config.delay_for(3), Duration::from_millis(800));
    }

    struct FlakyClient {
        failures_left: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        fn provider(&self) -> &str {
            "mock"
        }
        fn model(&self) -> &str {
            "mock-model"
        }
        async fn complete(&self, _request: CompletionRequest) -> LlmResult<CompletionResponse> {
            if self
                .failures_left
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |n| if n > 0 { Some(n - 1) } else { None },
                )
                .is_ok()
            {
                return Err(LlmError::Transient("flaky".into()));
            }
            Ok(CompletionResponse {
                content: "ok".into(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let inner = Arc::new(FlakyClient {
            failures_left: std::sync::atomic::AtomicU32::new(2),
        });
        let retrying = RetryingLlmClient::new(
            inner,
            LlmRetryConfig {
                max_attempts: 5,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                multiplier: 1.0,
            },
        );
        let response = retrying
            .complete(CompletionRequest::new(vec![]))
            .await
            .unwrap();
        assert_eq!(response.content, "ok");
    }
}
