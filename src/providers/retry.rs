// Retry with exponential backoff and jitter for LLM calls

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::types::ProviderError;
use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    ///
    /// With jitter the delay is scaled by a random factor in [0.5, 1.0].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.powi(attempt as i32);
        let raw = self.base_delay.as_secs_f64() * factor;
        let capped = raw.min(self.max_delay.as_secs_f64());
        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Whether an error is worth another attempt
///
/// Client errors other than 429 are final; everything else (network,
/// server errors, timeouts) is retried. The first `ProviderError` found in
/// the context chain decides.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    let provider_error = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ProviderError>());
    match provider_error {
        Some(ProviderError::Http { status, .. }) => *status == 429 || *status >= 500,
        Some(ProviderError::InvalidResponse(_)) => false,
        Some(ProviderError::MissingApiKey) => false,
        None => true,
    }
}

/// Run `operation` until it succeeds, fails with a final error, or the
/// retry budget is spent
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
