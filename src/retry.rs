//! Retry policy shared by embedding and text-generation calls.
//!
//! Delays grow exponentially from `base_delay`, multiplied by `multiplier` after
//! every failed attempt and capped at `max_delay`. Only errors reported as
//! retryable by [`crate::errors::SearchError::is_retryable`] trigger another attempt.

use std::future::Future;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::SearchResult;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,       // 1s, 2s, 4s
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay to wait after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay_ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the retry budget is exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> SearchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SearchResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        log::debug!("✅ {} succeeded after {} retries", label, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt >= self.max_retries {
                        if attempt > 0 {
                            log::warn!("❌ {} failed after {} attempts: {}", label, attempt + 1, error);
                        }
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    log::warn!(
                        "⚠️ {} attempt {} failed ({}), retrying in {:?}",
                        label,
                        attempt + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
