//! Retry with exponential backoff for calls to external model services.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

use crate::error::ServiceError;
use crate::vision::VisionAnalyzer;

/// Substrings (lowercase) marking an error as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection reset",
    "connect error",
    "timed out",
    "503",
    "429",
    "rate limit",
    "server error",
    "service unavailable",
    "temporary failure",
];

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Whether an error message looks like a transient network or capacity failure.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Run `operation` until it succeeds, fails fatally, or the attempt cap is hit.
///
/// Fatal errors return immediately. After the last attempt the final error is
/// returned unmodified.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = err.to_string();
                if !is_transient(&message) || attempt >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} error (attempt {}/{}): {}, retrying in {:?}",
                    label, attempt, max_attempts, message, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Vision capability wrapped with the retry policy.
pub struct RetryingVision {
    inner: Arc<dyn VisionAnalyzer>,
    policy: RetryPolicy,
}

impl RetryingVision {
    pub fn new(inner: Arc<dyn VisionAnalyzer>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl VisionAnalyzer for RetryingVision {
    async fn analyze_image(&self, image: &[u8], question: &str) -> Result<String, ServiceError> {
        with_retry(&self.policy, "vision", || {
            self.inner.analyze_image(image, question)
        })
        .await
    }
}
