//! Retry logic for transient backend failures
//!
//! Exponential backoff with jitter for rate limiting, service
//! unavailability, and network errors. Non-transient errors fail
//! immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::BackendError;

/// Configuration for retry behavior on transient errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first (default: 3)
    pub max_attempts: usize,
    /// Base delay in milliseconds for exponential backoff (default: 500ms)
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds (default: 30000ms)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Calculate backoff delay for a given attempt: the base delay doubles per
/// attempt up to the cap, with ±20% jitter on top
pub fn backoff_delay(attempt: usize, config: &RetryConfig) -> Duration {
    let doublings = attempt.saturating_sub(1).min(10) as u32;
    let capped = config
        .base_delay_ms
        .saturating_mul(2_u64.saturating_pow(doublings))
        .min(config.max_delay_ms);
    Duration::from_millis(jitter_ms(capped))
}

/// Counter feeding the jitter hash; the odd seed keeps successive values
/// well mixed even under concurrent bumps
static JITTER_STATE: AtomicU64 = AtomicU64::new(0x9e37_79b9_7f4a_7c15);

/// Apply ±20% jitter to a delay.
///
/// Runs one splitmix64 step over a process-wide counter, so concurrent
/// retry loops de-synchronize without any shared RNG or clock reads.
fn jitter_ms(delay_ms: u64) -> u64 {
    let mut word = JITTER_STATE.fetch_add(0x9e37_79b9_7f4a_7c15, Ordering::Relaxed);
    word = (word ^ (word >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    word = (word ^ (word >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    word ^= word >> 31;

    // Offset in [-200, 200] per mille of the delay
    let per_mille = (word % 401) as i64 - 200;
    let adjusted = delay_ms as i64 + (delay_ms as i64 * per_mille / 1000);
    adjusted.max(0) as u64
}

/// Retry an async operation with exponential backoff
///
/// Only retries on transient errors (rate limiting, service unavailable,
/// network). Other errors fail immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    mut op: F,
    config: &RetryConfig,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt >= config.max_attempts || !err.is_transient() {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, config);
                tracing::debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying backend call"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
