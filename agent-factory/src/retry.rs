//! Transport-level retry with exponential backoff.
//!
//! This is the retry *inside* one logical LLM call: rate limits, overloaded
//! servers, dropped connections. It never changes the request. The review
//! loop in [`crate::factory`] is a different thing entirely: it regenerates
//! code with reviewer feedback and is visible as a state transition.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 4;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Default cap on a single delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Backoff parameters for one logical call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (so `max_retries + 1` attempts total).
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each subsequent one.
    pub base_delay_ms: u64,
    /// Upper bound for a single delay.
    pub max_delay_ms: u64,
    /// Symmetric jitter: 0.2 means ±20% around the exponential value.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Errors that know whether repeating the same request could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-suggested wait, if any (e.g. a `Retry-After` header).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Delay before retry number `retry` (1-based).
///
/// `min(max_delay, base_delay * 2^(retry - 1))`, then jittered.
pub fn backoff_delay(retry: u32, config: &RetryConfig) -> Duration {
    let exp = 2u64.saturating_pow(retry.saturating_sub(1));
    let raw = config
        .base_delay_ms
        .saturating_mul(exp)
        .min(config.max_delay_ms);

    let jitter = config.jitter_factor.clamp(0.0, 1.0);
    if jitter == 0.0 || raw == 0 {
        return Duration::from_millis(raw);
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_millis((raw as f64 * factor).round() as u64)
}

/// Honour a server-suggested wait, but never beyond `max_delay_ms`.
fn retry_delay(backoff: Duration, retry_after: Option<Duration>, config: &RetryConfig) -> Duration {
    let cap = Duration::from_millis(config.max_delay_ms);
    match retry_after {
        Some(ra) => backoff.max(ra.min(cap)),
        None => backoff,
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent. The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < config.max_retries => {
                retry += 1;
                let backoff = backoff_delay(retry, config);
                let delay = retry_delay(backoff, e.retry_after(), config);
                tracing::warn!(
                    retry,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "{what} failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
