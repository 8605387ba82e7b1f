//! Retry, backoff and rate-limit cooldown for single requests.
//!
//! Every failed request is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - timeouts and connection failures, retried
//!   with exponential backoff up to `max_attempts` (initial attempt included)
//! - [`FailureType::RateLimited`] - HTTP 429, answered with a cooldown sleep
//!   that does not consume an attempt; bounded separately by `max_cooldowns`
//! - [`FailureType::Permanent`] - any other status, bad URL, local IO; never retried
//!
//! [`request_with_retry`] drives the loop for any fetch closure.
//! [`store_write_with_retry`] gives ledger writes a few more tries while
//! `SQLite` reports the database busy.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use super::stats::PipelineStats;
use crate::config::PipelineConfig;
use crate::site::{FetchError, RateLimiter, parse_retry_after};
use crate::store::StoreError;

/// Default maximum delay cap between transient retries.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to backoff delays.
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on retry: timeout, connection reset, DNS hiccup.
    Transient,
    /// HTTP 429; cool down and try again.
    RateLimited,
    /// Will not succeed on retry.
    Permanent,
}

/// Whether and when to try a request again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then send attempt number `attempt`.
    Retry {
        /// How long to wait.
        delay: Duration,
        /// 1-indexed number of the next attempt.
        attempt: u32,
    },
    /// Give up.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Bounds and delays for retrying one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    cooldown: Duration,
    max_cooldowns: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit bounds.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        cooldown: Duration,
        max_cooldowns: u32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            cooldown,
            max_cooldowns,
        }
    }

    /// Policy matching a pipeline configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_base_delay,
            config.rate_limit_cooldown,
            config.max_cooldowns,
        )
    }

    /// Maximum attempts, initial attempt included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fixed cooldown used when a 429 carries no usable Retry-After.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decides what follows a transient failure of attempt `attempt` (1-indexed).
    ///
    /// Rate limiting is not decided here; see [`Self::cooldown_after`].
    #[must_use]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.calculate_delay(attempt),
            attempt: attempt + 1,
        }
    }

    /// Decides what follows the `cooldowns_so_far + 1`-th 429 for one request.
    ///
    /// A parseable Retry-After overrides the fixed cooldown.
    #[must_use]
    pub fn cooldown_after(&self, retry_after: Option<&str>, cooldowns_so_far: u32) -> Option<Duration> {
        if cooldowns_so_far >= self.max_cooldowns {
            return None;
        }
        Some(
            retry_after
                .and_then(parse_retry_after)
                .unwrap_or(self.cooldown),
        )
    }

    /// `min(base * multiplier^(attempt-1), max_delay) + jitter`
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.base_delay.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64))
        };

        Duration::from_millis(capped_ms as u64) + jitter
    }
}

/// Classifies a fetch error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 429 | RateLimited |
/// | any other HTTP status | Permanent |
/// | Timeout | Transient |
/// | Network | Transient |
/// | IO, InvalidUrl, Client | Permanent |
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status: 429, .. } => FailureType::RateLimited,
        FetchError::Timeout { .. } | FetchError::Network { .. } => FailureType::Transient,
        FetchError::HttpStatus { .. }
        | FetchError::Io { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::Client { .. } => FailureType::Permanent,
    }
}

/// Runs `op` until it succeeds or the policy gives up.
///
/// Transient failures back off and consume an attempt. A 429 records the
/// pause with `limiter`, sleeps the cooldown and retries without consuming
/// an attempt. Permanent failures return immediately.
///
/// # Errors
///
/// Returns the last [`FetchError`] once no further retry is allowed.
#[instrument(skip(policy, limiter, stats, op), fields(url = %url))]
pub async fn request_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    stats: &PipelineStats,
    url: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1_u32;
    let mut cooldowns = 0_u32;

    loop {
        debug!(attempt, "sending request");
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match classify_error(&error) {
            FailureType::RateLimited => {
                let Some(delay) = policy.cooldown_after(error.retry_after(), cooldowns) else {
                    warn!(cooldowns, error = %error, "still rate limited, giving up");
                    return Err(error);
                };
                cooldowns += 1;
                stats.increment_cooldowns();
                limiter.record_rate_limit(url, delay).await;
                warn!(
                    cooldown_ms = delay.as_millis(),
                    cooldowns,
                    "rate limited, cooling down"
                );
                tokio::time::sleep(delay).await;
            }
            failure_type => match policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying request"
                    );
                    stats.increment_retried();
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, error = %error, "not retrying");
                    return Err(error);
                }
            },
        }
    }
}

/// Attempts allowed for a store write that keeps hitting a busy database.
const STORE_WRITE_ATTEMPTS: u32 = 3;

/// Pause before retrying a busy store write; grows linearly per attempt.
const STORE_BUSY_DELAY: Duration = Duration::from_millis(100);

/// Runs a ledger write, retrying while the database reports contention.
///
/// Only [`StoreError::Busy`] is retried. The writes passed here are
/// idempotent, so repeating one after a busy failure is safe.
///
/// # Errors
///
/// Returns the first non-busy error, or the last busy error after
/// `STORE_WRITE_ATTEMPTS` tries.
pub async fn store_write_with_retry<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1_u32;
    loop {
        match op().await {
            Err(error) if error.is_busy() && attempt < STORE_WRITE_ATTEMPTS => {
                let delay = STORE_BUSY_DELAY * attempt;
                warn!(attempt, delay_ms = delay.as_millis(), error = %error, "database busy, retrying write");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
