//! Per-host request spacing and Retry-After parsing.
//!
//! [`RateLimiter`] enforces a minimum delay between requests to the same host.
//! Requests to different hosts (catalog/page host vs. image CDN) never wait on
//! each other. A 429 recorded for a host pushes that host's next slot out so
//! every worker backs off, not only the one that was refused.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use gallery_sync::site::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_millis(250)));
//!
//! limiter.acquire("https://www.example.com/1001").await;
//! // Waits ~250ms
//! limiter.acquire("https://www.example.com/1002").await;
//! // Different host, proceeds immediately
//! limiter.acquire("https://img.example.net/2020/05/10a01.jpg").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per host.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(60);

/// Maximum honoured Retry-After value.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host rate limiter shared by all workers.
///
/// Wrap in `Arc` and clone into each worker task.
#[derive(Debug)]
pub struct RateLimiter {
    spacing: Duration,
    disabled: bool,
    /// Arc so the `DashMap` shard lock is released before awaiting the inner Mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

#[derive(Debug)]
struct HostState {
    /// Earliest instant the next request may start; `None` before the first request.
    next_allowed: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl HostState {
    fn new() -> Self {
        Self {
            next_allowed: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter spacing same-host requests by `spacing`.
    ///
    /// A zero spacing yields a disabled limiter.
    #[must_use]
    pub fn new(spacing: Duration) -> Self {
        if spacing.is_zero() {
            return Self::disabled();
        }
        debug!(spacing_ms = spacing.as_millis(), "creating rate limiter");
        Self {
            spacing,
            disabled: false,
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            spacing: Duration::ZERO,
            disabled: true,
            hosts: DashMap::new(),
        }
    }

    /// Returns whether spacing is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the configured spacing.
    #[must_use]
    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    fn host_state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone()
    }

    /// Waits until a request to `url`'s host is allowed, then claims the slot.
    ///
    /// The first request to a host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());
        let state = self.host_state(&host);

        let mut next_allowed = state.next_allowed.lock().await;
        if let Some(at) = *next_allowed {
            let now = Instant::now();
            if at > now {
                let delay = at - now;
                let cumulative = state.add_cumulative_delay(delay);
                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "spacing request"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive spacing delay for host"
                    );
                }
                tokio::time::sleep_until(at).await;
            }
        }
        *next_allowed = Some(Instant::now() + self.spacing);
    }

    /// Records a server-mandated pause for `url`'s host.
    ///
    /// Every later [`acquire`](Self::acquire) for the host waits at least until
    /// `delay` from now has passed.
    #[instrument(skip(self), fields(host))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());
        let state = self.host_state(&host);

        let until = Instant::now() + delay;
        let mut next_allowed = state.next_allowed.lock().await;
        if next_allowed.is_none_or(|at| at < until) {
            *next_allowed = Some(until);
        }
        debug!(host = %host, delay_ms = delay.as_millis(), "recorded server rate limit");
    }
}

/// Extracts the lowercase host from a URL, or `"unknown"` if it has none.
///
/// ```
/// use gallery_sync::site::rate_limiter::extract_host;
///
/// assert_eq!(extract_host("https://IMG.Example.net/a01.jpg"), "img.example.net");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value (integer seconds or HTTP-date).
///
/// Returns `None` when unparseable. Values beyond [`MAX_RETRY_AFTER`] are capped;
/// dates in the past yield zero.
///
/// ```
/// use std::time::Duration;
/// use gallery_sync::site::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => Some(
            datetime
                .duration_since(std::time::SystemTime::now())
                .map_or(Duration::ZERO, |d| d.min(MAX_RETRY_AFTER)),
        ),
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
