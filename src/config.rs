//! Pipeline configuration: site endpoints, pool sizes, retry bounds and timeouts.
//!
//! Every constant the crawl relies on lives here as a default rather than being
//! hardcoded at the call site. The binary layers CLI flags and an optional
//! config file on top of [`PipelineConfig::default`].

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Default site root; collection pages live at `{base}/{collection_id}`.
pub const DEFAULT_BASE_URL: &str = "https://www.mzitu.com";

/// Default catalog index listing every collection.
pub const DEFAULT_CATALOG_URL: &str = "https://www.mzitu.com/all/";

/// Default number of concurrent metadata fetch workers.
pub const DEFAULT_FETCH_WORKERS: usize = 2;

/// Default number of concurrent image download workers.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;

/// Valid range for fetch workers.
pub const FETCH_WORKERS_RANGE: RangeInclusive<usize> = 1..=50;

/// Valid range for download workers.
pub const DOWNLOAD_WORKERS_RANGE: RangeInclusive<usize> = 1..=30;

/// Default attempts per request (initial attempt included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-collection failed-file count that aborts a download job.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Ledger size below which reconciliation wipes state and reseeds from the catalog.
pub const DEFAULT_BOOTSTRAP_THRESHOLD: u64 = 2000;

/// Fixed sleep after an HTTP 429 when the server gives no Retry-After.
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(10);

/// Cooldowns tolerated for one request before it is reported as failed.
pub const DEFAULT_MAX_COOLDOWNS: u32 = 5;

/// Default total request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default base delay of the exponential backoff between transient retries.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of mop-up passes over collections whose metadata fetch failed.
pub const DEFAULT_METADATA_PASSES: u32 = 3;

/// Default database file name, relative to the working directory.
pub const DEFAULT_DB_FILE: &str = "gallery.db";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric setting fell outside its allowed range.
    #[error("invalid value for `{field}`: {value} (expected {min}..={max})")]
    OutOfRange {
        /// Setting name as used in the config file.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// Inclusive lower bound.
        min: u64,
        /// Inclusive upper bound.
        max: u64,
    },

    /// A jitter window whose lower bound exceeds its upper bound.
    #[error("invalid jitter window for `{field}`: {min_ms}ms > {max_ms}ms")]
    InvalidJitter {
        /// Setting name.
        field: &'static str,
        /// Lower bound in milliseconds.
        min_ms: u64,
        /// Upper bound in milliseconds.
        max_ms: u64,
    },

    /// A URL setting that does not parse as an absolute http(s) URL.
    #[error("invalid URL for `{field}`: {value}")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Remote endpoints of the source site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    /// Site root, without trailing slash.
    pub base_url: String,
    /// Index pages enumerating collection links.
    pub catalog_urls: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            catalog_urls: vec![DEFAULT_CATALOG_URL.to_string()],
        }
    }
}

impl SiteConfig {
    /// Builds a site config rooted at `base_url` with a single catalog page.
    #[must_use]
    pub fn new(base_url: impl Into<String>, catalog_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            catalog_urls: vec![catalog_url.into()],
        }
    }

    /// URL of a collection page.
    #[must_use]
    pub fn collection_url(&self, collection_id: &str) -> String {
        format!("{}/{collection_id}", self.base_url.trim_end_matches('/'))
    }

    /// Referer sent with image requests; image hosts reject hotlinks without one.
    #[must_use]
    pub fn referer(&self) -> &str {
        &self.base_url
    }
}

/// Random delay window applied before a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    /// Lower bound.
    pub min: Duration,
    /// Upper bound.
    pub max: Duration,
}

impl Jitter {
    /// A window that never sleeps.
    pub const NONE: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    /// Window between `min_ms` and `max_ms` milliseconds.
    #[must_use]
    pub const fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms),
        }
    }

    /// Returns true when the window is empty.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.max.is_zero()
    }

    /// Picks a uniformly random delay inside the window.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}

/// Full set of tunables for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Remote endpoints.
    pub site: SiteConfig,
    /// Local directory receiving `{name}/{file}` trees.
    pub base_path: PathBuf,
    /// Concurrent metadata fetch workers.
    pub fetch_workers: usize,
    /// Concurrent image download workers.
    pub download_workers: usize,
    /// Attempts per request, initial attempt included.
    pub max_attempts: u32,
    /// Failed files after which a collection's download job is abandoned.
    pub failure_threshold: u32,
    /// Ledger row count below which reconciliation performs a full reset.
    pub bootstrap_threshold: u64,
    /// Sleep after a 429 without Retry-After.
    pub rate_limit_cooldown: Duration,
    /// Cooldowns tolerated per request.
    pub max_cooldowns: u32,
    /// First backoff delay after a transient failure; doubles per retry.
    pub retry_base_delay: Duration,
    /// Total per-request timeout.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Extra metadata passes after the first one.
    pub metadata_passes: u32,
    /// Delay window before each collection page request.
    pub page_jitter: Jitter,
    /// Delay window before each image request.
    pub image_jitter: Jitter,
    /// Minimum spacing between requests to one host; zero disables.
    pub host_spacing: Duration,
    /// Skip reconciliation against the remote catalog.
    pub skip_sync: bool,
    /// Stop after the metadata phase.
    pub metadata_only: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            base_path: PathBuf::from("."),
            fetch_workers: DEFAULT_FETCH_WORKERS,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            bootstrap_threshold: DEFAULT_BOOTSTRAP_THRESHOLD,
            rate_limit_cooldown: DEFAULT_RATE_LIMIT_COOLDOWN,
            max_cooldowns: DEFAULT_MAX_COOLDOWNS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            metadata_passes: DEFAULT_METADATA_PASSES,
            page_jitter: Jitter::from_millis(500, 1500),
            image_jitter: Jitter::from_millis(500, 2500),
            host_spacing: Duration::ZERO,
            skip_sync: false,
            metadata_only: false,
        }
    }
}

impl PipelineConfig {
    /// Default configuration downloading into `base_path`.
    #[must_use]
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    /// Checks every setting against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "fetch_workers",
            self.fetch_workers as u64,
            *FETCH_WORKERS_RANGE.start() as u64,
            *FETCH_WORKERS_RANGE.end() as u64,
        )?;
        check_range(
            "download_workers",
            self.download_workers as u64,
            *DOWNLOAD_WORKERS_RANGE.start() as u64,
            *DOWNLOAD_WORKERS_RANGE.end() as u64,
        )?;
        check_range("max_attempts", u64::from(self.max_attempts), 1, 10)?;
        check_range("failure_threshold", u64::from(self.failure_threshold), 1, 10_000)?;
        check_range("max_cooldowns", u64::from(self.max_cooldowns), 0, 100)?;
        #[allow(clippy::cast_possible_truncation)]
        check_range(
            "retry_base_delay_ms",
            self.retry_base_delay.as_millis() as u64,
            0,
            60_000,
        )?;
        check_range("metadata_passes", u64::from(self.metadata_passes), 0, 10)?;
        check_range("request_timeout_secs", self.request_timeout.as_secs(), 1, 600)?;
        check_range("connect_timeout_secs", self.connect_timeout.as_secs(), 1, 600)?;
        check_jitter("page_jitter", self.page_jitter)?;
        check_jitter("image_jitter", self.image_jitter)?;
        check_url("base_url", &self.site.base_url)?;
        for catalog_url in &self.site.catalog_urls {
            check_url("catalog_url", catalog_url)?;
        }
        Ok(())
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn check_jitter(field: &'static str, jitter: Jitter) -> Result<(), ConfigError> {
    if jitter.min > jitter.max {
        return Err(ConfigError::InvalidJitter {
            field,
            min_ms: jitter.min.as_millis() as u64,
            max_ms: jitter.max.as_millis() as u64,
        });
    }
    Ok(())
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_default_constants_match_observed_behaviour() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.bootstrap_threshold, 2000);
        assert_eq!(config.rate_limit_cooldown, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_fetch_workers_rejected() {
        let config = PipelineConfig {
            fetch_workers: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "fetch_workers",
                value: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_download_workers_over_cap_rejected() {
        let config = PipelineConfig {
            download_workers: 31,
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("download_workers"));
        assert!(err.to_string().contains("1..=30"));
    }

    #[test]
    fn test_inverted_jitter_rejected() {
        let config = PipelineConfig {
            image_jitter: Jitter::from_millis(900, 100),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidJitter { field: "image_jitter", .. })
        ));
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let config = PipelineConfig {
            site: SiteConfig::new("ftp://example.com", "https://example.com/all/"),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "base_url", .. })
        ));
    }

    #[test]
    fn test_collection_url_joins_without_double_slash() {
        let site = SiteConfig::new("https://example.com/", "https://example.com/all/");
        assert_eq!(site.collection_url("12345"), "https://example.com/12345");
    }

    #[test]
    fn test_jitter_none_is_empty() {
        assert!(Jitter::NONE.is_none());
        assert!(!Jitter::from_millis(0, 5).is_none());
    }

    #[test]
    fn test_jitter_sample_stays_in_window() {
        let jitter = Jitter::from_millis(20, 40);
        for _ in 0..50 {
            let delay = jitter.sample();
            assert!(delay >= Duration::from_millis(20));
            assert!(delay <= Duration::from_millis(40));
        }
        assert_eq!(Jitter::NONE.sample(), Duration::ZERO);
    }
}
