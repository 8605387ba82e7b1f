//! HTTP client for collection pages and image files.
//!
//! [`SiteClient`] is the single fetch primitive both worker pools call
//! through. It turns every outcome into a distinguishable value:
//! - `Ok(body)` / `Ok(bytes)` for success
//! - [`FetchError::HttpStatus`] with status 429 and optional Retry-After
//! - [`FetchError::HttpStatus`] for any other non-success status
//! - [`FetchError::Timeout`] for an expired request timeout
//!
//! Retry and cooldown decisions are left to the caller.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{REFERER, RETRY_AFTER, USER_AGENT};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::error::FetchError;
use super::rate_limiter::RateLimiter;
use super::user_agent::random_user_agent;
use crate::config::PipelineConfig;

/// Suffix of the temporary file an image streams into before being renamed.
pub const PARTIAL_SUFFIX: &str = ".part";

/// HTTP client for the source site.
///
/// Create once and clone into workers; clones share the connection pool and
/// the rate limiter.
#[derive(Debug, Clone)]
pub struct SiteClient {
    client: Client,
    referer: String,
    limiter: Arc<RateLimiter>,
}

impl SiteClient {
    /// Builds a client from the pipeline's timeouts, referer and host spacing.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &PipelineConfig) -> Result<Self, FetchError> {
        Self::with_timeouts(
            config.site.referer(),
            config.request_timeout,
            config.connect_timeout,
            Arc::new(RateLimiter::new(config.host_spacing)),
        )
    }

    /// Builds a client with explicit settings.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn with_timeouts(
        referer: impl Into<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .gzip(true)
            .build()
            .map_err(|source| FetchError::Client { source })?;

        Ok(Self {
            client,
            referer: referer.into(),
            limiter,
        })
    }

    /// Shared per-host limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetches an HTML page and returns its body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on invalid URL, network failure, timeout, or a
    /// non-success status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let response = self.send_request(url, None).await?;
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::network(url, e)
            }
        })?;

        debug!(bytes = body.len(), "page fetched");
        Ok(body)
    }

    /// Streams `url` into `dest`, returning the bytes written.
    ///
    /// Bytes go to `{dest}.part` first and are renamed into place only once
    /// the body has been fully written, so `dest` never holds a truncated
    /// file. The partial file is removed on any error.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on invalid URL, network failure, timeout, a
    /// non-success status, or a filesystem error.
    #[instrument(skip(self, dest), fields(url = %url, dest = %dest.display()))]
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let response = self.send_request(url, Some(&self.referer)).await?;

        let part_path = partial_path(dest);
        let mut file = File::create(&part_path)
            .await
            .map_err(|e| FetchError::io(part_path.clone(), e))?;

        let streamed = stream_to_file(&mut file, response, url, &part_path).await;
        drop(file);

        let bytes_written = match streamed {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %part_path.display(), "removing partial file after error");
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(error);
            }
        };

        if let Err(e) = tokio::fs::rename(&part_path, dest).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(FetchError::io(dest, e));
        }

        debug!(bytes = bytes_written, "image saved");
        Ok(bytes_written)
    }

    async fn send_request(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<reqwest::Response, FetchError> {
        self.limiter.acquire(url).await;

        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent());
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::network(url, e)
            }
        })?;

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(FetchError::http_status_with_retry_after(
                url,
                response.status().as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }
}

/// `{dest}.part`
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Streams a response body into `file` in chunks, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, FetchError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::network(url, e)
            }
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}
