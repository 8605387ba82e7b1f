//! The three-phase crawl: reconcile, fetch metadata, download images.
//!
//! Each phase reads its work from the ledger, so a run interrupted at any
//! point resumes from the flags left behind by the previous one.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gallery_sync::{Database, PipelineConfig, Store};
//! use gallery_sync::pipeline::Pipeline;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::with_base_path("/srv/gallery");
//! let store = Store::new(Database::new(&config.base_path.join("gallery.db")).await?);
//! let report = Pipeline::new(config, Arc::new(store))?.run().await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

mod download;
mod error;
mod fetch;
mod reconcile;
mod retry;
mod stats;
mod work_queue;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

pub use error::{CollectionError, PipelineError};
pub use reconcile::{ReconcileOutcome, reconcile, valid_ids};
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error, request_with_retry};
pub use stats::{PipelineReport, PipelineStats};
pub use work_queue::run_pool;

use download::{DownloadContext, run_download_phase};
use fetch::{FetchContext, run_fetch_pass};

use crate::config::PipelineConfig;
use crate::site::{CatalogEnumerator, HtmlPageParser, PageParser, SiteClient};
use crate::store::CrawlRepository;

/// Name of the scratch directory used to check that the base path is writable.
const WRITE_CHECK_DIR: &str = ".gallery-sync-write-check";

/// Creates `base_path` if missing and checks that collection directories and
/// files can be written beneath it.
///
/// # Errors
///
/// Returns [`PipelineError::Environment`] naming the path that failed.
pub async fn prepare_base_path(base_path: &Path) -> Result<(), PipelineError> {
    let environment = |source| PipelineError::Environment {
        path: base_path.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(base_path)
        .await
        .map_err(environment)?;

    let check_dir = base_path.join(WRITE_CHECK_DIR);
    tokio::fs::create_dir_all(&check_dir)
        .await
        .map_err(environment)?;
    let check_file = check_dir.join("write-check");
    let written = tokio::fs::write(&check_file, b"ok").await;
    let _ = tokio::fs::remove_file(&check_file).await;
    let _ = tokio::fs::remove_dir(&check_dir).await;
    written.map_err(environment)?;

    debug!(path = %base_path.display(), "base path is writable");
    Ok(())
}

/// One configured crawl over a repository.
pub struct Pipeline {
    config: PipelineConfig,
    repo: Arc<dyn CrawlRepository>,
    client: SiteClient,
    parser: Arc<dyn PageParser>,
    stats: Arc<PipelineStats>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds a pipeline with the default HTTP client and page selectors.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] for out-of-range settings, or
    /// [`PipelineError::Client`] if the HTTP client cannot be built.
    pub fn new(config: PipelineConfig, repo: Arc<dyn CrawlRepository>) -> Result<Self, PipelineError> {
        config.validate()?;
        let client = SiteClient::new(&config).map_err(PipelineError::Client)?;
        Ok(Self::with_parts(
            config,
            repo,
            client,
            Arc::new(HtmlPageParser::default()),
        ))
    }

    /// Builds a pipeline from explicit parts.
    #[must_use]
    pub fn with_parts(
        config: PipelineConfig,
        repo: Arc<dyn CrawlRepository>,
        client: SiteClient,
        parser: Arc<dyn PageParser>,
    ) -> Self {
        Self {
            config,
            repo,
            client,
            parser,
            stats: Arc::new(PipelineStats::new()),
        }
    }

    /// Live counters for this pipeline.
    #[must_use]
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Runs every phase and returns the final counters.
    ///
    /// Per-collection failures are counted, not returned; they stay pending
    /// in the ledger for the next run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for invalid configuration, an unusable base
    /// path, or a store failure outside a single collection's work.
    #[instrument(skip(self), fields(base_path = %self.config.base_path.display()))]
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        self.config.validate()?;
        prepare_base_path(&self.config.base_path).await?;

        if self.config.skip_sync {
            info!("catalog sync skipped");
        } else {
            self.sync_catalog().await?;
        }

        self.fetch_metadata().await?;

        if self.config.metadata_only {
            info!("download phase skipped");
        } else {
            self.download_images().await?;
        }

        let report = self.stats.snapshot();
        debug!(%report, "run finished");
        Ok(report)
    }

    /// Reconciles the ledger against the remote catalog.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the ledger cannot be updated. An
    /// unreachable catalog is not an error.
    pub async fn sync_catalog(&self) -> Result<ReconcileOutcome, PipelineError> {
        let enumerator = CatalogEnumerator::new(
            self.client.clone(),
            Arc::clone(&self.parser),
            self.config.site.catalog_urls.clone(),
        );
        let policy = RetryPolicy::from_config(&self.config);
        let first_page = self
            .config
            .site
            .catalog_urls
            .first()
            .map_or(self.config.site.base_url.as_str(), String::as_str);

        let catalog = request_with_retry(
            &policy,
            self.client.rate_limiter(),
            &self.stats,
            first_page,
            || enumerator.enumerate(),
        )
        .await;

        let outcome =
            reconcile(self.repo.as_ref(), catalog, self.config.bootstrap_threshold).await?;
        self.stats
            .add_ids(usize::try_from(outcome.added()).unwrap_or(usize::MAX));
        Ok(outcome)
    }

    /// Fetches metadata for every pending collection.
    ///
    /// After the first pass, up to `metadata_passes` mop-up passes retry
    /// whatever is still pending; a pass that clears nothing ends the phase.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the pending list cannot be read.
    pub async fn fetch_metadata(&self) -> Result<(), PipelineError> {
        let ctx = Arc::new(FetchContext {
            repo: Arc::clone(&self.repo),
            client: self.client.clone(),
            parser: Arc::clone(&self.parser),
            site: self.config.site.clone(),
            policy: RetryPolicy::from_config(&self.config),
            page_jitter: self.config.page_jitter,
            stats: Arc::clone(&self.stats),
        });

        let mut previous: Option<usize> = None;
        for pass in 0..=self.config.metadata_passes {
            let pending = self.repo.pending_metadata().await?;
            if pending.is_empty() {
                break;
            }
            if previous.is_some_and(|count| pending.len() >= count) {
                warn!(pending = pending.len(), "metadata pass made no progress");
                break;
            }
            if pass > 0 {
                info!(pass, pending = pending.len(), "metadata mop-up pass");
            }
            previous = Some(pending.len());
            run_fetch_pass(Arc::clone(&ctx), pending, self.config.fetch_workers).await;
        }

        let remaining = self.repo.pending_metadata().await?.len();
        if remaining > 0 {
            warn!(remaining, "collections still without metadata");
        }
        Ok(())
    }

    /// Downloads every collection whose metadata is stored but whose images
    /// are not all on disk.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the job list cannot be read.
    pub async fn download_images(&self) -> Result<(), PipelineError> {
        let jobs = self.repo.pending_download_jobs().await?;
        if jobs.is_empty() {
            info!("no collections waiting for download");
            return Ok(());
        }

        let ctx = Arc::new(DownloadContext {
            repo: Arc::clone(&self.repo),
            client: self.client.clone(),
            base_path: self.config.base_path.clone(),
            policy: RetryPolicy::from_config(&self.config),
            image_jitter: self.config.image_jitter,
            failure_threshold: self.config.failure_threshold,
            stats: Arc::clone(&self.stats),
        });
        run_download_phase(ctx, jobs, self.config.download_workers).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::Store;

    async fn pipeline_at(base_path: &Path) -> Pipeline {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let mut config = PipelineConfig::with_base_path(base_path);
        config.skip_sync = true;
        Pipeline::new(config, Arc::new(store)).unwrap()
    }

    #[tokio::test]
    async fn test_prepare_base_path_creates_missing_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("nested").join("gallery");

        prepare_base_path(&base).await.unwrap();

        assert!(base.is_dir());
        assert!(!base.join(WRITE_CHECK_DIR).exists());
    }

    #[tokio::test]
    async fn test_run_base_path_is_a_file_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path().join("occupied");
        std::fs::write(&base, b"not a directory").unwrap();

        let err = pipeline_at(&base).await.run().await.unwrap_err();

        assert!(matches!(err, PipelineError::Environment { ref path, .. } if *path == base));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_run_existing_but_unwritable_base_path_is_fatal() {
        let base = Path::new("/proc/self");

        let err = pipeline_at(base).await.run().await.unwrap_err();

        assert!(matches!(err, PipelineError::Environment { .. }));
    }
}
