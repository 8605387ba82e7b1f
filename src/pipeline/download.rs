//! Image download worker pool.
//!
//! One work item is one collection. A worker walks the collection's image
//! URLs in order, skipping files already on disk, and flips the download
//! flag only when every file is present. Reaching the failure threshold
//! abandons the rest of the collection for this run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::retry::{RetryPolicy, request_with_retry, store_write_with_retry};
use super::stats::PipelineStats;
use super::work_queue::run_pool;
use crate::collection::{file_name_from_url, sanitize_dir_name};
use crate::config::Jitter;
use crate::site::SiteClient;
use crate::store::{CrawlRepository, DownloadJob};

/// Everything a download worker needs; shared by all workers.
pub(crate) struct DownloadContext {
    pub repo: Arc<dyn CrawlRepository>,
    pub client: SiteClient,
    pub base_path: PathBuf,
    pub policy: RetryPolicy,
    pub image_jitter: Jitter,
    pub failure_threshold: u32,
    pub stats: Arc<PipelineStats>,
}

/// How one collection's download job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobOutcome {
    /// Every file is on disk and the flag is set.
    Completed,
    /// Some files are missing; the flag stays unset.
    Incomplete {
        /// Files that failed this run.
        failures: u32,
        /// Whether the threshold cut the job short.
        aborted: bool,
    },
}

/// Runs every job through `workers` concurrent download workers.
pub(crate) async fn run_download_phase(
    ctx: Arc<DownloadContext>,
    jobs: Vec<DownloadJob>,
    workers: usize,
) {
    info!(queued = jobs.len(), workers, "image download phase starting");

    run_pool("download", jobs, workers, move |job: DownloadJob| {
        let ctx = Arc::clone(&ctx);
        async move {
            match download_collection(&ctx, &job).await {
                JobOutcome::Completed => ctx.stats.increment_jobs_completed(),
                JobOutcome::Incomplete { failures, aborted } => {
                    debug!(collection_id = %job.collection_id, failures, aborted, "job left pending");
                    ctx.stats.increment_jobs_failed();
                }
            }
        }
    })
    .await;
}

/// Directory for a collection. A job built by hand without a directory name
/// falls back to the sanitized display name, then to the id.
pub(crate) fn collection_dir(base_path: &Path, job: &DownloadJob) -> PathBuf {
    if !job.dir_name.is_empty() {
        return base_path.join(&job.dir_name);
    }
    let name = sanitize_dir_name(&job.name);
    if name.is_empty() {
        base_path.join(job.collection_id.as_str())
    } else {
        base_path.join(name)
    }
}

#[instrument(skip(ctx, job), fields(collection_id = %job.collection_id, images = job.urls.len()))]
pub(crate) async fn download_collection(ctx: &DownloadContext, job: &DownloadJob) -> JobOutcome {
    let dir = collection_dir(&ctx.base_path, job);
    if let Err(error) = tokio::fs::create_dir_all(&dir).await {
        warn!(dir = %dir.display(), error = %error, "cannot create collection directory");
        return JobOutcome::Incomplete {
            failures: 0,
            aborted: true,
        };
    }

    let mut failures = 0_u32;
    for url in &job.urls {
        let Some(file_name) = file_name_from_url(url) else {
            warn!(url = %url, "image URL has no usable file name");
            ctx.stats.increment_files_failed();
            failures += 1;
            if failures >= ctx.failure_threshold {
                break;
            }
            continue;
        };

        let dest = dir.join(file_name);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "already on disk");
            ctx.stats.increment_files_skipped();
            continue;
        }

        let delay = ctx.image_jitter.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = request_with_retry(
            &ctx.policy,
            ctx.client.rate_limiter(),
            &ctx.stats,
            url,
            || ctx.client.download_to_file(url, &dest),
        )
        .await;

        match result {
            Ok(bytes) => {
                debug!(path = %dest.display(), bytes, "image saved");
                ctx.stats.increment_files_downloaded();
            }
            Err(error) => {
                warn!(url = %url, error = %error, "image download failed");
                ctx.stats.increment_files_failed();
                failures += 1;
                if failures >= ctx.failure_threshold {
                    break;
                }
            }
        }
    }

    if failures >= ctx.failure_threshold {
        warn!(
            failures,
            threshold = ctx.failure_threshold,
            "too many failures, abandoning collection for this run"
        );
        return JobOutcome::Incomplete {
            failures,
            aborted: true,
        };
    }
    if failures > 0 {
        info!(failures, "collection incomplete, will retry next run");
        return JobOutcome::Incomplete {
            failures,
            aborted: false,
        };
    }

    match store_write_with_retry(|| ctx.repo.mark_download_complete(&job.collection_id)).await {
        Ok(()) => {
            info!("collection complete");
            JobOutcome::Completed
        }
        Err(error) => {
            warn!(error = %error, "files on disk but flag update failed");
            JobOutcome::Incomplete {
                failures: 0,
                aborted: false,
            }
        }
    }
}
