//! Run counters shared by the worker pools.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic counters updated from concurrent worker tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    ids_added: AtomicUsize,
    collections_fetched: AtomicUsize,
    collections_failed: AtomicUsize,
    files_downloaded: AtomicUsize,
    files_skipped: AtomicUsize,
    files_failed: AtomicUsize,
    jobs_completed: AtomicUsize,
    jobs_failed: AtomicUsize,
    retried: AtomicUsize,
    cooldowns: AtomicUsize,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Ledger rows created by reconciliation.
    pub ids_added: usize,
    /// Collections whose metadata was stored.
    pub collections_fetched: usize,
    /// Metadata fetch failures (an id can fail once per pass).
    pub collections_failed: usize,
    /// Image files written.
    pub files_downloaded: usize,
    /// Image files already present on disk.
    pub files_skipped: usize,
    /// Image files that could not be downloaded.
    pub files_failed: usize,
    /// Collections fully downloaded.
    pub jobs_completed: usize,
    /// Collections left incomplete for a later run.
    pub jobs_failed: usize,
    /// Transient retries across all requests.
    pub retried: usize,
    /// Rate-limit cooldown sleeps across all requests.
    pub cooldowns: usize,
}

impl PipelineStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current values.
    #[must_use]
    pub fn snapshot(&self) -> PipelineReport {
        PipelineReport {
            ids_added: self.ids_added.load(Ordering::SeqCst),
            collections_fetched: self.collections_fetched.load(Ordering::SeqCst),
            collections_failed: self.collections_failed.load(Ordering::SeqCst),
            files_downloaded: self.files_downloaded.load(Ordering::SeqCst),
            files_skipped: self.files_skipped.load(Ordering::SeqCst),
            files_failed: self.files_failed.load(Ordering::SeqCst),
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            cooldowns: self.cooldowns.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn add_ids(&self, count: usize) {
        self.ids_added.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_collections_fetched(&self) {
        self.collections_fetched.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_collections_failed(&self) {
        self.collections_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_files_downloaded(&self) {
        self.files_downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_files_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_files_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_cooldowns(&self) {
        self.cooldowns.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new ids, {} collections fetched ({} failures), {} files downloaded, \
             {} skipped, {} failed, {} collections complete, {} incomplete",
            self.ids_added,
            self.collections_fetched,
            self.collections_failed,
            self.files_downloaded,
            self.files_skipped,
            self.files_failed,
            self.jobs_completed,
            self.jobs_failed,
        )
    }
}
