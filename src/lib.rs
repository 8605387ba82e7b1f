//! Gallery Sync Library
//!
//! Mirrors a gallery site to local disk: every collection listed in the
//! remote catalog is recorded in a `SQLite` ledger, its metadata fetched and
//! stored, and its images downloaded into `{base}/{collection name}/`.
//! Runs are resumable; work is driven entirely by the two ledger flags and
//! by which files already exist.
//!
//! # Architecture
//!
//! - [`config`] - Pipeline tunables, defaults and validation
//! - [`db`] - Database connection and schema management
//! - [`collection`] - Collection ids, image URL derivation, path sanitizing
//! - [`store`] - Status ledger and metadata persistence
//! - [`site`] - HTTP client, catalog enumeration and page parsing
//! - [`pipeline`] - Reconciliation plus the fetch and download worker pools

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collection;
pub mod config;
pub mod db;
pub mod pipeline;
pub mod site;
pub mod store;
#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use collection::{CollectionId, ImageDate, UrlTemplate};
pub use config::{ConfigError, Jitter, PipelineConfig, SiteConfig};
pub use db::{Database, DbError};
pub use pipeline::{Pipeline, PipelineError, PipelineReport, ReconcileOutcome};
pub use site::{FetchError, HtmlPageParser, PageParser, ParseError, SiteClient};
pub use store::{CrawlRepository, DownloadJob, Store, StoreError};
