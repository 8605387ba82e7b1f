//! Pipeline error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::site::{FetchError, ParseError};
use crate::store::StoreError;

/// Failures that end a whole run.
///
/// Per-collection problems never surface here; they are logged, counted and
/// left for the next run by their unset ledger flag.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is out of range.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error("cannot build HTTP client: {0}")]
    Client(FetchError),

    /// The ledger or metadata store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The local environment cannot support a run (e.g. unwritable base path).
    #[error("cannot prepare {path}: {source}")]
    Environment {
        /// Path that could not be prepared.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Why one collection's metadata could not be stored this pass.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The page lacked a required field.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The metadata could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_environment_message() {
        let err = PipelineError::Environment {
            path: PathBuf::from("/readonly/gallery"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/readonly/gallery"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_collection_error_is_transparent() {
        let err = CollectionError::from(ParseError::MissingField("title"));
        assert_eq!(err.to_string(), "missing title on collection page");
    }
}
