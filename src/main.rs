//! CLI entry point for gallery-sync.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gallery_sync::{Database, Pipeline, Store};
use tracing::{debug, info};

mod app_config;
mod cli;

use app_config::{load_file_config, resolve_config};
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let file_config = load_file_config(args.config.as_deref())?;
    let resolved = resolve_config(&args, file_config.as_ref())?;
    info!(
        base_path = %resolved.pipeline.base_path.display(),
        db = %resolved.db_path.display(),
        "gallery-sync starting"
    );

    std::fs::create_dir_all(&resolved.pipeline.base_path).with_context(|| {
        format!(
            "Cannot create base path '{}'",
            resolved.pipeline.base_path.display()
        )
    })?;
    if let Some(parent) = resolved.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create '{}'", parent.display()))?;
    }

    let db = Database::new(&resolved.db_path)
        .await
        .with_context(|| format!("Cannot open ledger '{}'", resolved.db_path.display()))?;
    let store = Store::new(db.clone());

    let pipeline = Pipeline::new(resolved.pipeline, Arc::new(store))?;
    let result = pipeline.run().await;
    db.close().await;
    let report = result?;

    info!(
        ids_added = report.ids_added,
        collections_fetched = report.collections_fetched,
        collections_failed = report.collections_failed,
        files_downloaded = report.files_downloaded,
        files_skipped = report.files_skipped,
        files_failed = report.files_failed,
        jobs_completed = report.jobs_completed,
        jobs_failed = report.jobs_failed,
        retried = report.retried,
        cooldowns = report.cooldowns,
        "Run complete"
    );

    Ok(())
}
