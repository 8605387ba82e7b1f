//! CLI argument definitions using clap derive macros.
//!
//! Every tunable is optional here so that a value given on the command line
//! can be told apart from one that should fall through to the config file.

use std::path::PathBuf;

use clap::Parser;

/// Mirror a gallery site's collections into a local directory.
///
/// Records every catalog entry in a SQLite ledger next to the images, fetches
/// collection metadata, then downloads each collection into its own folder.
/// Interrupted runs resume where they left off.
#[derive(Parser, Debug)]
#[command(name = "gallery-sync")]
#[command(author, version, about)]
pub struct Args {
    /// Directory receiving one sub-folder per collection
    pub base_path: PathBuf,

    /// Ledger database file (default: <BASE_PATH>/gallery.db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/gallery-sync/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Concurrent metadata fetch workers (1-50)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=50))]
    pub fetch_workers: Option<u8>,

    /// Concurrent image download workers (1-30)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=30))]
    pub download_workers: Option<u8>,

    /// Attempts per request, first attempt included (1-10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Failed images after which a collection is abandoned for this run
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub failure_threshold: Option<u32>,

    /// Ledger size below which the catalog sync resets all state
    #[arg(long)]
    pub bootstrap_threshold: Option<u64>,

    /// Seconds to pause after HTTP 429 without Retry-After (0-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=3600))]
    pub cooldown_secs: Option<u64>,

    /// Per-request timeout in seconds (1-600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub timeout_secs: Option<u64>,

    /// Extra metadata passes over collections that failed (0-10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub passes: Option<u32>,

    /// Site root; collection pages live at <BASE_URL>/<id>
    #[arg(long)]
    pub base_url: Option<String>,

    /// Catalog page listing every collection
    #[arg(long)]
    pub catalog_url: Option<String>,

    /// Work from the existing ledger without contacting the catalog
    #[arg(long)]
    pub skip_sync: bool,

    /// Stop after collection metadata is stored
    #[arg(long)]
    pub metadata_only: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
