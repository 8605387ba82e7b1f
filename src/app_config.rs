//! Config file loading and CLI merge.
//!
//! Precedence for every setting: command-line flag, then config file, then
//! the library default.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use gallery_sync::config::DEFAULT_DB_FILE;
use gallery_sync::{Jitter, PipelineConfig, SiteConfig};

use crate::cli::Args;

/// Settings read from a `key = value` config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Ledger database file.
    pub db_path: Option<PathBuf>,
    pub fetch_workers: Option<u64>,
    pub download_workers: Option<u64>,
    pub max_attempts: Option<u64>,
    pub failure_threshold: Option<u64>,
    pub bootstrap_threshold: Option<u64>,
    /// Pause after a 429 without Retry-After.
    pub cooldown_secs: Option<u64>,
    /// 429 cooldowns tolerated per request.
    pub max_cooldowns: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    /// First backoff delay after a transient failure.
    pub retry_base_delay_ms: Option<u64>,
    /// Extra metadata passes.
    pub passes: Option<u64>,
    /// Minimum spacing between requests to one host; 0 disables.
    pub host_spacing_ms: Option<u64>,
    pub base_url: Option<String>,
    pub catalog_url: Option<String>,
    pub skip_sync: Option<bool>,
    pub metadata_only: Option<bool>,
    /// `false` removes the random pause before each request.
    pub jitter: Option<bool>,
}

/// Fully merged settings for one run.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub pipeline: PipelineConfig,
    pub db_path: PathBuf,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/gallery-sync/config.toml`
/// 2. `$HOME/.config/gallery-sync/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(env_var_non_empty_os("XDG_CONFIG_HOME"), env_var_non_empty_os("HOME"))
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(xdg_config_home) = xdg_config_home {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("gallery-sync")
                .join("config.toml"),
        );
    }
    let home = home?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("gallery-sync")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist; the default path is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }

    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let line_no = line_index + 1;
        let integer = || {
            parse_integer_u64(value)
                .with_context(|| format!("Invalid `{key}` value on line {line_no}"))
        };
        let string = || {
            parse_string_literal(value)
                .with_context(|| format!("Invalid `{key}` value on line {line_no}"))
        };
        let boolean = || {
            parse_boolean(value).with_context(|| format!("Invalid `{key}` value on line {line_no}"))
        };

        match key {
            "db_path" => cfg.db_path = Some(PathBuf::from(string()?)),
            "fetch_workers" => cfg.fetch_workers = Some(integer()?),
            "download_workers" => cfg.download_workers = Some(integer()?),
            "max_attempts" => cfg.max_attempts = Some(integer()?),
            "failure_threshold" => cfg.failure_threshold = Some(integer()?),
            "bootstrap_threshold" => cfg.bootstrap_threshold = Some(integer()?),
            "cooldown_secs" => cfg.cooldown_secs = Some(integer()?),
            "max_cooldowns" => cfg.max_cooldowns = Some(integer()?),
            "timeout_secs" => cfg.timeout_secs = Some(integer()?),
            "connect_timeout_secs" => cfg.connect_timeout_secs = Some(integer()?),
            "retry_base_delay_ms" => cfg.retry_base_delay_ms = Some(integer()?),
            "passes" => cfg.passes = Some(integer()?),
            "host_spacing_ms" => cfg.host_spacing_ms = Some(integer()?),
            "base_url" => cfg.base_url = Some(string()?),
            "catalog_url" => cfg.catalog_url = Some(string()?),
            "skip_sync" => cfg.skip_sync = Some(boolean()?),
            "metadata_only" => cfg.metadata_only = Some(boolean()?),
            "jitter" => cfg.jitter = Some(boolean()?),
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

fn narrow<T: TryFrom<u64>>(field: &str, value: u64) -> Result<T> {
    T::try_from(value).map_err(|_| anyhow::anyhow!("`{field}` value {value} is out of range"))
}

/// Merges CLI flags over the file config over library defaults.
///
/// The merged pipeline config is validated before it is returned.
pub fn resolve_config(args: &Args, file: Option<&FileConfig>) -> Result<ResolvedConfig> {
    let file = file.cloned().unwrap_or_default();
    let mut pipeline = PipelineConfig::with_base_path(&args.base_path);

    if let Some(n) = args.fetch_workers.map(u64::from).or(file.fetch_workers) {
        pipeline.fetch_workers = narrow("fetch_workers", n)?;
    }
    if let Some(n) = args.download_workers.map(u64::from).or(file.download_workers) {
        pipeline.download_workers = narrow("download_workers", n)?;
    }
    if let Some(n) = args.max_attempts.map(u64::from).or(file.max_attempts) {
        pipeline.max_attempts = narrow("max_attempts", n)?;
    }
    if let Some(n) = args.failure_threshold.map(u64::from).or(file.failure_threshold) {
        pipeline.failure_threshold = narrow("failure_threshold", n)?;
    }
    if let Some(n) = args.bootstrap_threshold.or(file.bootstrap_threshold) {
        pipeline.bootstrap_threshold = n;
    }
    if let Some(secs) = args.cooldown_secs.or(file.cooldown_secs) {
        pipeline.rate_limit_cooldown = Duration::from_secs(secs);
    }
    if let Some(n) = file.max_cooldowns {
        pipeline.max_cooldowns = narrow("max_cooldowns", n)?;
    }
    if let Some(secs) = args.timeout_secs.or(file.timeout_secs) {
        pipeline.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.connect_timeout_secs {
        pipeline.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = file.retry_base_delay_ms {
        pipeline.retry_base_delay = Duration::from_millis(ms);
    }
    if let Some(n) = args.passes.map(u64::from).or(file.passes) {
        pipeline.metadata_passes = narrow("passes", n)?;
    }
    if let Some(ms) = file.host_spacing_ms {
        pipeline.host_spacing = Duration::from_millis(ms);
    }
    if file.jitter == Some(false) {
        pipeline.page_jitter = Jitter::NONE;
        pipeline.image_jitter = Jitter::NONE;
    }

    let base_url = args.base_url.clone().or(file.base_url);
    let catalog_url = args.catalog_url.clone().or(file.catalog_url);
    pipeline.site = match (base_url, catalog_url) {
        (None, None) => SiteConfig::default(),
        (Some(base), None) => {
            let catalog = format!("{}/all/", base.trim_end_matches('/'));
            SiteConfig::new(base, catalog)
        }
        (None, Some(catalog)) => SiteConfig::new(SiteConfig::default().base_url, catalog),
        (Some(base), Some(catalog)) => SiteConfig::new(base, catalog),
    };

    pipeline.skip_sync = args.skip_sync || file.skip_sync.unwrap_or(false);
    pipeline.metadata_only = args.metadata_only || file.metadata_only.unwrap_or(false);

    pipeline
        .validate()
        .context("Invalid pipeline configuration")?;

    let db_path = args
        .db
        .clone()
        .or(file.db_path)
        .unwrap_or_else(|| args.base_path.join(DEFAULT_DB_FILE));

    Ok(ResolvedConfig { pipeline, db_path })
}
