//! Command-line configuration.
//!
//! Options come from CLI arguments with environment fallbacks:
//! - `XVDKIT_CIK`: explicit `.cik` key file
//! - `XVDKIT_KEYS_DIR`: directory holding a `Cik` subdirectory of key files
//! - `XVDKIT_OUTPUT`: extraction output directory
//! - `XVDKIT_WINDOW_PAGES`, `XVDKIT_REGION_CONCURRENCY`, `XVDKIT_RETRIES`:
//!   access tuning
//!
//! # Example
//!
//! ```no_run
//! use xvdkit_cli::Cli;
//!
//! let cli = Cli::from_args();
//! cli.validate().expect("Invalid configuration");
//! ```

use crate::error::ConfigError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use xvdkit_stream::{RegionFilter, RemoteConfig, StreamConfig, WalkOptions};

/// Inspect, verify, decrypt and extract XVD/XVC containers
#[derive(Debug, Clone, Parser)]
#[command(name = "xvdkit", version, propagate_version = true)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Pages held by each read-ahead window
    #[arg(long, global = true, env = "XVDKIT_WINDOW_PAGES", default_value_t = 16)]
    pub window_pages: usize,

    /// Regions extracted concurrently
    #[arg(long, global = true, env = "XVDKIT_REGION_CONCURRENCY", default_value_t = 1)]
    pub region_concurrency: usize,

    /// Attempts per HTTP range request
    #[arg(long, global = true, env = "XVDKIT_RETRIES", default_value_t = 3)]
    pub retries: u32,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the header, offsets, content index and segment table
    Info {
        /// Local path or http(s) URL
        target: String,

        /// List every segment instead of the first 4096
        #[arg(long)]
        all: bool,

        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Hash every data page against the hash tree
    Verify {
        /// Local path or http(s) URL
        target: String,
    },

    /// Decrypt a local container in place
    Decrypt {
        /// Local path of the container
        target: String,

        /// Key selection
        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Extract the segment files of every selected region
    Extract {
        /// Local path or http(s) URL
        target: String,

        /// Output directory
        #[arg(short, long, env = "XVDKIT_OUTPUT", default_value = ".")]
        output: PathBuf,

        /// Region id to leave out (repeatable)
        #[arg(long = "skip-region", value_name = "ID", value_parser = parse_region_id)]
        skip_regions: Vec<u32>,

        /// Region id to extract exclusively (repeatable)
        #[arg(long = "download-region", value_name = "ID", value_parser = parse_region_id)]
        download_regions: Vec<u32>,

        /// Write pages even when their hash does not match
        #[arg(long)]
        no_hash_check: bool,

        /// Key selection
        #[command(flatten)]
        keys: KeyArgs,
    },

    /// Copy the embedded container out
    ExtractEmbedded {
        /// Local path or http(s) URL
        target: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// Where decryption keys come from
#[derive(Debug, Clone, Default, Args)]
pub struct KeyArgs {
    /// Key file to use regardless of the container's key id
    #[arg(long, env = "XVDKIT_CIK")]
    pub cik: Option<PathBuf>,

    /// Directory whose `Cik` subdirectory holds `.cik` files
    #[arg(long, env = "XVDKIT_KEYS_DIR")]
    pub keys_dir: Option<PathBuf>,
}

/// Container location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// File on local disk
    Local(PathBuf),
    /// HTTP(S) URL served with range support
    Url(String),
}

impl Target {
    /// Classify a target argument
    pub fn parse(target: &str) -> Self {
        let lower = target.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(target.to_string())
        } else {
            Self::Local(PathBuf::from(target))
        }
    }
}

/// Parse a region id given as decimal or `0x` hex
pub fn parse_region_id(value: &str) -> Result<u32, ConfigError> {
    let trimmed = value.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|_| ConfigError::InvalidRegionId(value.to_string()))
}

impl Cli {
    /// Parse configuration from command-line arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A window size or the region concurrency is zero
    /// - The retry count is zero
    /// - Both `--skip-region` and `--download-region` are given
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_pages == 0 {
            return Err(ConfigError::InvalidValue {
                option: "window-pages",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.region_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                option: "region-concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retries == 0 {
            return Err(ConfigError::InvalidValue {
                option: "retries",
                reason: "must be at least 1".to_string(),
            });
        }

        if let Command::Extract {
            skip_regions,
            download_regions,
            ..
        } = &self.command
            && !skip_regions.is_empty()
            && !download_regions.is_empty()
        {
            return Err(ConfigError::ConflictingRegionFilters);
        }

        Ok(())
    }

    /// Container access settings for this invocation
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::default()
            .with_page_window_pages(self.window_pages)
            .with_hash_window_pages(self.window_pages)
            .with_region_concurrency(self.region_concurrency)
            .with_remote(RemoteConfig::default().with_max_retries(self.retries))
    }
}

/// Walk options for the extract subcommand
pub fn walk_options(
    skip_regions: &[u32],
    download_regions: &[u32],
    no_hash_check: bool,
) -> WalkOptions {
    let regions = if !download_regions.is_empty() {
        RegionFilter::Include(download_regions.to_vec())
    } else if !skip_regions.is_empty() {
        RegionFilter::Exclude(skip_regions.to_vec())
    } else {
        RegionFilter::All
    };

    WalkOptions::default()
        .with_skip_hash_check(no_hash_check)
        .with_regions(regions)
}
