//! Error types for the command-line front end

use std::path::PathBuf;
use thiserror::Error;
use xvdkit_crypto::{CryptoError, Uuid};
use xvdkit_stream::XvdError;

/// Argument and key-file validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Include and exclude region lists were both supplied
    #[error("--skip-region and --download-region cannot be combined")]
    ConflictingRegionFilters,

    /// Region id that is neither decimal nor `0x` hex
    #[error("Invalid region id '{0}': expected decimal or 0x-prefixed hex")]
    InvalidRegionId(String),

    /// Numeric option outside its accepted range
    #[error("Invalid value for --{option}: {reason}")]
    InvalidValue {
        /// Option name without dashes
        option: &'static str,
        /// Reason for rejection
        reason: String,
    },

    /// Operation needs a local file but a URL was given
    #[error("{operation} requires a local file, got {target}")]
    LocalFileRequired {
        /// Subcommand name
        operation: &'static str,
        /// Target as given
        target: String,
    },

    /// A key file could not be read
    #[error("Failed to load key file {path}: {source}")]
    KeyFile {
        /// Path of the key file
        path: PathBuf,
        /// Underlying key error
        #[source]
        source: CryptoError,
    },

    /// No key file matches the container's key id
    #[error("No key file for key id {0} (place <id>.cik under <keys dir>/Cik or pass --cik)")]
    KeyNotFound(Uuid),
}

/// Errors returned by the subcommands
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid arguments or key material
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Container access failed
    #[error(transparent)]
    Container(#[from] XvdError),

    /// Verification completed but found bad pages
    #[error("Verification failed: {mismatches} mismatched and {missing} missing pages")]
    VerificationFailed {
        /// Mismatched page count
        mismatches: usize,
        /// Missing page count
        missing: u64,
    },
}

/// Result type alias for subcommands
pub type Result<T> = std::result::Result<T, CliError>;
