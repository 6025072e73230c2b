//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Buffer handed to the page cipher is not exactly one page
    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize {
        /// Expected page size in bytes
        expected: usize,
        /// Actual buffer size in bytes
        actual: usize,
    },

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The CPU lacks the AES instructions the page cipher requires
    #[error("Hardware AES is not available on this CPU")]
    HardwareAesUnavailable,

    /// Key not found in a key store
    #[error("Encryption key not found: {0}")]
    KeyNotFound(uuid::Uuid),

    /// Binary read error
    #[error("Binary parsing error: {0}")]
    BinRead(String),

    /// IO error while loading key material
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<binrw::Error> for CryptoError {
    fn from(e: binrw::Error) -> Self {
        Self::BinRead(e.to_string())
    }
}

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
