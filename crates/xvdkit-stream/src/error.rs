//! Error types for container access and the page walk

use reqwest::StatusCode;
use thiserror::Error;
use xvdkit_crypto::CryptoError;
use xvdkit_formats::FormatError;

/// Errors raised while opening, reading or transforming a container
#[derive(Debug, Error)]
pub enum XvdError {
    /// Header or index failed structural decode
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A page does not match its hash entry
    #[error("Integrity mismatch at page 0x{page:x}")]
    IntegrityMismatch {
        /// Hashed page index
        page: u64,
    },

    /// Operation not possible on this container or handle
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Optional structure required by the operation is absent
    #[error("Not present: {0}")]
    NotPresent(&'static str),

    /// A keyed region needs a key entry the caller did not supply
    #[error("Region 0x{region:08x} is encrypted and no key was supplied")]
    KeyRequired {
        /// Region id
        region: u32,
    },

    /// Arithmetic overflow in offset math
    #[error("Arithmetic overflow while computing {0}")]
    Overflow(&'static str),

    /// Position or range beyond the end of the container
    #[error("Offset {offset} out of range (length {length})")]
    OutOfRange {
        /// Requested offset
        offset: u64,
        /// Container length
        length: u64,
    },

    /// Block or level index beyond the hash tree
    #[error("Index {index} out of range (limit {limit})")]
    IndexOutOfRange {
        /// Requested index
        index: u64,
        /// Exclusive limit
        limit: u64,
    },

    /// Operation attempted before the container reached the ready state
    #[error("Container not ready: {0}")]
    NotReady(&'static str),

    /// Key or cipher failure
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected HTTP status
    #[error("HTTP status: {0}")]
    HttpStatus(StatusCode),

    /// Server does not honour range requests
    #[error("Range requests not supported by server")]
    RangeNotSupported,

    /// Content-Range header missing or inconsistent
    #[error("Invalid or missing Content-Range header: {0}")]
    InvalidContentRange(String),

    /// Fewer bytes arrived than requested
    #[error("Incomplete read: expected {expected} bytes, received {actual}")]
    IncompleteRead {
        /// Requested byte count
        expected: u64,
        /// Received byte count
        actual: u64,
    },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Summary serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<FormatError> for XvdError {
    fn from(e: FormatError) -> Self {
        match e {
            FormatError::Overflow(what) => Self::Overflow(what),
            FormatError::IndexOutOfRange { index, limit } => Self::IndexOutOfRange { index, limit },
            FormatError::InvalidHashLevel { level, levels } => Self::IndexOutOfRange {
                index: level,
                limit: levels,
            },
            FormatError::UnsupportedXvdType(kind) => {
                Self::UnsupportedOperation(format!("hash tree addressing for container type {kind}"))
            }
            FormatError::Io(e) => Self::Io(e),
            other => Self::MalformedInput(other.to_string()),
        }
    }
}

impl From<CryptoError> for XvdError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::HardwareAesUnavailable => {
                Self::UnsupportedOperation("CPU has no AES instructions".to_string())
            }
            other => Self::Crypto(other),
        }
    }
}

impl XvdError {
    /// Whether a failed range request may succeed when repeated
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::HttpStatus(status) => {
                matches!(
                    *status,
                    StatusCode::TOO_MANY_REQUESTS
                        | StatusCode::INTERNAL_SERVER_ERROR
                        | StatusCode::BAD_GATEWAY
                        | StatusCode::SERVICE_UNAVAILABLE
                        | StatusCode::GATEWAY_TIMEOUT
                )
            }
            Self::IncompleteRead { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, XvdError>;
