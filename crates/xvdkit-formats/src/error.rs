//! Error types for container layout parsing and addressing

use thiserror::Error;

/// Errors that can occur when decoding container structures or deriving layout
#[derive(Debug, Error)]
pub enum FormatError {
    /// Invalid header magic (expected "msft-xvd")
    #[error("Invalid magic: expected 'msft-xvd', got {0:?}")]
    InvalidMagic([u8; 8]),

    /// Container type is neither fixed nor dynamic
    #[error("Unsupported container type: {0}")]
    UnsupportedXvdType(u32),

    /// Data is too short for the expected structure
    #[error("Truncated data: expected {expected} bytes, got {actual} bytes")]
    TruncatedData {
        /// Expected minimum size
        expected: u64,
        /// Actual data size
        actual: u64,
    },

    /// Page-count to byte conversion or offset accumulation overflowed
    #[error("Arithmetic overflow while computing {0}")]
    Overflow(&'static str),

    /// Block index beyond the hashed page count
    #[error("Block {index} out of range (container hashes {limit} pages)")]
    IndexOutOfRange {
        /// Requested block
        index: u64,
        /// Number of hashed pages
        limit: u64,
    },

    /// Hash-tree level beyond the tree depth
    #[error("Hash level {level} out of range (tree has {levels} levels)")]
    InvalidHashLevel {
        /// Requested level
        level: u64,
        /// Tree depth
        levels: u64,
    },

    /// A fixed-width UTF-16 field could not be decoded or encoded
    #[error("Invalid UTF-16 string: {0}")]
    InvalidUtf16(String),

    /// Binary read error
    #[error("Binary parsing error: {0}")]
    BinRead(String),

    /// Binary write error
    #[error("Binary write error: {0}")]
    BinWrite(String),

    /// IO error during parsing or building
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<binrw::Error> for FormatError {
    fn from(e: binrw::Error) -> Self {
        Self::BinRead(e.to_string())
    }
}

/// Result type alias for layout operations
pub type Result<T> = std::result::Result<T, FormatError>;
