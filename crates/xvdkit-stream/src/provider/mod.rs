//! Byte-range providers
//!
//! A container is read through exactly one of two providers, picked at open
//! time: [`LocalFile`] memory-maps a file, [`HttpRangeFile`] issues one HTTP
//! range request per read. Reads are positioned, so concurrent region walks
//! never share a cursor.

mod local;
mod remote;

pub use local::LocalFile;
pub use remote::{HttpRangeFile, ensure_crypto_provider};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, XvdError};

/// Positioned read access to a container's bytes
#[async_trait]
pub trait ByteRangeProvider: Send + Sync {
    /// Read up to `len` bytes starting at `offset`
    ///
    /// The result is shorter than `len` only when the read reaches the end
    /// of the container. Offsets past the end fail with `OutOfRange`.
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes>;

    /// Total container length in bytes
    fn len(&self) -> u64;

    /// Whether the container is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name for logs ("local" or "remote")
    fn kind(&self) -> &'static str;

    /// Local file access, when the provider is backed by one
    fn as_local(&self) -> Option<&LocalFile> {
        None
    }

    /// Read exactly `len` bytes at `offset`
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let data = self.read_at(offset, len).await?;
        if data.len() != len {
            return Err(XvdError::IncompleteRead {
                expected: len as u64,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }
}

/// Clamp a read request to the container length
pub(crate) fn clamp_read(offset: u64, len: usize, total: u64) -> Result<usize> {
    if offset > total || (offset == total && len > 0) {
        return Err(XvdError::OutOfRange {
            offset,
            length: total,
        });
    }
    let available = total - offset;
    Ok(usize::try_from(available).map_or(len, |available| len.min(available)))
}

/// Sequential reader over a provider
///
/// Keeps a position for code that parses structures one after another.
pub struct RangeCursor<'a> {
    provider: &'a dyn ByteRangeProvider,
    position: u64,
}

impl<'a> RangeCursor<'a> {
    /// Cursor at offset 0
    pub fn new(provider: &'a dyn ByteRangeProvider) -> Self {
        Self {
            provider,
            position: 0,
        }
    }

    /// Move to an absolute position; positions at or past the end are rejected
    pub fn seek(&mut self, position: u64) -> Result<()> {
        let length = self.provider.len();
        if position >= length {
            return Err(XvdError::OutOfRange {
                offset: position,
                length,
            });
        }
        self.position = position;
        Ok(())
    }

    /// Current position
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Read exactly `len` bytes and advance
    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        let data = self.provider.read_exact_at(self.position, len).await?;
        self.position += len as u64;
        Ok(data)
    }
}
