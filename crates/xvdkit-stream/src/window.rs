//! Page and hash cache windows
//!
//! A window holds a fixed number of pages read with a single provider call.
//! A fetch inside the window is served from memory; a fetch crossing its
//! bound, or any fetch after [`CacheWindow::invalidate`], refills it starting
//! at the page holding the requested offset. Windows belong to one walk
//! invocation and are never shared between concurrent regions.

use bytes::Bytes;
use tracing::debug;
use xvdkit_formats::PAGE_SIZE;

use crate::error::{Result, XvdError};
use crate::provider::ByteRangeProvider;

/// Sliding read-ahead buffer over a provider
pub struct CacheWindow {
    name: &'static str,
    capacity: usize,
    start: u64,
    data: Bytes,
    stale: bool,
    refills: u64,
}

impl CacheWindow {
    /// Window spanning `pages` pages (at least one)
    pub fn new(name: &'static str, pages: usize) -> Self {
        Self {
            name,
            capacity: pages.max(1) * PAGE_SIZE as usize,
            start: 0,
            data: Bytes::new(),
            stale: true,
            refills: 0,
        }
    }

    /// Window size in bytes
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of refills so far
    pub const fn refills(&self) -> u64 {
        self.refills
    }

    /// Force the next fetch to refill
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    fn contains(&self, offset: u64, len: usize) -> bool {
        !self.stale
            && offset >= self.start
            && offset + len as u64 <= self.start + self.data.len() as u64
    }

    /// Bytes `[offset, offset + len)`, refilling when they are not cached
    pub async fn fetch(
        &mut self,
        provider: &dyn ByteRangeProvider,
        offset: u64,
        len: usize,
    ) -> Result<&[u8]> {
        if !self.contains(offset, len) {
            let start = offset - offset % PAGE_SIZE;
            let want = self.capacity.max((offset - start) as usize + len);
            debug!(
                "Refilling {} window at 0x{:x} ({} bytes)",
                self.name, start, want
            );
            self.data = provider.read_at(start, want).await?;
            self.start = start;
            self.stale = false;
            self.refills += 1;

            if !self.contains(offset, len) {
                return Err(XvdError::IncompleteRead {
                    expected: offset + len as u64 - start,
                    actual: self.data.len() as u64,
                });
            }
        }

        let at = (offset - self.start) as usize;
        Ok(&self.data[at..at + len])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingProvider {
        data: Vec<u8>,
        reads: AtomicU64,
    }

    #[async_trait]
    impl ByteRangeProvider for CountingProvider {
        async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            let len = crate::provider::clamp_read(offset, len, self.len())?;
            let start = offset as usize;
            Ok(Bytes::copy_from_slice(&self.data[start..start + len]))
        }

        fn len(&self) -> u64 {
            self.data.len() as u64
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    fn provider(pages: usize) -> CountingProvider {
        CountingProvider {
            data: (0..pages * 0x1000).map(|i| (i / 0x1000) as u8).collect(),
            reads: AtomicU64::new(0),
        }
    }

    #[tokio::test]
    async fn test_sequential_pages_refill_once_per_window() {
        let provider = provider(40);
        let mut window = CacheWindow::new("page", 16);

        for page in 0..40u64 {
            let data = window
                .fetch(&provider, page * 0x1000, 0x1000)
                .await
                .expect("fetch");
            assert_eq!(data[0], page as u8);
        }

        // 16 + 16 + 8 pages
        assert_eq!(window.refills(), 3);
        assert_eq!(provider.reads.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refill() {
        let provider = provider(4);
        let mut window = CacheWindow::new("hash", 16);

        window.fetch(&provider, 0x18, 24).await.expect("fetch");
        window.fetch(&provider, 0x30, 24).await.expect("fetch");
        assert_eq!(window.refills(), 1);

        window.invalidate();
        window.fetch(&provider, 0x30, 24).await.expect("fetch");
        assert_eq!(window.refills(), 2);
    }

    #[tokio::test]
    async fn test_short_read_is_reported() {
        let provider = provider(2);
        let mut window = CacheWindow::new("page", 16);

        let last = window.fetch(&provider, 0x1000, 0x1000).await.expect("fetch");
        assert_eq!(last.len(), 0x1000);

        assert!(matches!(
            window.fetch(&provider, 0x1800, 0x1000).await,
            Err(XvdError::IncompleteRead { .. })
        ));
    }
}
