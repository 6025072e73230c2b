//! Memory-mapped local container

use async_trait::async_trait;
use bytes::Bytes;
use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;
use xvdkit_formats::PAGE_SIZE;

use super::{ByteRangeProvider, clamp_read};
use crate::error::{Result, XvdError};

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::ReadOnly(map) => &map[..],
            Self::ReadWrite(map) => &map[..],
        }
    }
}

/// Container file mapped into memory
pub struct LocalFile {
    path: PathBuf,
    file: File,
    mapping: RwLock<Mapping>,
    len: u64,
}

impl LocalFile {
    /// Map a file, read-only or read-write
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(XvdError::MalformedInput(format!(
                "{} is empty",
                path.display()
            )));
        }

        #[allow(unsafe_code)]
        let mapping = if writable {
            Mapping::ReadWrite(unsafe { MmapOptions::new().map_mut(&file)? })
        } else {
            Mapping::ReadOnly(unsafe { MmapOptions::new().map(&file)? })
        };

        debug!(
            "Mapped {} ({} bytes, {})",
            path.display(),
            len,
            if writable { "read-write" } else { "read-only" }
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mapping: RwLock::new(mapping),
            len,
        })
    }

    /// Path of the mapped file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the mapping accepts writes
    pub fn is_writable(&self) -> bool {
        matches!(*self.mapping.read(), Mapping::ReadWrite(_))
    }

    /// Run `f` on a direct view of `[offset, offset + len)`
    pub fn with_slice<R>(&self, offset: u64, len: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let len = clamp_read(offset, len, self.len)?;
        let mapping = self.mapping.read();
        let start = offset as usize;
        Ok(f(&mapping.as_slice()[start..start + len]))
    }

    /// Run `f` on the whole mapping with write access
    ///
    /// Readers are blocked until `f` returns.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut mapping = self.mapping.write();
        match &mut *mapping {
            Mapping::ReadWrite(map) => {
                let result = f(&mut map[..]);
                map.flush()?;
                Ok(result)
            }
            Mapping::ReadOnly(_) => Err(XvdError::UnsupportedOperation(format!(
                "{} was opened read-only",
                self.path.display()
            ))),
        }
    }

    /// Overwrite `bytes` at `offset` through a separate page-aligned view
    pub fn patch(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if !self.is_writable() {
            return Err(XvdError::UnsupportedOperation(format!(
                "{} was opened read-only",
                self.path.display()
            )));
        }
        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or(XvdError::Overflow("patch range"))?;
        if end > self.len {
            return Err(XvdError::OutOfRange {
                offset: end,
                length: self.len,
            });
        }

        let view_offset = offset - offset % PAGE_SIZE;
        let within = (offset - view_offset) as usize;
        let view_len = within + bytes.len();

        #[allow(unsafe_code)]
        let mut view = unsafe {
            MmapOptions::new()
                .offset(view_offset)
                .len(view_len)
                .map_mut(&self.file)?
        };
        view[within..].copy_from_slice(bytes);
        view.flush()?;

        debug!("Patched {} bytes at 0x{:x}", bytes.len(), offset);
        Ok(())
    }
}

#[async_trait]
impl ByteRangeProvider for LocalFile {
    /// Copy `[offset, offset + len)` out of the mapping
    ///
    /// Callers read at most one cache window per call. The copy lets the map
    /// lock drop before the bytes are used, so an in-place write never aliases
    /// a live window. Use [`LocalFile::with_slice`] for a borrowed view.
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        self.with_slice(offset, len, Bytes::copy_from_slice)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn kind(&self) -> &'static str {
        "local"
    }

    fn as_local(&self) -> Option<&LocalFile> {
        Some(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(data).expect("write");
        file.flush().expect("flush");
        file
    }

    #[tokio::test]
    async fn test_read_at_clamps_to_end() {
        let data: Vec<u8> = (0..0x2000u32).map(|i| i as u8).collect();
        let file = temp_file(&data);
        let local = LocalFile::open(file.path(), false).expect("open");

        assert_eq!(local.len(), 0x2000);
        assert_eq!(local.kind(), "local");
        assert!(local.as_local().is_some());

        let head = local.read_at(0x10, 4).await.expect("read");
        assert_eq!(head.as_ref(), &data[0x10..0x14]);

        let tail = local.read_at(0x1FF0, 0x100).await.expect("read");
        assert_eq!(tail.len(), 0x10);

        assert!(matches!(
            local.read_at(0x2000, 1).await,
            Err(XvdError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_at_snapshots_before_in_place_writes() {
        let file = temp_file(&[0x11u8; 0x2000]);
        let local = LocalFile::open(file.path(), true).expect("open");

        let window = local.read_at(0x1000, 0x1000).await.expect("read");
        let view = local
            .with_slice(0x1000, 0x1000, <[u8]>::to_vec)
            .expect("view");
        assert_eq!(window.as_ref(), view.as_slice());

        local
            .with_bytes_mut(|bytes| bytes[0x1000..0x2000].fill(0x22))
            .expect("mutate");

        assert!(window.iter().all(|&b| b == 0x11));
        let refreshed = local.read_at(0x1000, 0x1000).await.expect("read");
        assert!(refreshed.iter().all(|&b| b == 0x22));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let file = temp_file(&[0u8; 0x1000]);
        let local = LocalFile::open(file.path(), false).expect("open");
        assert!(!local.is_writable());
        assert!(matches!(
            local.with_bytes_mut(|_| ()),
            Err(XvdError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            local.patch(0, &[1]),
            Err(XvdError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_mutation_and_patch_persist() {
        let file = temp_file(&[0u8; 0x3000]);
        {
            let local = LocalFile::open(file.path(), true).expect("open");
            local
                .with_bytes_mut(|bytes| bytes[0x2000..0x2004].copy_from_slice(b"page"))
                .expect("mutate");
            local.patch(0x1208, &[0xAA, 0xBB]).expect("patch");

            let seen = local
                .with_slice(0x1208, 2, <[u8]>::to_vec)
                .expect("view");
            assert_eq!(seen, vec![0xAA, 0xBB]);
        }

        let on_disk = std::fs::read(file.path()).expect("read back");
        assert_eq!(&on_disk[0x2000..0x2004], b"page");
        assert_eq!(&on_disk[0x1208..0x120A], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let file = temp_file(&[]);
        assert!(matches!(
            LocalFile::open(file.path(), false),
            Err(XvdError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            LocalFile::open("/nonexistent/container.xvd", false),
            Err(XvdError::Io(_))
        ));
    }
}
