//! Region/segment extraction walk
//!
//! Regions are walked independently, each with its own page and hash
//! windows. Within a region, segments are laid out back to back starting at
//! the region's first segment index, and every segment occupies at least one
//! page even when its file is empty.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use xvdkit_crypto::{KeyEntry, PageCipher, PageTweak};
use xvdkit_formats::{
    ContainerLayout, HASH_ENTRY_SLOT_SIZE, PAGE_SIZE, SegmentIndex, XvcRegionHeader,
    XvcUpdateSegment,
};

use crate::config::WalkOptions;
use crate::container::XvdContainer;
use crate::error::{Result, XvdError};
use crate::progress::ProgressReporter;
use crate::window::CacheWindow;

/// Task id reported for the embedded container copy
pub const EMBEDDED_TASK_ID: u32 = 0;

/// Totals of one extraction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    /// Regions walked
    pub regions: usize,
    /// Files written
    pub files: usize,
    /// File bytes written
    pub bytes: u64,
    /// Pages read
    pub pages: u64,
    /// Pages that matched only after a cache refill
    pub retried_pages: u64,
}

impl ExtractSummary {
    fn merge(mut self, other: Self) -> Self {
        self.regions += other.regions;
        self.files += other.files;
        self.bytes += other.bytes;
        self.pages += other.pages;
        self.retried_pages += other.retried_pages;
        self
    }
}

/// State shared read-only by every region task
struct RegionWalk<'a> {
    output: &'a Path,
    layout: ContainerLayout,
    segments: &'a SegmentIndex,
    update_segments: &'a [XvcUpdateSegment],
    cipher: Option<&'a PageCipher>,
    options: &'a WalkOptions,
    progress: &'a dyn ProgressReporter,
}

/// Page and hash windows owned by one region task
struct RegionWindows {
    pages: CacheWindow,
    hashes: CacheWindow,
}

impl RegionWindows {
    fn invalidate(&mut self) {
        self.pages.invalidate();
        self.hashes.invalidate();
    }
}

/// Turn a stored segment path into a relative output path
///
/// Backslashes separate components. Absolute paths, drive prefixes and
/// parent references are rejected so output never escapes the target
/// directory.
pub fn sanitize_segment_path(path: &str) -> Result<PathBuf> {
    let normalized = path.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(XvdError::MalformedInput(format!(
            "absolute segment path {path:?}"
        )));
    }

    let mut out = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(XvdError::MalformedInput(format!(
                    "segment path {path:?} leaves the output directory"
                )));
            }
            _ if part.contains(':') => {
                return Err(XvdError::MalformedInput(format!(
                    "segment path {path:?} has a drive or stream prefix"
                )));
            }
            _ => out.push(part),
        }
    }

    if out.as_os_str().is_empty() {
        return Err(XvdError::MalformedInput(format!(
            "unusable segment path {path:?}"
        )));
    }
    Ok(out)
}

impl XvdContainer {
    /// Extract every segment file of the selected regions below `output`
    ///
    /// `key` is needed only when a selected region is keyed and the
    /// container is encrypted; otherwise it may be `None`.
    pub async fn extract_files(
        &self,
        output: &Path,
        key: Option<&KeyEntry>,
        options: &WalkOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<ExtractSummary> {
        self.require_ready()?;

        let index = self
            .content_index
            .as_ref()
            .ok_or(XvdError::NotPresent("content index"))?;
        let segments = self
            .segment_index
            .as_ref()
            .ok_or(XvdError::NotPresent("segment index"))?;

        if segments.is_empty() {
            warn!("Container does not hold any segments");
            return Ok(ExtractSummary::default());
        }

        let cipher = match key {
            Some(key) if self.header.encrypted() => Some(PageCipher::new(key)?),
            _ => None,
        };

        let candidates: Vec<&XvcRegionHeader> = index
            .segment_regions()
            .filter(|region| options.regions.allows(region.id))
            .collect();
        info!(
            "Extracting {} of {} regions to {}",
            candidates.len(),
            index.regions.len(),
            output.display()
        );

        let walk = RegionWalk {
            output,
            layout: *self.layout()?,
            segments,
            update_segments: &index.update_segments,
            cipher: cipher.as_ref(),
            options,
            progress,
        };

        let walk = &walk;
        let results: Vec<Result<ExtractSummary>> = stream::iter(candidates)
            .map(|region| self.extract_region(region, walk))
            .buffer_unordered(self.config.region_concurrency.max(1))
            .collect()
            .await;

        let summary = results
            .into_iter()
            .try_fold(ExtractSummary::default(), |acc, region| {
                region.map(|region| acc.merge(region))
            })?;

        info!(
            "Extracted {} files ({} bytes) from {} regions",
            summary.files, summary.bytes, summary.regions
        );
        Ok(summary)
    }

    async fn extract_region(
        &self,
        region: &XvcRegionHeader,
        walk: &RegionWalk<'_>,
    ) -> Result<ExtractSummary> {
        let should_decrypt = walk.layout.integrity.encrypted && region.is_keyed();
        let cipher = if should_decrypt {
            Some(walk.cipher.ok_or(XvdError::KeyRequired { region: region.id })?)
        } else {
            None
        };

        let first_segment = region.first_segment_index as usize;
        if let Some(update) = walk.update_segments.get(first_segment)
            && update.offset() != region.offset
        {
            warn!(
                "Region 0x{:08x} starts at 0x{:x} but its first update segment is at 0x{:x}",
                region.id,
                region.offset,
                update.offset()
            );
        }

        let label = format!("region 0x{:08x}", region.id);
        walk.progress.started(region.id, &label, region.length);
        debug!(
            "Walking {label}: offset 0x{:x}, {} pages, first segment {first_segment}",
            region.offset,
            region.page_count()
        );

        let mut windows = RegionWindows {
            pages: CacheWindow::new("page", self.config.page_window_pages),
            hashes: CacheWindow::new("hash", self.config.hash_window_pages),
        };
        let mut tweak = PageTweak::for_region(region.id, &self.header.vduid);
        let mut summary = ExtractSummary {
            regions: 1,
            ..ExtractSummary::default()
        };

        let region_pages = region.page_count();
        let mut page_no = 0u64;
        let mut segment_no = first_segment;

        while segment_no < walk.segments.len() && page_no < region_pages {
            let Some(segment) = walk.segments.get(segment_no) else {
                break;
            };
            let path = walk.output.join(sanitize_segment_path(&segment.path)?);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = fs::File::create(&path).await?;

            let mut remaining = segment.file_size();
            for _ in 0..segment.page_count() {
                let offset = page_no
                    .checked_mul(PAGE_SIZE)
                    .and_then(|delta| region.offset.checked_add(delta))
                    .ok_or(XvdError::Overflow("region page offset"))?;
                let (mut page, data_unit, retried) = self
                    .read_checked_page(&walk.layout, &mut windows, offset, walk.options)
                    .await?;
                if retried {
                    summary.retried_pages += 1;
                }

                if let Some(cipher) = cipher {
                    tweak.set_data_unit(data_unit);
                    cipher.decrypt_page(&mut page, &tweak)?;
                }

                let take = remaining.min(PAGE_SIZE);
                file.write_all(&page[..take as usize]).await?;
                remaining -= take;
                summary.bytes += take;

                page_no += 1;
                summary.pages += 1;
                walk.progress.advanced(region.id, PAGE_SIZE);
            }

            file.flush().await?;
            debug!("Wrote {} ({} bytes)", path.display(), segment.file_size());
            summary.files += 1;
            segment_no += 1;
        }

        walk.progress.finished(region.id);
        Ok(summary)
    }

    /// Read one page and, when the tree is present, its data unit tag
    ///
    /// A mismatching page is retried once after refilling both windows. The
    /// returned flag tells whether that retry was needed.
    async fn read_checked_page(
        &self,
        layout: &ContainerLayout,
        windows: &mut RegionWindows,
        offset: u64,
        options: &WalkOptions,
    ) -> Result<(Vec<u8>, u32, bool)> {
        let provider = self.provider.as_ref();
        let integrity = &layout.integrity;

        if !integrity.data_integrity {
            let page = windows
                .pages
                .fetch(provider, offset, PAGE_SIZE as usize)
                .await?;
            return Ok((page.to_vec(), 0, false));
        }

        let block = layout.block_for_offset(offset)?;
        let entry_offset = layout.hash_entry_offset(block)?;
        let mut retried = false;

        loop {
            let page = windows
                .pages
                .fetch(provider, offset, PAGE_SIZE as usize)
                .await?
                .to_vec();
            let entry = windows
                .hashes
                .fetch(provider, entry_offset, HASH_ENTRY_SLOT_SIZE as usize)
                .await?;

            if options.skip_hash_check || integrity.entry_matches(&page, entry) {
                return Ok((page, integrity.data_unit(entry), retried));
            }

            if retried {
                warn!("Page 0x{block:x} failed its hash check twice");
                return Err(XvdError::IntegrityMismatch { page: block });
            }

            warn!("Page 0x{block:x} has an invalid hash, refilling caches and retrying");
            windows.invalidate();
            retried = true;
        }
    }

    /// Copy the embedded container to `output`
    ///
    /// Returns the number of bytes written.
    pub async fn extract_embedded(
        &self,
        output: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<u64> {
        self.require_ready()?;

        let length = u64::from(self.header.embedded_xvd_length);
        if length == 0 {
            return Err(XvdError::NotPresent("embedded container"));
        }

        let offset = self.offsets()?.embedded_xvd;
        let chunk = (self.config.page_window_pages as u64 * PAGE_SIZE).max(PAGE_SIZE);
        info!(
            "Extracting embedded container (0x{length:x} bytes at 0x{offset:x}) to {}",
            output.display()
        );

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(output).await?;

        progress.started(EMBEDDED_TASK_ID, "embedded container", length);
        let mut written = 0u64;
        while written < length {
            let len = (length - written).min(chunk) as usize;
            let bytes = self.provider.read_exact_at(offset + written, len).await?;
            file.write_all(&bytes).await?;
            written += len as u64;
            progress.advanced(EMBEDDED_TASK_ID, len as u64);
        }
        file.flush().await?;
        progress.finished(EMBEDDED_TASK_ID);

        Ok(written)
    }
}
