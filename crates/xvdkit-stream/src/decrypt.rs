//! In-place whole-file decryption
//!
//! Every target region is decrypted on its own thread over a disjoint slice
//! of the writable mapping. The header flag is only rewritten after all
//! threads joined without error.

use serde::Serialize;
use std::thread;
use tracing::{debug, info, warn};
use xvdkit_crypto::{KeyEntry, PageCipher, PageTweak};
use xvdkit_formats::{ContainerLayout, HASH_ENTRY_SLOT_SIZE, PAGE_SIZE, VolumeFlags, XvdHeader};

use crate::container::XvdContainer;
use crate::error::{Result, XvdError};
use crate::progress::ProgressReporter;
use crate::window::CacheWindow;

/// Region id used for the tweak of non-indexed containers
pub const WHOLE_FILE_HEADER_ID: u32 = 0x1;

/// Outcome of [`XvdContainer::decrypt_whole`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecryptOutcome {
    /// The container was already decrypted
    NotEncrypted,
    /// The content index declares no keys
    NoKeys,
    /// Regions were decrypted and the header flag rewritten
    Decrypted {
        /// Regions transformed
        regions: usize,
        /// Pages transformed
        pages: u64,
    },
}

/// One contiguous run of pages decrypted with one tweak template
#[derive(Debug, Clone, PartialEq, Eq)]
struct DecryptTarget {
    id: u32,
    offset: u64,
    pages: u64,
    data_units: Vec<u32>,
}

impl DecryptTarget {
    /// First byte past the target; offsets come from the file, so checked
    fn end(&self) -> Result<u64> {
        self.pages
            .checked_mul(PAGE_SIZE)
            .and_then(|len| self.offset.checked_add(len))
            .ok_or(XvdError::Overflow("region end"))
    }
}

impl XvdContainer {
    /// Decrypt every keyed region in place and mark the header decrypted
    ///
    /// Requires a local file opened writable. Hash recalculation is not
    /// available, so asking for it fails before anything is written. The
    /// hash tree covers ciphertext and no longer matches afterwards.
    pub async fn decrypt_whole(
        &mut self,
        key: &KeyEntry,
        recalculate_hashes: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<DecryptOutcome> {
        self.require_ready()?;

        if recalculate_hashes {
            return Err(XvdError::UnsupportedOperation(
                "hash tree recalculation".to_string(),
            ));
        }

        let local = self.provider.as_local().ok_or_else(|| {
            XvdError::UnsupportedOperation("decryption of a remote container".to_string())
        })?;
        if !local.is_writable() {
            return Err(XvdError::UnsupportedOperation(format!(
                "{} was opened read-only",
                local.path().display()
            )));
        }

        if !self.header.encrypted() {
            info!("Container is not encrypted, nothing to decrypt");
            return Ok(DecryptOutcome::NotEncrypted);
        }

        let mut targets = match self.decrypt_targets()? {
            Some(targets) => targets,
            None => {
                info!("Content index declares no keys, nothing to decrypt");
                return Ok(DecryptOutcome::NoKeys);
            }
        };

        let layout = *self.layout()?;
        self.collect_data_units(&layout, &mut targets).await?;

        let cipher = PageCipher::new(key)?;
        let vduid = self.header.vduid;
        let pages: u64 = targets.iter().map(|target| target.pages).sum();
        info!(
            "Decrypting {} regions ({} pages) with key {}",
            targets.len(),
            pages,
            key.id
        );

        let results = local.with_bytes_mut(|bytes| {
            decrypt_targets_in_place(bytes, &targets, &cipher, &vduid, progress)
        })??;
        debug!("Region threads joined: {results:?}");

        // All regions are done; the flag is the only durable header change
        let mut header = self.header.clone();
        header.volume_flags.set(VolumeFlags::ENCRYPTION_DISABLED);
        local.patch(
            XvdHeader::VOLUME_FLAGS_OFFSET as u64,
            &header.volume_flags.0.to_le_bytes(),
        )?;

        self.layout = Some(ContainerLayout::from_header(&header)?);
        self.header = header;

        info!("Decrypted {} regions, header marked decrypted", targets.len());
        Ok(DecryptOutcome::Decrypted {
            regions: targets.len(),
            pages,
        })
    }

    /// Regions to decrypt, or `None` when the index declares no keys
    fn decrypt_targets(&self) -> Result<Option<Vec<DecryptTarget>>> {
        let layout = self.layout()?;
        let file_length = self.provider.len();

        // Without XVC info the whole user area is one target, even for XVC types
        let mut targets = if let Some(index) = self.content_index.as_ref() {
            if !index.is_any_key_set() {
                return Ok(None);
            }
            index
                .decryptable_regions()
                .map(|region| DecryptTarget {
                    id: region.id,
                    offset: region.offset,
                    pages: region.length / PAGE_SIZE,
                    data_units: Vec::new(),
                })
                .collect::<Vec<_>>()
        } else {
            let offset = layout.offsets.user_data;
            vec![DecryptTarget {
                id: WHOLE_FILE_HEADER_ID,
                offset,
                pages: file_length.saturating_sub(offset) / PAGE_SIZE,
                data_units: Vec::new(),
            }]
        };

        targets.retain(|target| {
            if target.pages == 0 {
                warn!("Region 0x{:08x} is empty, skipping", target.id);
            }
            target.pages > 0
        });
        targets.sort_by_key(|target| target.offset);

        let mut previous_end = 0;
        for target in &targets {
            if target.offset % PAGE_SIZE != 0 {
                return Err(XvdError::MalformedInput(format!(
                    "region 0x{:08x} starts at unaligned offset 0x{:x}",
                    target.id, target.offset
                )));
            }
            if target.offset < previous_end {
                return Err(XvdError::MalformedInput(format!(
                    "region 0x{:08x} overlaps the previous region",
                    target.id
                )));
            }
            let end = target.end()?;
            if end > file_length {
                return Err(XvdError::OutOfRange {
                    offset: end,
                    length: file_length,
                });
            }
            previous_end = end;
        }

        Ok(Some(targets))
    }

    /// Read every page's data unit tag before the mapping is locked
    async fn collect_data_units(
        &self,
        layout: &ContainerLayout,
        targets: &mut [DecryptTarget],
    ) -> Result<()> {
        let integrity = &layout.integrity;
        let mut hash_window = CacheWindow::new("hash", self.config.hash_window_pages);

        for target in targets.iter_mut() {
            if !integrity.data_integrity {
                target.data_units = vec![0; target.pages as usize];
                continue;
            }

            let first_block = layout.block_for_offset(target.offset)?;
            let last_block = first_block
                .checked_add(target.pages)
                .ok_or(XvdError::Overflow("region block range"))?;
            let mut units = Vec::with_capacity(target.pages as usize);
            for block in first_block..last_block {
                let entry = hash_window
                    .fetch(
                        self.provider.as_ref(),
                        layout.hash_entry_offset(block)?,
                        HASH_ENTRY_SLOT_SIZE as usize,
                    )
                    .await?;
                units.push(integrity.data_unit(entry));
            }
            target.data_units = units;
        }
        Ok(())
    }
}

/// Split `bytes` into one slice per target and decrypt them on scoped threads
///
/// `targets` must be sorted by offset and non-overlapping.
fn decrypt_targets_in_place(
    bytes: &mut [u8],
    targets: &[DecryptTarget],
    cipher: &PageCipher,
    vduid: &[u8; 16],
    progress: &dyn ProgressReporter,
) -> Result<Vec<u64>> {
    let mut slices = Vec::with_capacity(targets.len());
    let mut rest = bytes;
    let mut consumed = 0u64;
    for target in targets {
        let (_, tail) = rest.split_at_mut((target.offset - consumed) as usize);
        let (region, tail) = tail.split_at_mut((target.pages * PAGE_SIZE) as usize);
        slices.push((target, region));
        rest = tail;
        consumed = target.end()?;
    }

    thread::scope(|scope| {
        let handles: Vec<_> = slices
            .into_iter()
            .map(|(target, region)| {
                scope.spawn(move || decrypt_region(region, target, cipher, vduid, progress))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(XvdError::UnsupportedOperation(
                        "region decryption thread panicked".to_string(),
                    ))
                })
            })
            .collect()
    })
}

fn decrypt_region(
    region: &mut [u8],
    target: &DecryptTarget,
    cipher: &PageCipher,
    vduid: &[u8; 16],
    progress: &dyn ProgressReporter,
) -> Result<u64> {
    let label = format!("region 0x{:08x}", target.id);
    progress.started(target.id, &label, target.pages * PAGE_SIZE);

    let mut tweak = PageTweak::for_region(target.id, vduid);
    let mut pages = 0;
    for (page, data_unit) in region
        .chunks_exact_mut(PAGE_SIZE as usize)
        .zip(target.data_units.iter().copied())
    {
        tweak.set_data_unit(data_unit);
        cipher.decrypt_page(page, &tweak)?;
        pages += 1;
        progress.advanced(target.id, PAGE_SIZE);
    }

    progress.finished(target.id);
    debug!("Decrypted {pages} pages of {label}");
    Ok(pages)
}
