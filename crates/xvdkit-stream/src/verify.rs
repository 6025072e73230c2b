//! Whole-file hash verification

use serde::Serialize;
use tracing::{info, warn};
use xvdkit_formats::{HASH_ENTRY_SLOT_SIZE, PAGE_SIZE};

use crate::container::XvdContainer;
use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::window::CacheWindow;

/// Outcome of [`XvdContainer::verify_all_pages`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Pages hashed and compared
    pub pages_checked: u64,
    /// Hashed page indexes whose digest did not match
    pub mismatches: Vec<u64>,
    /// Hashed pages missing from the end of the file
    pub missing_pages: u64,
    /// The container carries no hash tree
    pub integrity_disabled: bool,
}

impl VerifyReport {
    /// Whether every page matched and none were missing
    pub fn is_valid(&self) -> bool {
        self.mismatches.is_empty() && self.missing_pages == 0
    }
}

impl XvdContainer {
    /// Hash every data page and compare it with its level-0 entry
    ///
    /// Mismatches are collected rather than raised, so the report covers the
    /// whole file. A container without data integrity verifies trivially.
    pub async fn verify_all_pages(&self, progress: &dyn ProgressReporter) -> Result<VerifyReport> {
        self.require_ready()?;
        let layout = *self.layout()?;

        if !layout.integrity.data_integrity {
            info!("Data integrity is disabled, skipping hash verification");
            return Ok(VerifyReport {
                integrity_disabled: true,
                ..VerifyReport::default()
            });
        }

        let hashed_pages = layout.integrity.hash_tree.hashed_pages();
        let available = self
            .provider
            .len()
            .saturating_sub(layout.offsets.user_data)
            / PAGE_SIZE;
        let pages = available.min(hashed_pages);

        let mut report = VerifyReport {
            missing_pages: hashed_pages - pages,
            ..VerifyReport::default()
        };
        if report.missing_pages > 0 {
            warn!(
                "File ends {} pages short of its hashed page count",
                report.missing_pages
            );
        }

        info!("Verifying {pages} pages");
        let provider = self.provider.as_ref();
        let mut page_window = CacheWindow::new("page", self.config.page_window_pages);
        let mut hash_window = CacheWindow::new("hash", self.config.hash_window_pages);

        progress.started(0, "verify", pages * PAGE_SIZE);
        for block in 0..pages {
            let entry = hash_window
                .fetch(
                    provider,
                    layout.hash_entry_offset(block)?,
                    HASH_ENTRY_SLOT_SIZE as usize,
                )
                .await?;
            let page = page_window
                .fetch(provider, layout.block_offset(block)?, PAGE_SIZE as usize)
                .await?;

            if !layout.integrity.entry_matches(page, entry) {
                warn!("Page 0x{block:x} has an invalid hash");
                report.mismatches.push(block);
            }

            report.pages_checked += 1;
            progress.advanced(0, PAGE_SIZE);
        }
        progress.finished(0);

        info!(
            "Verified {} pages, {} mismatches ({} page refills, {} hash refills)",
            report.pages_checked,
            report.mismatches.len(),
            page_window.refills(),
            hash_window.refills()
        );
        Ok(report)
    }
}
