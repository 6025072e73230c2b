//! Offset derivation
//!
//! Sub-regions follow each other in a fixed order, each starting where the
//! previous one ends:
//!
//! ```text
//! header + signature (0x3000)
//! embedded container      pages(embedded length)
//! mutable data            mutable page count
//! hash tree               tree pages (0 without data integrity)
//! user data               pages(user data length)      <- hashed pages start here
//! XVC info                pages(XVC info length)
//! dynamic header          pages(dynamic header length)
//! drive data
//! ```

use serde::Serialize;
use tracing::debug;

use crate::error::{FormatError, Result};
use crate::hash_tree::HashEntryLocation;
use crate::header::XvdHeader;
use crate::integrity::IntegrityConfig;
use crate::page::{HEADER_INCL_SIGNATURE_SIZE, PAGE_SIZE, page_to_offset};

/// Absolute byte offsets of every sub-region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionOffsets {
    /// Embedded container
    pub embedded_xvd: u64,
    /// Mutable data
    pub mutable_data: u64,
    /// Hash tree
    pub hash_tree: u64,
    /// User data, also the first hashed page
    pub user_data: u64,
    /// XVC info
    pub xvc_info: u64,
    /// Dynamic header
    pub dynamic_header: u64,
    /// Drive data
    pub drive_data: u64,
}

fn advance(base: u64, pages: u64, what: &'static str) -> Result<u64> {
    base.checked_add(page_to_offset(pages)?)
        .ok_or(FormatError::Overflow(what))
}

impl RegionOffsets {
    /// Derive offsets from a header
    pub fn derive(header: &XvdHeader) -> Result<Self> {
        let integrity = IntegrityConfig::from_header(header)?;
        Self::derive_with(header, &integrity)
    }

    /// Derive offsets with an already computed integrity configuration
    pub fn derive_with(header: &XvdHeader, integrity: &IntegrityConfig) -> Result<Self> {
        let embedded_xvd = HEADER_INCL_SIGNATURE_SIZE;
        let mutable_data = advance(
            embedded_xvd,
            header.embedded_xvd_page_count(),
            "mutable data offset",
        )?;
        let hash_tree = advance(
            mutable_data,
            u64::from(header.mutable_data_page_count),
            "hash tree offset",
        )?;
        let user_data = advance(
            hash_tree,
            integrity.stored_hash_tree_pages(),
            "user data offset",
        )?;
        let xvc_info = advance(
            user_data,
            header.user_data_page_count(),
            "XVC info offset",
        )?;
        let dynamic_header = advance(
            xvc_info,
            header.xvc_info_page_count(),
            "dynamic header offset",
        )?;
        let drive_data = advance(
            dynamic_header,
            header.dynamic_header_page_count(),
            "drive data offset",
        )?;

        Ok(Self {
            embedded_xvd,
            mutable_data,
            hash_tree,
            user_data,
            xvc_info,
            dynamic_header,
            drive_data,
        })
    }

    /// Offsets in layout order
    pub const fn as_array(&self) -> [u64; 7] {
        [
            self.embedded_xvd,
            self.mutable_data,
            self.hash_tree,
            self.user_data,
            self.xvc_info,
            self.dynamic_header,
            self.drive_data,
        ]
    }
}

/// Everything derived from the header, computed once per container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerLayout {
    /// Integrity configuration
    pub integrity: IntegrityConfig,
    /// Region offsets
    pub offsets: RegionOffsets,
}

impl ContainerLayout {
    /// Derive the layout of a container
    pub fn from_header(header: &XvdHeader) -> Result<Self> {
        let integrity = IntegrityConfig::from_header(header)?;
        let offsets = RegionOffsets::derive_with(header, &integrity)?;
        debug!(
            levels = integrity.hash_tree_levels(),
            tree_pages = integrity.hash_tree_page_count(),
            user_data = offsets.user_data,
            drive_data = offsets.drive_data,
            "Derived container layout"
        );
        Ok(Self { integrity, offsets })
    }

    /// Hashed block index of an absolute page-aligned offset
    pub fn block_for_offset(&self, offset: u64) -> Result<u64> {
        let relative = offset
            .checked_sub(self.offsets.user_data)
            .ok_or(FormatError::IndexOutOfRange {
                index: offset / PAGE_SIZE,
                limit: self.integrity.hash_tree.hashed_pages(),
            })?;
        Ok(relative / PAGE_SIZE)
    }

    /// Absolute offset of hashed block `block`
    pub fn block_offset(&self, block: u64) -> Result<u64> {
        advance(self.offsets.user_data, block, "data page offset")
    }

    /// Location of the level-0 entry for `block`
    pub fn hash_entry(&self, block: u64) -> Result<HashEntryLocation> {
        self.integrity.hash_tree.locate(block, 0)
    }

    /// Absolute offset of the level-0 entry for `block`
    pub fn hash_entry_offset(&self, block: u64) -> Result<u64> {
        let location = self.hash_entry(block)?;
        self.integrity
            .hash_tree
            .entry_offset(self.offsets.hash_tree, location)
    }

    /// Absolute offset of a hash-tree page
    pub fn hash_page_offset(&self, page: u64) -> Result<u64> {
        advance(self.offsets.hash_tree, page, "hash page offset")
    }
}
