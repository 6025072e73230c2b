//! Hash-tree addressing
//!
//! Every hashed data page has a 24-byte entry in the hash tree. A hash page
//! holds 170 entries followed by 16 bytes of padding (170 * 24 + 16 = 4096).
//! When one level needs more than a single page, a further level hashes the
//! pages below it, until a level fits in one page. Upper levels are stored
//! first and level 0 (closest to the data) last. Resilient containers keep
//! two copies of every tree page, so page indices double.

use serde::Serialize;

use crate::error::{FormatError, Result};
use crate::header::XvdType;
use crate::page::PAGE_SIZE;

/// Hash entries per hash page
pub const HASH_ENTRIES_PER_PAGE: u64 = 0xAA;

/// Bytes occupied by one hash entry slot
pub const HASH_ENTRY_SLOT_SIZE: u64 = 0x18;

/// Padding after the last entry of a hash page
pub const HASH_PAGE_PADDING: u64 = 0x10;

/// Compared digest length when every slot carries a data unit tag
pub const HASH_ENTRY_LENGTH_ENCRYPTED: usize = 0x14;

/// Compared digest length for unencrypted containers
pub const HASH_ENTRY_LENGTH: usize = 0x18;

/// Offset of the data unit tag inside an entry slot
pub const DATA_UNIT_TAG_OFFSET: usize = 0x14;

/// 170^exp, or None when it no longer fits
fn entries_power(exp: u64) -> Option<u64> {
    let exp = u32::try_from(exp).ok()?;
    HASH_ENTRIES_PER_PAGE.checked_pow(exp)
}

/// Number of hash pages making up tree level `level`
fn pages_at_level(hashed_pages: u64, level: u64) -> u64 {
    match entries_power(level + 1) {
        Some(divisor) => hashed_pages.div_ceil(divisor),
        None => u64::from(hashed_pages > 0),
    }
}

/// Position of one hash entry inside the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HashEntryLocation {
    /// Tree page index relative to the start of the hash tree
    pub page: u64,
    /// Entry slot inside that page, always below 170
    pub entry: u64,
}

impl HashEntryLocation {
    /// Byte offset of the entry inside its hash page
    pub const fn offset_in_page(&self) -> u64 {
        self.entry * HASH_ENTRY_SLOT_SIZE
    }
}

/// Shape of a container's hash tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HashTreeLayout {
    xvd_type: XvdType,
    hashed_pages: u64,
    levels: u64,
    page_count: u64,
    resilient: bool,
}

impl HashTreeLayout {
    /// Size the tree for `hashed_pages` data pages
    pub fn new(xvd_type: XvdType, hashed_pages: u64, resilient: bool) -> Result<Self> {
        let mut levels = 1;
        let mut page_count = pages_at_level(hashed_pages, 0);

        let mut level_pages = page_count;
        while level_pages > 1 {
            level_pages = pages_at_level(hashed_pages, levels);
            levels += 1;
            page_count = page_count
                .checked_add(level_pages)
                .ok_or(FormatError::Overflow("hash tree page count"))?;
        }

        if resilient {
            page_count = page_count
                .checked_mul(2)
                .ok_or(FormatError::Overflow("hash tree page count"))?;
        }

        Ok(Self {
            xvd_type,
            hashed_pages,
            levels,
            page_count,
            resilient,
        })
    }

    /// Container type the tree belongs to
    pub const fn xvd_type(&self) -> XvdType {
        self.xvd_type
    }

    /// Number of data pages covered
    pub const fn hashed_pages(&self) -> u64 {
        self.hashed_pages
    }

    /// Tree depth
    pub const fn levels(&self) -> u64 {
        self.levels
    }

    /// Total number of tree pages, including the resilient copy
    pub const fn page_count(&self) -> u64 {
        self.page_count
    }

    /// Whether tree pages are stored twice
    pub const fn resilient(&self) -> bool {
        self.resilient
    }

    /// Number of tree pages in one level (single copy)
    pub fn level_page_count(&self, level: u64) -> Result<u64> {
        if level >= self.levels {
            return Err(FormatError::InvalidHashLevel {
                level,
                levels: self.levels,
            });
        }
        Ok(pages_at_level(self.hashed_pages, level))
    }

    /// Locate the entry covering `block` at tree level `level`
    ///
    /// At level 0 the entry hashes the data page itself; at level `l > 0` it
    /// hashes the level `l - 1` page that holds the block's entry.
    pub fn locate(&self, block: u64, level: u64) -> Result<HashEntryLocation> {
        if !self.xvd_type.is_known() {
            return Err(FormatError::UnsupportedXvdType(self.xvd_type.0));
        }
        if block >= self.hashed_pages {
            return Err(FormatError::IndexOutOfRange {
                index: block,
                limit: self.hashed_pages,
            });
        }
        if level >= self.levels {
            return Err(FormatError::InvalidHashLevel {
                level,
                levels: self.levels,
            });
        }

        let entry = entries_power(level).map_or(0, |divisor| (block / divisor) % HASH_ENTRIES_PER_PAGE);

        let mut page = entries_power(level + 1).map_or(0, |divisor| block / divisor);
        for upper in (level + 1)..self.levels {
            page += pages_at_level(self.hashed_pages, upper);
        }

        if self.resilient {
            page *= 2;
        }

        Ok(HashEntryLocation { page, entry })
    }

    /// Entries covering `block` at every level, from level 0 to the top
    pub fn chain(&self, block: u64) -> Result<Vec<HashEntryLocation>> {
        (0..self.levels)
            .map(|level| self.locate(block, level))
            .collect()
    }

    /// Absolute byte offset of an entry given the hash tree's start offset
    pub fn entry_offset(&self, tree_offset: u64, location: HashEntryLocation) -> Result<u64> {
        location
            .page
            .checked_mul(PAGE_SIZE)
            .and_then(|page_offset| page_offset.checked_add(location.offset_in_page()))
            .and_then(|relative| relative.checked_add(tree_offset))
            .ok_or(FormatError::Overflow("hash entry offset"))
    }
}
