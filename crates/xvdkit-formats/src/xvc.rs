use binrw::{BinRead, BinWrite};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use uuid::Uuid;

use crate::error::{FormatError, Result};
use crate::page::PAGE_SIZE;
use crate::{read_records, utf16, write_records};

/// Region key id meaning "not encrypted"
pub const XVC_KEY_NONE: u16 = 0xFFFF;

/// Number of key id slots in [`XvcInfo`]
pub const XVC_KEY_SLOTS: usize = 12;

/// Serialized size of [`XvcInfo`]
pub const XVC_INFO_SIZE: u64 = 0x368;
/// Serialized size of [`XvcRegionHeader`]
pub const XVC_REGION_HEADER_SIZE: u64 = 0x80;
/// Serialized size of [`XvcUpdateSegment`]
pub const XVC_UPDATE_SEGMENT_SIZE: u64 = 0x0C;
/// Serialized size of [`XvcRegionSpecifier`]
pub const XVC_REGION_SPECIFIER_SIZE: u64 = 0x188;

/// Encryption key identifier slot
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct XvcKeyId(pub [u8; 16]);

impl XvcKeyId {
    /// An all-zero slot carries no key
    pub fn is_nulled(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Key id as a GUID (little-endian field order)
    pub fn to_guid(&self) -> Uuid {
        Uuid::from_bytes_le(self.0)
    }
}

/// Content index header (0x368 bytes)
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct XvcInfo {
    /// Content id
    pub content_id: [u8; 16],
    /// Encryption key ids
    pub key_ids: [XvcKeyId; XVC_KEY_SLOTS],
    /// Description (UTF-16)
    pub description: [u8; 0x200],
    /// Index version
    pub version: u32,
    /// Number of region headers
    pub region_count: u32,
    /// Flags
    pub flags: u32,
    /// Padding
    pub padding: u16,
    /// Number of declared keys
    pub key_count: u16,
    /// Unknown
    pub unknown: u32,
    /// Initial play region
    pub initial_play_region_id: u32,
    /// Initial play offset
    pub initial_play_offset: u64,
    /// Creation time (Windows file time)
    pub file_time_created: i64,
    /// Preview region
    pub preview_region_id: u32,
    /// Number of update segments
    pub update_segment_count: u32,
    /// Preview offset
    pub preview_offset: u64,
    /// Unused space
    pub unused_space: u64,
    /// Number of region specifiers
    pub region_specifier_count: u32,
    /// Reserved
    pub reserved: [u8; 0x54],
}

impl Default for XvcInfo {
    fn default() -> Self {
        Self {
            content_id: [0; 16],
            key_ids: [XvcKeyId::default(); XVC_KEY_SLOTS],
            description: [0; 0x200],
            version: 0,
            region_count: 0,
            flags: 0,
            padding: 0,
            key_count: 0,
            unknown: 0,
            initial_play_region_id: 0,
            initial_play_offset: 0,
            file_time_created: 0,
            preview_region_id: 0,
            update_segment_count: 0,
            preview_offset: 0,
            unused_space: 0,
            region_specifier_count: 0,
            reserved: [0; 0x54],
        }
    }
}

impl XvcInfo {
    /// Whether any key slot is populated
    pub fn is_any_key_set(&self) -> bool {
        self.key_ids.iter().any(|key| !key.is_nulled())
    }

    /// First populated key slot
    pub fn first_key_id(&self) -> Option<XvcKeyId> {
        self.key_ids.iter().copied().find(|key| !key.is_nulled())
    }

    /// Description text
    pub fn description_str(&self) -> Result<String> {
        utf16::decode(&self.description)
    }

    /// Content id as hex
    pub fn content_id_hex(&self) -> String {
        hex::encode_upper(self.content_id)
    }
}

/// Region flags
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct RegionFlags(pub u32);

impl RegionFlags {
    /// Resident
    pub const RESIDENT: u32 = 0x1;
    /// Part of the initial play set
    pub const INITIAL_PLAY: u32 = 0x2;
    /// Preview region
    pub const PREVIEW: u32 = 0x4;
    /// Holds file system metadata
    pub const FILE_SYSTEM_METADATA: u32 = 0x8;
    /// Present
    pub const PRESENT: u32 = 0x10;
    /// Installed on demand
    pub const ON_DEMAND: u32 = 0x20;
    /// Available
    pub const AVAILABLE: u32 = 0x40;

    const NAMES: [(u32, &'static str); 7] = [
        (Self::RESIDENT, "Resident"),
        (Self::INITIAL_PLAY, "InitialPlay"),
        (Self::PREVIEW, "Preview"),
        (Self::FILE_SYSTEM_METADATA, "FileSystemMetadata"),
        (Self::PRESENT, "Present"),
        (Self::ON_DEMAND, "OnDemand"),
        (Self::AVAILABLE, "Available"),
    ];

    /// Check if flag is set
    pub const fn has(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }
}

impl fmt::Display for RegionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.has(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "0x{:x}", self.0)
        } else {
            f.write_str(&names.join(", "))
        }
    }
}

/// Region header (0x80 bytes)
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct XvcRegionHeader {
    /// Region id, also the XTS header id of its pages
    pub id: u32,
    /// Index into the key id table, or [`XVC_KEY_NONE`]
    pub key_id: u16,
    /// Padding
    pub padding: u16,
    /// Region flags
    pub flags: RegionFlags,
    /// Index of the first update segment in this region
    pub first_segment_index: u32,
    /// Description (UTF-16)
    pub description: [u8; 0x40],
    /// Absolute byte offset
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
    /// Region hash
    pub hash: u64,
    /// Unknown
    pub unknown: [u64; 3],
}

impl Default for XvcRegionHeader {
    fn default() -> Self {
        Self {
            id: 0,
            key_id: XVC_KEY_NONE,
            padding: 0,
            flags: RegionFlags::default(),
            first_segment_index: 0,
            description: [0; 0x40],
            offset: 0,
            length: 0,
            hash: 0,
            unknown: [0; 3],
        }
    }
}

impl XvcRegionHeader {
    /// Whether the region's pages are encrypted
    pub const fn is_keyed(&self) -> bool {
        self.key_id != XVC_KEY_NONE
    }

    /// Description text
    pub fn description_str(&self) -> Result<String> {
        utf16::decode(&self.description)
    }

    /// Number of pages spanned
    pub const fn page_count(&self) -> u64 {
        self.length / PAGE_SIZE
    }
}

/// Update segment (12 bytes), aligned by index with the segment table
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[brw(little)]
pub struct XvcUpdateSegment {
    /// Absolute page number of the segment's first page
    pub page_num: u32,
    /// Segment hash
    pub hash: u64,
}

impl XvcUpdateSegment {
    /// Absolute byte offset of the segment
    pub const fn offset(&self) -> u64 {
        self.page_num as u64 * PAGE_SIZE
    }
}

/// Region specifier (0x188 bytes): a key/value pair attached to a region
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct XvcRegionSpecifier {
    /// Region the pair belongs to
    pub region_id: u32,
    /// Padding
    pub padding: u32,
    /// Key (UTF-16)
    pub key: [u8; 0x80],
    /// Value (UTF-16)
    pub value: [u8; 0x100],
}

impl XvcRegionSpecifier {
    /// Build a specifier from strings
    pub fn new(region_id: u32, key: &str, value: &str) -> Result<Self> {
        Ok(Self {
            region_id,
            padding: 0,
            key: utf16::encode_array(key)?,
            value: utf16::encode_array(value)?,
        })
    }

    /// Key text
    pub fn key_str(&self) -> Result<String> {
        utf16::decode(&self.key)
    }

    /// Value text
    pub fn value_str(&self) -> Result<String> {
        utf16::decode(&self.value)
    }
}

/// Per-region presence byte
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct RegionPresence(pub u8);

impl RegionPresence {
    /// Region is present
    pub const IS_PRESENT: u8 = 0x1;
    /// Region is available
    pub const IS_AVAILABLE: u8 = 0x2;

    /// Check if flag is set
    pub const fn has(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Disc the region lives on (high nibble)
    pub const fn disc_number(&self) -> u8 {
        self.0 >> 4
    }
}

impl fmt::Display for RegionPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "disc {}{}{}",
            self.disc_number(),
            if self.has(Self::IS_PRESENT) { ", present" } else { "" },
            if self.has(Self::IS_AVAILABLE) { ", available" } else { "" }
        )
    }
}

/// Parsed XVC info region
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentIndex {
    /// Index header
    pub info: XvcInfo,
    /// Region headers (version >= 1)
    pub regions: Vec<XvcRegionHeader>,
    /// Update segments (version >= 1)
    pub update_segments: Vec<XvcUpdateSegment>,
    /// Region specifiers (version >= 2)
    pub specifiers: Vec<XvcRegionSpecifier>,
    /// Presence bytes (version >= 2 with mutable data)
    pub presence: Vec<RegionPresence>,
}

impl ContentIndex {
    /// Parse the XVC info region
    ///
    /// The presence table only exists when the header declares mutable data
    /// pages, which is why the caller passes `has_mutable_data`.
    pub fn parse(data: &[u8], has_mutable_data: bool) -> Result<Self> {
        if (data.len() as u64) < XVC_INFO_SIZE {
            return Err(FormatError::TruncatedData {
                expected: XVC_INFO_SIZE,
                actual: data.len() as u64,
            });
        }

        let mut cursor = Cursor::new(data);
        let info = XvcInfo::read(&mut cursor)?;

        let mut index = Self {
            info,
            ..Self::default()
        };

        if index.info.version >= 1 {
            index.regions = read_records(
                &mut cursor,
                u64::from(index.info.region_count),
                XVC_REGION_HEADER_SIZE,
            )?;
            index.update_segments = read_records(
                &mut cursor,
                u64::from(index.info.update_segment_count),
                XVC_UPDATE_SEGMENT_SIZE,
            )?;

            if index.info.version >= 2 {
                index.specifiers = read_records(
                    &mut cursor,
                    u64::from(index.info.region_specifier_count),
                    XVC_REGION_SPECIFIER_SIZE,
                )?;

                if has_mutable_data {
                    index.presence =
                        read_records(&mut cursor, u64::from(index.info.region_count), 1)?;
                }
            }
        }

        Ok(index)
    }

    /// Serialize back into the XVC info layout
    ///
    /// Counts are written from the header as stored; callers building new
    /// indexes should keep them in sync with the vectors.
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.info
            .write(&mut cursor)
            .map_err(|e| FormatError::BinWrite(e.to_string()))?;
        write_records(&mut cursor, &self.regions)?;
        write_records(&mut cursor, &self.update_segments)?;
        write_records(&mut cursor, &self.specifiers)?;
        write_records(&mut cursor, &self.presence)?;
        Ok(cursor.into_inner())
    }

    /// Whether any key slot is populated
    pub fn is_any_key_set(&self) -> bool {
        self.info.is_any_key_set()
    }

    /// Region by id
    pub fn region(&self, id: u32) -> Option<&XvcRegionHeader> {
        self.regions.iter().find(|region| region.id == id)
    }

    /// Specifiers attached to a region
    pub fn specifiers_for(&self, region_id: u32) -> impl Iterator<Item = &XvcRegionSpecifier> {
        self.specifiers
            .iter()
            .filter(move |specifier| specifier.region_id == region_id)
    }

    /// Byte offset of the first update segment, if any
    pub fn first_segment_offset(&self) -> Option<u64> {
        self.update_segments.first().map(XvcUpdateSegment::offset)
    }

    /// Regions holding extractable segments
    ///
    /// A region qualifies when it starts a segment run (non-zero first
    /// segment index) or when it begins exactly at the first segment.
    pub fn segment_regions(&self) -> impl Iterator<Item = &XvcRegionHeader> {
        let first_offset = self.first_segment_offset();
        self.regions.iter().filter(move |region| {
            region.first_segment_index != 0 || first_offset == Some(region.offset)
        })
    }

    /// Regions a whole-file decrypt should transform
    pub fn decryptable_regions(&self) -> impl Iterator<Item = &XvcRegionHeader> {
        let key_count = self.info.key_count;
        self.regions
            .iter()
            .filter(move |region| region.is_keyed() && region.key_id <= key_count)
    }
}
