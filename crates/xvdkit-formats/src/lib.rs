//! Binary layout of XVD/XVC containers
//!
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::derive_partial_eq_without_eq)] // Binary format structs
#![allow(clippy::large_stack_arrays)] // Fixed-size reserved fields
//! This crate holds the packed record definitions of the container format and
//! the pure arithmetic built on top of them:
//!
//! - **Header**: the 0x1000-byte record at offset 0
//! - **Offsets**: absolute byte offsets of every sub-region, derived from the header
//! - **Integrity**: hash-tree flags, entry length and tree shape
//! - **Hash tree**: mapping of a data page to its hash entry at any tree level
//! - **Content index**: XVC regions, update segments, specifiers and presence
//! - **User data**: package files, including the segment index
//!
//! Every record is symmetric: what [`XvdFormat::parse`] reads,
//! [`XvdFormat::build`] writes back byte for byte.
//!
//! # Example
//!
//! ```
//! use xvdkit_formats::{RegionOffsets, XvdFormat, XvdHeader};
//!
//! let header = XvdHeader {
//!     drive_size: 0x3000,
//!     user_data_length: 0x10,
//!     ..XvdHeader::default()
//! };
//! let bytes = header.build().expect("build");
//! let parsed = XvdHeader::parse(&bytes).expect("parse");
//!
//! let offsets = RegionOffsets::derive(&parsed).expect("offsets");
//! assert_eq!(offsets.embedded_xvd, 0x3000);
//! assert!(offsets.drive_data > offsets.user_data);
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod hash_tree;
pub mod header;
pub mod integrity;
pub mod offsets;
pub mod page;
pub mod segment;
pub mod user_data;
pub mod utf16;
/// XVC content index: regions, update segments, specifiers and presence
pub mod xvc;

pub use error::{FormatError, Result};
pub use hash_tree::{
    DATA_UNIT_TAG_OFFSET, HASH_ENTRIES_PER_PAGE, HASH_ENTRY_LENGTH, HASH_ENTRY_LENGTH_ENCRYPTED,
    HASH_ENTRY_SLOT_SIZE, HASH_PAGE_PADDING, HashEntryLocation, HashTreeLayout,
};
pub use header::{
    ContentType, ExtEntry, OdkIndex, VolumeFlags, XVD_HEADER_SIZE, XVD_MAGIC, XvdHeader, XvdType,
};
pub use integrity::IntegrityConfig;
pub use offsets::{ContainerLayout, RegionOffsets};
pub use page::{HEADER_INCL_SIGNATURE_SIZE, PAGE_SIZE, page_to_offset, pages_for};
pub use segment::{
    SEGMENT_METADATA_FILENAME, Segment, SegmentFlags, SegmentIndex, SegmentMetadataHeader,
    SegmentRecord,
};
pub use user_data::{
    PackageFile, PackageFileEntry, PackageFilesHeader, UserData, UserDataHeader, UserDataType,
};
pub use xvc::{
    ContentIndex, RegionFlags, RegionPresence, XVC_KEY_NONE, XvcInfo, XvcKeyId, XvcRegionHeader,
    XvcRegionSpecifier, XvcUpdateSegment,
};

use binrw::meta::{ReadEndian, WriteEndian};
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Symmetric parse/build contract shared by the top-level records
pub trait XvdFormat: Sized {
    /// Parse from bytes
    fn parse(data: &[u8]) -> Result<Self>;

    /// Build to bytes
    fn build(&self) -> Result<Vec<u8>>;

    /// Verify that building the parsed value reproduces `data`
    fn verify_round_trip(data: &[u8]) -> Result<()> {
        let rebuilt = Self::parse(data)?.build()?;
        if data != rebuilt.as_slice() {
            return Err(FormatError::BinWrite("round-trip mismatch".to_string()));
        }
        Ok(())
    }
}

/// Read `count` fixed-size records, checking the remaining length first
///
/// Guards against counts read from untrusted input asking for more records
/// than the buffer can hold.
pub(crate) fn read_records<T>(
    cursor: &mut Cursor<&[u8]>,
    count: u64,
    record_size: u64,
) -> Result<Vec<T>>
where
    T: for<'a> BinRead<Args<'a> = ()> + ReadEndian,
{
    let available = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    let needed = count
        .checked_mul(record_size)
        .ok_or(FormatError::Overflow("record table size"))?;
    if needed > available {
        return Err(FormatError::TruncatedData {
            expected: needed,
            actual: available,
        });
    }

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        records.push(T::read(cursor)?);
    }
    Ok(records)
}

/// Write a slice of records
pub(crate) fn write_records<T>(cursor: &mut Cursor<Vec<u8>>, records: &[T]) -> Result<()>
where
    T: for<'a> BinWrite<Args<'a> = ()> + WriteEndian,
{
    for record in records {
        record
            .write(cursor)
            .map_err(|e| FormatError::BinWrite(e.to_string()))?;
    }
    Ok(())
}

/// Slice `len` bytes at `offset`, failing with `TruncatedData`
pub(crate) fn slice_at(data: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or(FormatError::Overflow("slice bounds"))?;
    if end > data.len() as u64 {
        return Err(FormatError::TruncatedData {
            expected: end,
            actual: data.len() as u64,
        });
    }
    Ok(&data[offset as usize..end as usize])
}
