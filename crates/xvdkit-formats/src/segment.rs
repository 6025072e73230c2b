//! Segment index (`SegmentMetadata.bin`)
//!
//! A 0x40-byte header, `segment_count` records of 0x10 bytes and a path
//! table. Segment `i` describes the same file as update segment `i` of the
//! content index.

use binrw::{BinRead, BinWrite};
use serde::Serialize;
use std::io::Cursor;

use crate::error::{FormatError, Result};
use crate::{XvdFormat, read_records, slice_at, write_records};

/// Package file name of the segment index inside user data
pub const SEGMENT_METADATA_FILENAME: &str = "SegmentMetadata.bin";

/// Serialized size of [`SegmentMetadataHeader`]
pub const SEGMENT_METADATA_HEADER_SIZE: u32 = 0x40;
/// Serialized size of [`SegmentRecord`]
pub const SEGMENT_RECORD_SIZE: u64 = 0x10;

/// Segment index header (0x40 bytes)
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[brw(little)]
pub struct SegmentMetadataHeader {
    /// Magic
    pub magic: u32,
    /// Version (major)
    pub version0: u32,
    /// Version (minor)
    pub version1: u32,
    /// Header length; the record table starts here
    pub header_length: u32,
    /// Number of segments
    pub segment_count: u32,
    /// Byte length of the path table
    pub paths_length: u32,
    /// Package PDUID
    pub pduid: [u8; 16],
    /// Reserved
    pub reserved: [u8; 0x18],
}

impl Default for SegmentMetadataHeader {
    fn default() -> Self {
        Self {
            magic: 0,
            version0: 0,
            version1: 0,
            header_length: SEGMENT_METADATA_HEADER_SIZE,
            segment_count: 0,
            paths_length: 0,
            pduid: [0; 16],
            reserved: [0; 0x18],
        }
    }
}

/// Segment flags
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct SegmentFlags(pub u16);

impl SegmentFlags {
    /// File stays encrypted when installed
    pub const KEEP_ENCRYPTED_ON_DISK: u16 = 0x1;

    /// Check if flag is set
    pub const fn has(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }
}

/// Segment record (0x10 bytes)
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[brw(little)]
pub struct SegmentRecord {
    /// Flags
    pub flags: SegmentFlags,
    /// Path length in UTF-16 code units
    pub path_length: u16,
    /// Path offset inside the path table
    pub path_offset: u32,
    /// File size in bytes
    pub file_size: u64,
}

/// A segment with its resolved path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Record as stored
    pub record: SegmentRecord,
    /// Relative file path, as stored (may use `\` separators)
    pub path: String,
}

impl Segment {
    /// File size in bytes
    pub const fn file_size(&self) -> u64 {
        self.record.file_size
    }

    /// Pages the segment consumes; an empty file still takes one
    pub const fn page_count(&self) -> u64 {
        let pages = self.record.file_size.div_ceil(crate::page::PAGE_SIZE);
        if pages == 0 { 1 } else { pages }
    }
}

/// Parsed segment index
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentIndex {
    /// Header
    pub header: SegmentMetadataHeader,
    /// Segments in index order
    pub segments: Vec<Segment>,
}

fn decode_path(bytes: &[u8]) -> Result<String> {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|e| FormatError::InvalidUtf16(e.to_string()))
}

impl SegmentIndex {
    /// Build an index for `(path, file_size, flags)` triples
    pub fn from_files<'a, I>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, u64, SegmentFlags)>,
    {
        let mut segments = Vec::new();
        let mut path_offset = 0u32;

        for (path, file_size, flags) in files {
            let units = path.encode_utf16().count();
            let path_length =
                u16::try_from(units).map_err(|_| FormatError::Overflow("segment path length"))?;
            segments.push(Segment {
                record: SegmentRecord {
                    flags,
                    path_length,
                    path_offset,
                    file_size,
                },
                path: path.to_string(),
            });
            path_offset = path_offset
                .checked_add(u32::from(path_length) * 2)
                .ok_or(FormatError::Overflow("segment path table"))?;
        }

        let header = SegmentMetadataHeader {
            segment_count: u32::try_from(segments.len())
                .map_err(|_| FormatError::Overflow("segment count"))?,
            paths_length: path_offset,
            ..SegmentMetadataHeader::default()
        };

        Ok(Self { header, segments })
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the index holds no segments
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment by index
    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    fn paths_offset(&self) -> u64 {
        u64::from(self.header.header_length)
            + u64::from(self.header.segment_count) * SEGMENT_RECORD_SIZE
    }
}

impl XvdFormat for SegmentIndex {
    fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let header = SegmentMetadataHeader::read(&mut cursor)?;
        cursor.set_position(u64::from(header.header_length));

        let records: Vec<SegmentRecord> = read_records(
            &mut cursor,
            u64::from(header.segment_count),
            SEGMENT_RECORD_SIZE,
        )?;

        let mut index = Self {
            header,
            segments: Vec::with_capacity(records.len()),
        };
        let paths_offset = index.paths_offset();

        for record in records {
            let bytes = slice_at(
                data,
                paths_offset + u64::from(record.path_offset),
                u64::from(record.path_length) * 2,
            )?;
            index.segments.push(Segment {
                record,
                path: decode_path(bytes)?,
            });
        }

        Ok(index)
    }

    fn build(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.header
            .write(&mut cursor)
            .map_err(|e| FormatError::BinWrite(e.to_string()))?;
        cursor.set_position(u64::from(self.header.header_length));

        let records: Vec<SegmentRecord> = self.segments.iter().map(|s| s.record).collect();
        write_records(&mut cursor, &records)?;

        let paths_offset = self.paths_offset();
        let mut bytes = cursor.into_inner();
        for segment in &self.segments {
            let start = (paths_offset + u64::from(segment.record.path_offset)) as usize;
            let encoded: Vec<u8> = segment
                .path
                .encode_utf16()
                .flat_map(u16::to_le_bytes)
                .collect();
            let end = start + encoded.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[start..end].copy_from_slice(&encoded);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_trip() {
        let index = SegmentIndex::from_files([
            ("Content\\game.exe", 0x1800, SegmentFlags::default()),
            ("Content\\empty.txt", 0, SegmentFlags(SegmentFlags::KEEP_ENCRYPTED_ON_DISK)),
        ])
        .expect("index");

        let bytes = index.build().expect("build");
        assert_eq!(&bytes[0x10..0x14], &2u32.to_le_bytes());
        assert_eq!(&bytes[0x48..0x50], &0x1800u64.to_le_bytes());

        let parsed = SegmentIndex::parse(&bytes).expect("parse");
        assert_eq!(parsed, index);
        assert_eq!(parsed.get(0).expect("segment").path, "Content\\game.exe");
        assert!(parsed.get(1).expect("segment").record.flags.has(SegmentFlags::KEEP_ENCRYPTED_ON_DISK));
        SegmentIndex::verify_round_trip(&bytes).expect("round trip");
    }

    #[test]
    fn test_page_count() {
        let index = SegmentIndex::from_files([
            ("a", 0, SegmentFlags::default()),
            ("b", 0x1000, SegmentFlags::default()),
            ("c", 0x1001, SegmentFlags::default()),
        ])
        .expect("index");
        let pages: Vec<u64> = index.segments.iter().map(Segment::page_count).collect();
        assert_eq!(pages, vec![1, 1, 2]);
    }

    #[test]
    fn test_rejects_truncated_paths() {
        let index =
            SegmentIndex::from_files([("Content\\data.bin", 4, SegmentFlags::default())]).expect("index");
        let mut bytes = index.build().expect("build");
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            SegmentIndex::parse(&bytes),
            Err(FormatError::TruncatedData { .. })
        ));
    }

    #[test]
    fn test_rejects_lone_surrogate() {
        let index = SegmentIndex::from_files([("ab", 4, SegmentFlags::default())]).expect("index");
        let mut bytes = index.build().expect("build");
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&0xD800u16.to_le_bytes());
        assert!(matches!(
            SegmentIndex::parse(&bytes),
            Err(FormatError::InvalidUtf16(_))
        ));
    }
}
