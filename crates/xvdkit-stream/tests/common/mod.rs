//! Synthetic container fixtures shared by the integration tests
//!
//! The fixture is an indexed container with two regions: region 1 is one
//! unkeyed filler page, region 2 holds the segment files back to back and is
//! keyed with key slot 1. Region 2 pages are encrypted with XTS-AES-128 and
//! every hashed page gets a level-0 entry computed over the bytes on disk.
//!
//! Without a content index the container keeps its title content type but
//! carries no user data, and every page from the user data offset to the end
//! of file is encrypted as one run.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use aes::Aes128;
use cipher::KeyInit;
use cipher::generic_array::GenericArray;
use std::io::Write;
use tempfile::NamedTempFile;
use xts_mode::Xts128;
use xvdkit_crypto::{KeyEntry, PageTweak, Uuid, page_digest};
use xvdkit_formats::{
    ContainerLayout, ContentIndex, ContentType, DATA_UNIT_TAG_OFFSET, HASH_ENTRY_LENGTH,
    HASH_ENTRY_LENGTH_ENCRYPTED, PAGE_SIZE, RegionFlags, SEGMENT_METADATA_FILENAME, SegmentFlags,
    SegmentIndex, UserData, VolumeFlags, XvcInfo, XvcKeyId, XvcRegionHeader, XvcRegionSpecifier,
    XvcUpdateSegment, XvdFormat, XvdHeader, XvdType, pages_for,
};
use xvdkit_stream::WHOLE_FILE_HEADER_ID;

pub const KEY_ID_BYTES: [u8; 16] = [0x11; 16];
pub const DATA_KEY: [u8; 16] = [0x5A; 16];
pub const TWEAK_KEY: [u8; 16] = [0xC3; 16];
pub const VDUID: [u8; 16] = [
    0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF,
];
pub const FILLER_REGION_ID: u32 = 1;
pub const FILE_REGION_ID: u32 = 2;

pub fn key_entry() -> KeyEntry {
    KeyEntry::new(Uuid::from_bytes_le(KEY_ID_BYTES), TWEAK_KEY, DATA_KEY)
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn encrypt_page(page: &mut [u8], tweak: &PageTweak) {
    let xts = Xts128::new(
        Aes128::new(GenericArray::from_slice(&DATA_KEY)),
        Aes128::new(GenericArray::from_slice(&TWEAK_KEY)),
    );
    xts.encrypt_sector(page, *tweak.as_bytes());
}

/// A built container and what went into it
pub struct Fixture {
    pub bytes: Vec<u8>,
    pub header: XvdHeader,
    pub layout: ContainerLayout,
    pub files: Vec<(String, Vec<u8>)>,
    pub file_region_offset: u64,
    pub file_region_plaintext: Vec<u8>,
    pub embedded: Vec<u8>,
    /// Whole image before any page was encrypted
    pub plaintext: Vec<u8>,
}

impl Fixture {
    pub fn hashed_pages(&self) -> u64 {
        self.layout.integrity.hash_tree.hashed_pages()
    }

    pub fn write_temp(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(&self.bytes).expect("write fixture");
        file.flush().expect("flush fixture");
        file
    }

    /// Flip one byte of a hashed page
    pub fn tamper_block(&mut self, block: u64, at: usize) {
        let offset = self.layout.block_offset(block).expect("block offset") as usize + at;
        self.bytes[offset] ^= 0xFF;
    }
}

pub struct ContainerBuilder {
    encrypted: bool,
    data_integrity: bool,
    content_index: bool,
    embedded: Vec<u8>,
    files: Vec<(String, Vec<u8>)>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self {
            encrypted: true,
            data_integrity: true,
            content_index: true,
            embedded: Vec::new(),
            files: vec![("Content/data.bin".to_string(), pattern(0x1800, 7))],
        }
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn data_integrity(mut self, data_integrity: bool) -> Self {
        self.data_integrity = data_integrity;
        self
    }

    /// Leave out the XVC info block while keeping the title content type
    pub fn content_index(mut self, content_index: bool) -> Self {
        self.content_index = content_index;
        self
    }

    pub fn embedded(mut self, embedded: Vec<u8>) -> Self {
        self.embedded = embedded;
        self
    }

    pub fn files(mut self, files: Vec<(&str, Vec<u8>)>) -> Self {
        self.files = files
            .into_iter()
            .map(|(path, contents)| (path.to_string(), contents))
            .collect();
        self
    }

    pub fn build(self) -> Fixture {
        let segment_pages: Vec<u64> = self
            .files
            .iter()
            .map(|(_, contents)| pages_for(contents.len() as u64).max(1))
            .collect();
        let file_region_pages = segment_pages.iter().sum::<u64>().max(1);
        let drive_size = (1 + file_region_pages) * PAGE_SIZE;

        let segment_index = SegmentIndex::from_files(
            self.files
                .iter()
                .map(|(path, contents)| (path.as_str(), contents.len() as u64, SegmentFlags::default())),
        )
        .expect("segment index");
        let user_data = UserData::with_package_files([(
            SEGMENT_METADATA_FILENAME,
            segment_index.build().expect("segment bytes"),
        )])
        .expect("user data")
        .build()
        .expect("user data bytes");

        let mut flags = VolumeFlags::default();
        if !self.encrypted {
            flags.set(VolumeFlags::ENCRYPTION_DISABLED);
        }
        if !self.data_integrity {
            flags.set(VolumeFlags::DATA_INTEGRITY_DISABLED);
        }

        let mut index = content_index(0, file_region_pages);
        let mut header = XvdHeader {
            volume_flags: flags,
            xvd_type: XvdType::FIXED,
            content_type: ContentType::TITLE,
            drive_size,
            vduid: VDUID,
            embedded_xvd_length: self.embedded.len() as u32,
            user_data_length: if self.content_index {
                user_data.len() as u32
            } else {
                0
            },
            xvc_data_length: if self.content_index {
                index.build().expect("index bytes").len() as u32
            } else {
                0
            },
            ..XvdHeader::default()
        };
        header.sandbox_id[..6].copy_from_slice(b"XDKS.1");

        let layout = ContainerLayout::from_header(&header).expect("layout");
        let drive_data = layout.offsets.drive_data;
        let file_region_offset = drive_data + PAGE_SIZE;
        index = content_index(drive_data, file_region_pages);

        let total = drive_data + drive_size;
        let mut bytes = vec![0u8; total as usize];
        put(&mut bytes, 0, &header.build().expect("header bytes"));
        put(&mut bytes, layout.offsets.embedded_xvd, &self.embedded);
        if self.content_index {
            put(&mut bytes, layout.offsets.user_data, &user_data);
            put(&mut bytes, layout.offsets.xvc_info, &index.build().expect("index bytes"));
        }
        put(&mut bytes, drive_data, &pattern(PAGE_SIZE as usize, 0x99));

        let mut plaintext = Vec::with_capacity((file_region_pages * PAGE_SIZE) as usize);
        for ((_, contents), pages) in self.files.iter().zip(&segment_pages) {
            let mut padded = contents.clone();
            padded.resize((pages * PAGE_SIZE) as usize, 0);
            plaintext.extend_from_slice(&padded);
        }
        plaintext.resize((file_region_pages * PAGE_SIZE) as usize, 0);
        put(&mut bytes, file_region_offset, &plaintext);

        let first_file_block = layout.block_for_offset(file_region_offset).expect("block");
        let data_unit = |block: u64| -> u32 {
            if self.data_integrity && block >= first_file_block {
                0x100 + (block - first_file_block) as u32
            } else {
                0
            }
        };

        let image = bytes.clone();

        if self.encrypted && !self.content_index {
            let first_block = layout
                .block_for_offset(layout.offsets.user_data)
                .expect("block");
            let pages = (total - layout.offsets.user_data) / PAGE_SIZE;
            for page in 0..pages {
                let offset = (layout.offsets.user_data + page * PAGE_SIZE) as usize;
                let tweak = PageTweak::new(
                    data_unit(first_block + page),
                    WHOLE_FILE_HEADER_ID,
                    &VDUID,
                );
                encrypt_page(&mut bytes[offset..offset + PAGE_SIZE as usize], &tweak);
            }
        } else if self.encrypted {
            for page in 0..file_region_pages {
                let offset = (file_region_offset + page * PAGE_SIZE) as usize;
                let tweak = PageTweak::new(
                    data_unit(first_file_block + page),
                    FILE_REGION_ID,
                    &VDUID,
                );
                encrypt_page(&mut bytes[offset..offset + PAGE_SIZE as usize], &tweak);
            }
        }

        if self.data_integrity {
            for block in 0..layout.integrity.hash_tree.hashed_pages() {
                let offset = layout.block_offset(block).expect("block offset") as usize;
                let digest = page_digest(&bytes[offset..offset + PAGE_SIZE as usize]);

                let mut entry = [0u8; HASH_ENTRY_LENGTH];
                if self.encrypted {
                    entry[..HASH_ENTRY_LENGTH_ENCRYPTED]
                        .copy_from_slice(&digest[..HASH_ENTRY_LENGTH_ENCRYPTED]);
                    entry[DATA_UNIT_TAG_OFFSET..DATA_UNIT_TAG_OFFSET + 4]
                        .copy_from_slice(&data_unit(block).to_le_bytes());
                } else {
                    entry.copy_from_slice(&digest[..HASH_ENTRY_LENGTH]);
                }

                let at = layout.hash_entry_offset(block).expect("entry offset");
                put(&mut bytes, at, &entry);
            }
        }

        Fixture {
            bytes,
            header,
            layout,
            files: self.files,
            file_region_offset,
            file_region_plaintext: plaintext,
            embedded: self.embedded,
            plaintext: image,
        }
    }
}

fn put(bytes: &mut [u8], offset: u64, data: &[u8]) {
    let start = offset as usize;
    bytes[start..start + data.len()].copy_from_slice(data);
}

fn content_index(drive_data: u64, file_region_pages: u64) -> ContentIndex {
    let mut info = XvcInfo {
        version: 2,
        region_count: 2,
        key_count: 1,
        update_segment_count: 1,
        region_specifier_count: 1,
        ..XvcInfo::default()
    };
    info.key_ids[0] = XvcKeyId(KEY_ID_BYTES);

    let filler = XvcRegionHeader {
        id: FILLER_REGION_ID,
        flags: RegionFlags(RegionFlags::RESIDENT),
        offset: drive_data,
        length: PAGE_SIZE,
        ..XvcRegionHeader::default()
    };
    let files = XvcRegionHeader {
        id: FILE_REGION_ID,
        key_id: 1,
        flags: RegionFlags(RegionFlags::RESIDENT | RegionFlags::PRESENT),
        offset: drive_data + PAGE_SIZE,
        length: file_region_pages * PAGE_SIZE,
        ..XvcRegionHeader::default()
    };

    ContentIndex {
        info,
        regions: vec![filler, files],
        update_segments: vec![XvcUpdateSegment {
            page_num: ((drive_data + PAGE_SIZE) / PAGE_SIZE) as u32,
            hash: 0,
        }],
        specifiers: vec![
            XvcRegionSpecifier::new(FILE_REGION_ID, "Languages", "en-US").expect("specifier"),
        ],
        presence: Vec::new(),
    }
}
