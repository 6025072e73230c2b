//! Integrity configuration derived from the header flags

use serde::Serialize;

use crate::error::Result;
use crate::hash_tree::{
    DATA_UNIT_TAG_OFFSET, HASH_ENTRY_LENGTH, HASH_ENTRY_LENGTH_ENCRYPTED, HASH_ENTRY_SLOT_SIZE,
    HashTreeLayout,
};
use crate::header::XvdHeader;

/// Hash-tree and encryption settings of one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntegrityConfig {
    /// A hash tree protects the payload
    pub data_integrity: bool,
    /// Tree pages are stored twice
    pub resiliency: bool,
    /// Payload pages are encrypted
    pub encrypted: bool,
    /// Number of leading digest bytes compared against an entry
    pub hash_entry_length: usize,
    /// Tree shape
    pub hash_tree: HashTreeLayout,
}

impl IntegrityConfig {
    /// Derive the configuration from a parsed header
    pub fn from_header(header: &XvdHeader) -> Result<Self> {
        let encrypted = header.encrypted();
        let resiliency = header.resiliency();
        Ok(Self {
            data_integrity: header.data_integrity(),
            resiliency,
            encrypted,
            hash_entry_length: if encrypted {
                HASH_ENTRY_LENGTH_ENCRYPTED
            } else {
                HASH_ENTRY_LENGTH
            },
            hash_tree: HashTreeLayout::new(
                header.xvd_type,
                header.number_of_hashed_pages(),
                resiliency,
            )?,
        })
    }

    /// Tree depth
    pub const fn hash_tree_levels(&self) -> u64 {
        self.hash_tree.levels()
    }

    /// Tree size in pages, including the resilient copy
    pub const fn hash_tree_page_count(&self) -> u64 {
        self.hash_tree.page_count()
    }

    /// Pages the tree occupies on disk; zero when integrity is disabled
    pub const fn stored_hash_tree_pages(&self) -> u64 {
        if self.data_integrity {
            self.hash_tree.page_count()
        } else {
            0
        }
    }

    /// Whether a page matches its stored hash entry
    pub fn entry_matches(&self, page: &[u8], entry: &[u8]) -> bool {
        xvdkit_crypto::page_matches(page, entry, self.hash_entry_length)
    }

    /// Data unit tag carried in an entry slot
    ///
    /// Only encrypted containers carry one; everything else yields 0.
    pub fn data_unit(&self, entry: &[u8]) -> u32 {
        if !self.encrypted || entry.len() < HASH_ENTRY_SLOT_SIZE as usize {
            return 0;
        }
        let tag = &entry[DATA_UNIT_TAG_OFFSET..DATA_UNIT_TAG_OFFSET + 4];
        u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::header::{VolumeFlags, XvdType};
    use pretty_assertions::assert_eq;

    fn header(flags: u32, drive_size: u64) -> XvdHeader {
        XvdHeader {
            volume_flags: VolumeFlags(flags),
            xvd_type: XvdType::DYNAMIC,
            drive_size,
            ..XvdHeader::default()
        }
    }

    #[test]
    fn test_encrypted_entry_length() {
        let config = IntegrityConfig::from_header(&header(0, 0x3000)).expect("config");
        assert!(config.data_integrity);
        assert!(config.encrypted);
        assert!(!config.resiliency);
        assert_eq!(config.hash_entry_length, 20);
        assert_eq!(config.hash_tree_levels(), 1);
        assert_eq!(config.hash_tree_page_count(), 1);

        let plain = IntegrityConfig::from_header(&header(VolumeFlags::ENCRYPTION_DISABLED, 0x3000))
            .expect("config");
        assert_eq!(plain.hash_entry_length, 24);
    }

    #[test]
    fn test_integrity_disabled_stores_no_tree() {
        let config = IntegrityConfig::from_header(&header(
            VolumeFlags::DATA_INTEGRITY_DISABLED | VolumeFlags::RESILIENCY_ENABLED,
            0x3000,
        ))
        .expect("config");
        assert!(!config.data_integrity);
        assert_eq!(config.hash_tree_page_count(), 2);
        assert_eq!(config.stored_hash_tree_pages(), 0);
    }

    #[test]
    fn test_data_unit_and_match() {
        let config = IntegrityConfig::from_header(&header(0, 0x1000)).expect("config");
        let page = vec![0x5Au8; 0x1000];
        let digest = xvdkit_crypto::page_digest(&page);

        let mut entry = [0u8; 24];
        entry[..20].copy_from_slice(&digest[..20]);
        entry[20..].copy_from_slice(&0x0102_0304u32.to_le_bytes());

        assert!(config.entry_matches(&page, &entry));
        assert_eq!(config.data_unit(&entry), 0x0102_0304);
        assert_eq!(config.data_unit(&entry[..20]), 0);

        entry[3] ^= 0xFF;
        assert!(!config.entry_matches(&page, &entry));

        let plain = IntegrityConfig::from_header(&header(VolumeFlags::ENCRYPTION_DISABLED, 0x1000))
            .expect("config");
        assert_eq!(plain.data_unit(&entry), 0);
    }
}
