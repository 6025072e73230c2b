//! Container header
//!
//! The header is a packed little-endian record at offset 0. It holds the
//! byte lengths of every sub-region; [`RegionOffsets`](crate::RegionOffsets)
//! turns them into absolute offsets.

use binrw::{BinRead, BinWrite};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;

use crate::XvdFormat;
use crate::error::{FormatError, Result};
use crate::page::{PAGE_SIZE, pages_for};

/// Header magic
pub const XVD_MAGIC: [u8; 8] = *b"msft-xvd";

/// Serialized header size
pub const XVD_HEADER_SIZE: usize = 0x1000;

/// Volume flags
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct VolumeFlags(pub u32);

impl VolumeFlags {
    /// Volume is read-only
    pub const READ_ONLY: u32 = 0x1;
    /// Payload is stored in plaintext
    pub const ENCRYPTION_DISABLED: u32 = 0x2;
    /// No hash tree is present
    pub const DATA_INTEGRITY_DISABLED: u32 = 0x4;
    /// Legacy 512-byte sectors
    pub const LEGACY_SECTOR_SIZE: u32 = 0x8;
    /// Hash tree is stored twice
    pub const RESILIENCY_ENABLED: u32 = 0x10;
    /// SRA read-only
    pub const SRA_READ_ONLY: u32 = 0x20;
    /// Region id participates in the XTS tweak
    pub const REGION_ID_IN_XTS: u32 = 0x40;
    /// ERA specific
    pub const ERA_SPECIFIC: u32 = 0x80;

    const NAMES: [(u32, &'static str); 8] = [
        (Self::READ_ONLY, "ReadOnly"),
        (Self::ENCRYPTION_DISABLED, "EncryptionDisabled"),
        (Self::DATA_INTEGRITY_DISABLED, "DataIntegrityDisabled"),
        (Self::LEGACY_SECTOR_SIZE, "LegacySectorSize"),
        (Self::RESILIENCY_ENABLED, "ResiliencyEnabled"),
        (Self::SRA_READ_ONLY, "SraReadOnly"),
        (Self::REGION_ID_IN_XTS, "RegionIdInXts"),
        (Self::ERA_SPECIFIC, "EraSpecific"),
    ];

    /// Check if flag is set
    pub const fn has(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    /// Set flag
    pub fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    /// Clear flag
    pub fn clear(&mut self, flag: u32) {
        self.0 &= !flag;
    }

    /// Flip flag
    pub fn toggle(&mut self, flag: u32) {
        self.0 ^= flag;
    }
}

impl fmt::Display for VolumeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.has(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "0x{:08x}", self.0)
        } else {
            write!(f, "0x{:08x} ({})", self.0, names.join(" | "))
        }
    }
}

/// Container type
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct XvdType(pub u32);

impl XvdType {
    /// Fixed-size (partition backed) container
    pub const FIXED: Self = Self(0);
    /// Dynamically sized container
    pub const DYNAMIC: Self = Self(1);

    /// Whether the type is one the hash-tree addressing understands
    pub const fn is_known(self) -> bool {
        self.0 == Self::FIXED.0 || self.0 == Self::DYNAMIC.0
    }
}

impl fmt::Display for XvdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::FIXED => f.write_str("Fixed"),
            Self::DYNAMIC => f.write_str("Dynamic"),
            Self(other) => write!(f, "Unknown({other})"),
        }
    }
}

/// Content type
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct ContentType(pub u32);

impl ContentType {
    /// Data volume
    pub const DATA: Self = Self(0);
    /// Game title
    pub const TITLE: Self = Self(1);
    /// System OS
    pub const SYSTEM_OS: Self = Self(2);
    /// ERA OS
    pub const ERA_OS: Self = Self(3);
    /// Scratch volume
    pub const SCRATCH: Self = Self(4);
    /// Reset data
    pub const RESET_DATA: Self = Self(5);
    /// Application
    pub const APPLICATION: Self = Self(6);
    /// Host OS
    pub const HOST_OS: Self = Self(7);
    /// Application DLC
    pub const APP_DLC: Self = Self(0x18);
    /// Title DLC
    pub const TITLE_DLC: Self = Self(0x19);
    /// Universal DLC
    pub const UNIVERSAL_DLC: Self = Self(0x1A);

    /// Content types that carry a content index (XVC)
    pub const XVC_TYPES: [Self; 5] = [
        Self::TITLE,
        Self::APPLICATION,
        Self::APP_DLC,
        Self::TITLE_DLC,
        Self::UNIVERSAL_DLC,
    ];

    /// Whether this content type is an indexed (XVC) container
    pub fn is_xvc(self) -> bool {
        Self::XVC_TYPES.contains(&self)
    }

    /// Human readable name where known
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0x00 => "Data",
            0x01 => "Title",
            0x02 => "SystemOS",
            0x03 => "EraOS",
            0x04 => "Scratch",
            0x05 => "ResetData",
            0x06 => "Application",
            0x07 => "HostOS",
            0x08 => "X360STFS",
            0x09 => "X360FATX",
            0x0A => "X360GDFX",
            0x0B => "Updater",
            0x0C => "OfflineUpdater",
            0x0D => "Template",
            0x0E => "MteHost",
            0x0F => "MteApp",
            0x10 => "MteTitle",
            0x11 => "MteEraOS",
            0x12 => "EraTools",
            0x13 => "SystemTools",
            0x14 => "SystemAux",
            0x15 => "AcousticModel",
            0x16 => "SystemCodecsVolume",
            0x17 => "QasltPackage",
            0x18 => "AppDlc",
            0x19 => "TitleDlc",
            0x1A => "UniversalDlc",
            0x1B => "SystemDataVolume",
            0x1C => "TestVolume",
            0x1D => "HardwareTestVolume",
            0x1E => "KioskContent",
            0x20 => "HostProfiler",
            0x21 => "Uwa",
            0x25 => "ServerAgent",
            _ => return None,
        })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Unknown(0x{:x})", self.0),
        }
    }
}

/// Offline distribution key slot
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[brw(little)]
pub struct OdkIndex(pub u32);

impl OdkIndex {
    /// Standard ODK
    pub const STANDARD: Self = Self(0);
    /// Green ODK
    pub const GREEN: Self = Self(1);
    /// Red ODK
    pub const RED: Self = Self(2);
    /// No ODK
    pub const INVALID: Self = Self(0xFFFF_FFFF);
}

impl fmt::Display for OdkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::STANDARD => f.write_str("StandardOdk"),
            Self::GREEN => f.write_str("GreenOdk"),
            Self::RED => f.write_str("RedOdk"),
            Self::INVALID => f.write_str("Invalid"),
            Self(other) => write!(f, "Unknown({other})"),
        }
    }
}

/// Header extension entry
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[brw(little)]
pub struct ExtEntry {
    /// Extension code
    pub code: u32,
    /// Entry length
    pub length: u32,
    /// Data offset
    pub offset: u64,
    /// Data length
    pub data_length: u32,
    /// Reserved
    pub reserved: u32,
}

/// Container header (0x1000 bytes)
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct XvdHeader {
    /// RSA signature over the rest of the header
    pub signature: [u8; 0x200],
    /// "msft-xvd"
    pub magic: [u8; 8],
    /// Volume flags
    pub volume_flags: VolumeFlags,
    /// Format version
    pub format_version: u32,
    /// Creation time (Windows file time)
    pub file_time_created: i64,
    /// Size of the drive data in bytes
    pub drive_size: u64,
    /// Volume unique id; its first 8 bytes feed the XTS tweak
    pub vduid: [u8; 16],
    /// User unique id
    pub uduid: [u8; 16],
    /// Hash of the top hash-tree block
    pub top_hash_block_hash: [u8; 32],
    /// Hash of the original XVC info
    pub original_xvc_data_hash: [u8; 32],
    /// Container type
    pub xvd_type: XvdType,
    /// Content type
    pub content_type: ContentType,
    /// Embedded container length in bytes
    pub embedded_xvd_length: u32,
    /// User data length in bytes
    pub user_data_length: u32,
    /// XVC info length in bytes
    pub xvc_data_length: u32,
    /// Dynamic header length in bytes
    pub dynamic_header_length: u32,
    /// Block size
    pub block_size: u32,
    /// Extension entries
    pub ext_entries: [ExtEntry; 4],
    /// Capabilities
    pub capabilities: [u16; 8],
    /// PE catalog hash
    pub pe_catalog_hash: [u8; 32],
    /// PDUID of the embedded container
    pub embedded_xvd_pduid: [u8; 16],
    /// Reserved
    pub reserved_33c: [u8; 16],
    /// Key material
    pub key_material: [u8; 32],
    /// Hash of the user data region
    pub user_data_hash: [u8; 32],
    /// Sandbox id (ASCII)
    pub sandbox_id: [u8; 16],
    /// Product id
    pub product_id: [u8; 16],
    /// Package unique id
    pub pduid: [u8; 16],
    /// Package version (four u16 parts)
    pub package_version: [u16; 4],
    /// PE catalog capabilities
    pub pe_catalog_caps: [u16; 16],
    /// PE catalogs
    pub pe_catalogs: [u8; 0x80],
    /// Writeable expiration date
    pub writeable_expiration_date: u32,
    /// Writeable policy flags
    pub writeable_policy_flags: u32,
    /// Persistent local storage size
    pub persistent_local_storage_size: u32,
    /// Number of mutable data pages
    pub mutable_data_page_count: u8,
    /// Unknown
    pub unknown_471: u8,
    /// Unknown
    pub unknown_472: [u8; 16],
    /// Reserved
    pub reserved_482: [u8; 0xA],
    /// Sequence number
    pub sequence_number: i64,
    /// Unknown
    pub unknown_494: [u16; 4],
    /// ODK key slot
    pub odk_keyslot_id: OdkIndex,
    /// Reserved
    pub reserved_4a0: [u8; 0xB54],
    /// Resilient data offset
    pub resilient_data_offset: u64,
    /// Resilient data length
    pub resilient_data_length: u32,
}

impl Default for XvdHeader {
    fn default() -> Self {
        Self {
            signature: [0; 0x200],
            magic: XVD_MAGIC,
            volume_flags: VolumeFlags::default(),
            format_version: 0,
            file_time_created: 0,
            drive_size: 0,
            vduid: [0; 16],
            uduid: [0; 16],
            top_hash_block_hash: [0; 32],
            original_xvc_data_hash: [0; 32],
            xvd_type: XvdType::FIXED,
            content_type: ContentType::DATA,
            embedded_xvd_length: 0,
            user_data_length: 0,
            xvc_data_length: 0,
            dynamic_header_length: 0,
            block_size: 0,
            ext_entries: [ExtEntry::default(); 4],
            capabilities: [0; 8],
            pe_catalog_hash: [0; 32],
            embedded_xvd_pduid: [0; 16],
            reserved_33c: [0; 16],
            key_material: [0; 32],
            user_data_hash: [0; 32],
            sandbox_id: [0; 16],
            product_id: [0; 16],
            pduid: [0; 16],
            package_version: [0; 4],
            pe_catalog_caps: [0; 16],
            pe_catalogs: [0; 0x80],
            writeable_expiration_date: 0,
            writeable_policy_flags: 0,
            persistent_local_storage_size: 0,
            mutable_data_page_count: 0,
            unknown_471: 0,
            unknown_472: [0; 16],
            reserved_482: [0; 0xA],
            sequence_number: 0,
            unknown_494: [0; 4],
            odk_keyslot_id: OdkIndex::INVALID,
            reserved_4a0: [0; 0xB54],
            resilient_data_offset: 0,
            resilient_data_length: 0,
        }
    }
}

impl XvdHeader {
    /// Byte offset of the volume flags field
    pub const VOLUME_FLAGS_OFFSET: usize = 0x208;

    /// Check the header magic
    pub fn validate(&self) -> Result<()> {
        if self.magic != XVD_MAGIC {
            return Err(FormatError::InvalidMagic(self.magic));
        }
        Ok(())
    }

    /// Whether the content type marks an indexed (XVC) container
    pub fn is_xvc(&self) -> bool {
        self.content_type.is_xvc()
    }

    /// Whether a hash tree protects the payload
    pub const fn data_integrity(&self) -> bool {
        !self.volume_flags.has(VolumeFlags::DATA_INTEGRITY_DISABLED)
    }

    /// Whether the hash tree is stored twice
    pub const fn resiliency(&self) -> bool {
        self.volume_flags.has(VolumeFlags::RESILIENCY_ENABLED)
    }

    /// Whether the payload is encrypted
    pub const fn encrypted(&self) -> bool {
        !self.volume_flags.has(VolumeFlags::ENCRYPTION_DISABLED)
    }

    /// Mutable data length in bytes
    pub const fn mutable_data_length(&self) -> u64 {
        self.mutable_data_page_count as u64 * PAGE_SIZE
    }

    /// Pages occupied by the embedded container
    pub const fn embedded_xvd_page_count(&self) -> u64 {
        pages_for(self.embedded_xvd_length as u64)
    }

    /// Pages occupied by user data
    pub const fn user_data_page_count(&self) -> u64 {
        pages_for(self.user_data_length as u64)
    }

    /// Pages occupied by the XVC info
    pub const fn xvc_info_page_count(&self) -> u64 {
        pages_for(self.xvc_data_length as u64)
    }

    /// Pages occupied by the dynamic header
    pub const fn dynamic_header_page_count(&self) -> u64 {
        pages_for(self.dynamic_header_length as u64)
    }

    /// Pages occupied by drive data
    pub const fn drive_page_count(&self) -> u64 {
        pages_for(self.drive_size)
    }

    /// Pages of metadata between the hash tree and drive data
    pub const fn metadata_page_count(&self) -> u64 {
        self.user_data_page_count() + self.xvc_info_page_count() + self.dynamic_header_page_count()
    }

    /// Number of pages covered by the hash tree
    pub const fn number_of_hashed_pages(&self) -> u64 {
        self.drive_page_count() + self.metadata_page_count()
    }

    /// Sandbox id as text
    pub fn sandbox_id_str(&self) -> String {
        let end = self
            .sandbox_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.sandbox_id.len());
        String::from_utf8_lossy(&self.sandbox_id[..end]).into_owned()
    }

    /// Package version as "a.b.c.d" (most significant part first)
    pub fn package_version_str(&self) -> String {
        let [revision, build, minor, major] = self.package_version;
        format!("{major}.{minor}.{build}.{revision}")
    }
}

impl XvdFormat for XvdHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < XVD_HEADER_SIZE {
            return Err(FormatError::TruncatedData {
                expected: XVD_HEADER_SIZE as u64,
                actual: data.len() as u64,
            });
        }
        let header = Self::read(&mut Cursor::new(&data[..XVD_HEADER_SIZE]))?;
        header.validate()?;
        Ok(header)
    }

    fn build(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(XVD_HEADER_SIZE));
        self.write(&mut cursor)
            .map_err(|e| FormatError::BinWrite(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}
