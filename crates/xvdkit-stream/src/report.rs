//! Info report over the parsed structures
//!
//! The text report and the JSON summary only read what the container
//! already parsed; nothing here touches the provider.

use serde::Serialize;
use std::fmt;
use xvdkit_crypto::Uuid;
use xvdkit_formats::{IntegrityConfig, RegionOffsets};

use crate::container::{ContainerState, XvdContainer};
use crate::error::Result;

/// Segment rows printed before the table is truncated
pub const SEGMENT_ROW_LIMIT: usize = 0x1000;

/// Plain-text rendering of a container
pub struct InfoReport<'a> {
    container: &'a XvdContainer,
    show_all_files: bool,
}

impl<'a> InfoReport<'a> {
    /// Report over `container`; `show_all_files` lifts the segment row limit
    pub const fn new(container: &'a XvdContainer, show_all_files: bool) -> Self {
        Self {
            container,
            show_all_files,
        }
    }

    fn write_header(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.container.header();
        writeln!(f, "Header")?;
        writeln!(f, "  Magic:                 {}", String::from_utf8_lossy(&header.magic))?;
        writeln!(f, "  Format version:        {}", header.format_version)?;
        writeln!(f, "  Volume flags:          {}", header.volume_flags)?;
        writeln!(f, "  Container type:        {}", header.xvd_type)?;
        writeln!(f, "  Content type:          {}", header.content_type)?;
        writeln!(f, "  Drive size:            0x{:x}", header.drive_size)?;
        writeln!(f, "  VDUID:                 {}", hex::encode(header.vduid))?;
        writeln!(f, "  UDUID:                 {}", hex::encode(header.uduid))?;
        writeln!(
            f,
            "  Product id:            {}",
            Uuid::from_bytes_le(header.product_id)
        )?;
        writeln!(f, "  Sandbox id:            {}", header.sandbox_id_str())?;
        writeln!(f, "  Package version:       {}", header.package_version_str())?;
        writeln!(f, "  Sequence number:       {}", header.sequence_number)?;
        writeln!(f, "  ODK keyslot:           {}", header.odk_keyslot_id)?;
        writeln!(f, "  Embedded length:       0x{:x}", header.embedded_xvd_length)?;
        writeln!(f, "  Mutable data pages:    {}", header.mutable_data_page_count)?;
        writeln!(f, "  User data length:      0x{:x}", header.user_data_length)?;
        writeln!(f, "  XVC info length:       0x{:x}", header.xvc_data_length)?;
        writeln!(f, "  Dynamic header length: 0x{:x}", header.dynamic_header_length)?;
        writeln!(f, "  Hashed pages:          {}", header.number_of_hashed_pages())?;
        writeln!(f, "  Key id:                {}", self.container.get_key_id())
    }

    fn write_layout(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(layout) = self.container.layout() else {
            return writeln!(f, "Layout: not derived");
        };
        let offsets = &layout.offsets;
        writeln!(f, "Offsets")?;
        for (name, offset) in [
            ("Embedded container", offsets.embedded_xvd),
            ("Mutable data", offsets.mutable_data),
            ("Hash tree", offsets.hash_tree),
            ("User data", offsets.user_data),
            ("XVC info", offsets.xvc_info),
            ("Dynamic header", offsets.dynamic_header),
            ("Drive data", offsets.drive_data),
        ] {
            writeln!(f, "  {name:<22} 0x{offset:x}")?;
        }

        let integrity = &layout.integrity;
        writeln!(f, "Integrity")?;
        writeln!(f, "  Data integrity:        {}", integrity.data_integrity)?;
        writeln!(f, "  Resiliency:            {}", integrity.resiliency)?;
        writeln!(f, "  Encrypted:             {}", integrity.encrypted)?;
        writeln!(f, "  Hash entry length:     0x{:x}", integrity.hash_entry_length)?;
        writeln!(f, "  Hash tree levels:      {}", integrity.hash_tree_levels())?;
        writeln!(f, "  Hash tree pages:       {}", integrity.hash_tree_page_count())
    }

    fn write_content_index(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(index) = self.container.content_index() else {
            return Ok(());
        };
        let info = &index.info;
        writeln!(f, "Content index")?;
        writeln!(f, "  Version:               {}", info.version)?;
        writeln!(f, "  Content id:            {}", info.content_id_hex())?;
        writeln!(
            f,
            "  Description:           {}",
            info.description_str().unwrap_or_default()
        )?;
        writeln!(f, "  Key count:             {}", info.key_count)?;
        for (slot, key) in info.key_ids.iter().enumerate().filter(|(_, k)| !k.is_nulled()) {
            writeln!(f, "  Key {slot}:                 {}", key.to_guid())?;
        }
        writeln!(f, "  Initial play region:   0x{:08x}", info.initial_play_region_id)?;
        writeln!(f, "  Preview region:        0x{:08x}", info.preview_region_id)?;
        writeln!(f, "  Update segments:       {}", index.update_segments.len())?;

        writeln!(f, "Regions ({})", index.regions.len())?;
        for (i, region) in index.regions.iter().enumerate() {
            writeln!(
                f,
                "  0x{:08x} {:<24} offset 0x{:x} length 0x{:x} key {} first segment {}",
                region.id,
                region.description_str().unwrap_or_default(),
                region.offset,
                region.length,
                if region.is_keyed() {
                    region.key_id.to_string()
                } else {
                    "none".to_string()
                },
                region.first_segment_index
            )?;
            writeln!(f, "    Flags: {}", region.flags)?;
            if let Some(presence) = index.presence.get(i) {
                writeln!(f, "    Presence: {presence}")?;
            }
            for specifier in index.specifiers_for(region.id) {
                writeln!(
                    f,
                    "    {} = {}",
                    specifier.key_str().unwrap_or_default(),
                    specifier.value_str().unwrap_or_default()
                )?;
            }
        }
        Ok(())
    }

    fn write_user_data(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(user_data) = self.container.user_data() else {
            return Ok(());
        };
        writeln!(f, "User data (type {})", user_data.header.data_type.0)?;
        for file in &user_data.files {
            writeln!(f, "  {} ({} bytes)", file.name, file.contents.len())?;
        }
        Ok(())
    }

    fn write_segments(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(segments) = self.container.segment_index() else {
            return Ok(());
        };
        writeln!(f, "Segments ({})", segments.len())?;

        let limit = if self.show_all_files {
            segments.len()
        } else {
            SEGMENT_ROW_LIMIT
        };
        for (i, segment) in segments.segments.iter().take(limit).enumerate() {
            writeln!(
                f,
                "  {i:>6} flags 0x{:04x} size 0x{:>10x} {}",
                segment.record.flags.0,
                segment.file_size(),
                segment.path
            )?;
        }
        if segments.len() > limit {
            writeln!(
                f,
                "  ... {} more segments (use --all to list them)",
                segments.len() - limit
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for InfoReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} container ({})",
            if self.container.is_xvc() { "XVC" } else { "XVD" },
            self.container.provider().kind()
        )?;
        self.write_header(f)?;
        self.write_layout(f)?;
        self.write_content_index(f)?;
        self.write_user_data(f)?;
        self.write_segments(f)
    }
}

/// Region row of a [`ContainerSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    /// Region id
    pub id: u32,
    /// Description text
    pub description: String,
    /// Key slot, `None` when the region is not keyed
    pub key_id: Option<u16>,
    /// Raw flags
    pub flags: u32,
    /// Absolute offset
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
    /// First segment index
    pub first_segment_index: u32,
    /// Region specifiers as key/value pairs
    pub specifiers: Vec<(String, String)>,
}

/// Segment row of a [`ContainerSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentSummary {
    /// Relative path
    pub path: String,
    /// File size
    pub size: u64,
    /// Raw flags
    pub flags: u16,
}

/// Serializable overview of a parsed container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    /// Provider kind (`local` or `remote`)
    pub source: &'static str,
    /// Parse state
    pub state: ContainerState,
    /// Indexed container
    pub xvc: bool,
    /// Content type name
    pub content_type: String,
    /// Raw volume flags
    pub volume_flags: u32,
    /// Drive size
    pub drive_size: u64,
    /// VDUID as hex
    pub vduid: String,
    /// Key id needed for decryption
    pub key_id: Uuid,
    /// Derived offsets
    pub offsets: Option<RegionOffsets>,
    /// Integrity configuration
    pub integrity: Option<IntegrityConfig>,
    /// Regions of the content index
    pub regions: Vec<RegionSummary>,
    /// Package file names in user data
    pub package_files: Vec<String>,
    /// Segment table
    pub segments: Vec<SegmentSummary>,
}

impl XvdContainer {
    /// Text report of the parsed structures
    pub fn render_info(&self, show_all_files: bool) -> String {
        InfoReport::new(self, show_all_files).to_string()
    }

    /// Serializable overview of the parsed structures
    pub fn summary(&self) -> ContainerSummary {
        let header = self.header();
        let layout = self.layout().ok();

        let regions = self
            .content_index()
            .map(|index| {
                index
                    .regions
                    .iter()
                    .map(|region| RegionSummary {
                        id: region.id,
                        description: region.description_str().unwrap_or_default(),
                        key_id: region.is_keyed().then_some(region.key_id),
                        flags: region.flags.0,
                        offset: region.offset,
                        length: region.length,
                        first_segment_index: region.first_segment_index,
                        specifiers: index
                            .specifiers_for(region.id)
                            .map(|s| {
                                (
                                    s.key_str().unwrap_or_default(),
                                    s.value_str().unwrap_or_default(),
                                )
                            })
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let segments = self
            .segment_index()
            .map(|index| {
                index
                    .segments
                    .iter()
                    .map(|segment| SegmentSummary {
                        path: segment.path.clone(),
                        size: segment.file_size(),
                        flags: segment.record.flags.0,
                    })
                    .collect()
            })
            .unwrap_or_default();

        ContainerSummary {
            source: self.provider().kind(),
            state: self.state(),
            xvc: self.is_xvc(),
            content_type: header.content_type.to_string(),
            volume_flags: header.volume_flags.0,
            drive_size: header.drive_size,
            vduid: hex::encode(header.vduid),
            key_id: self.get_key_id(),
            offsets: layout.map(|l| l.offsets),
            integrity: layout.map(|l| l.integrity),
            regions,
            package_files: self
                .user_data()
                .map(|u| u.files.iter().map(|f| f.name.clone()).collect())
                .unwrap_or_default(),
            segments,
        }
    }

    /// Summary as pretty-printed JSON
    pub fn summary_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.summary())?)
    }
}
