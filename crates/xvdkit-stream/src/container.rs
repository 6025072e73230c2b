//! Container handle
//!
//! Parsing runs through `Idle -> HeaderParsed -> (UserDataParsed) ->
//! (ContentIndexParsed) -> Ready`. Verification, decryption and extraction
//! all require `Ready`.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use xvdkit_crypto::Uuid;
use xvdkit_formats::{
    ContainerLayout, ContentIndex, IntegrityConfig, RegionOffsets, SEGMENT_METADATA_FILENAME,
    SegmentIndex, UserData, XVD_HEADER_SIZE, XvdFormat, XvdHeader,
};

use crate::config::StreamConfig;
use crate::error::{Result, XvdError};
use crate::provider::{ByteRangeProvider, HttpRangeFile, LocalFile, RangeCursor};

/// Parse progress of a container handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ContainerState {
    /// Nothing read yet
    Idle,
    /// Header read and layout derived
    HeaderParsed,
    /// User data (and segment index, if any) read
    UserDataParsed,
    /// Content index read
    ContentIndexParsed,
    /// All optional structures read
    Ready,
}

/// An opened XVD/XVC container
pub struct XvdContainer {
    pub(crate) provider: Arc<dyn ByteRangeProvider>,
    pub(crate) config: StreamConfig,
    pub(crate) state: ContainerState,
    pub(crate) header: XvdHeader,
    pub(crate) layout: Option<ContainerLayout>,
    pub(crate) user_data: Option<UserData>,
    pub(crate) segment_index: Option<SegmentIndex>,
    pub(crate) content_index: Option<ContentIndex>,
}

impl XvdContainer {
    /// Wrap a provider without reading anything
    pub fn new(provider: Arc<dyn ByteRangeProvider>, config: StreamConfig) -> Self {
        Self {
            provider,
            config,
            state: ContainerState::Idle,
            header: XvdHeader::default(),
            layout: None,
            user_data: None,
            segment_index: None,
            content_index: None,
        }
    }

    /// Wrap a provider and parse it to `Ready`
    pub async fn open(provider: Arc<dyn ByteRangeProvider>, config: StreamConfig) -> Result<Self> {
        let mut container = Self::new(provider, config);
        container.parse().await?;
        Ok(container)
    }

    /// Open a local file
    ///
    /// `writable` is only needed for whole-file decryption.
    pub async fn open_local(
        path: impl AsRef<Path>,
        writable: bool,
        config: StreamConfig,
    ) -> Result<Self> {
        let provider = Arc::new(LocalFile::open(path, writable)?);
        Self::open(provider, config).await
    }

    /// Open a container served over HTTP(S) with range support
    pub async fn open_url(url: &str, config: StreamConfig) -> Result<Self> {
        let provider = Arc::new(HttpRangeFile::open(url, &config.remote).await?);
        Self::open(provider, config).await
    }

    /// Read the header and every optional structure it declares
    pub async fn parse(&mut self) -> Result<()> {
        self.parse_header().await?;

        if self.header.user_data_length > 0 {
            self.parse_user_data().await?;
        }

        if self.header.is_xvc() && self.header.xvc_data_length > 0 {
            self.parse_content_index().await?;
        }

        if let (Some(index), Some(segments)) = (&self.content_index, &self.segment_index)
            && index.update_segments.len() != segments.len()
        {
            warn!(
                "Update segment count ({}) differs from segment count ({})",
                index.update_segments.len(),
                segments.len()
            );
        }

        self.state = ContainerState::Ready;
        info!(
            "Parsed {} container: type {}, {}, {}",
            self.provider.kind(),
            self.header.content_type,
            if self.header.is_xvc() { "XVC" } else { "XVD" },
            if self.header.encrypted() {
                "encrypted"
            } else {
                "not encrypted"
            }
        );
        Ok(())
    }

    async fn parse_header(&mut self) -> Result<()> {
        let length = self.provider.len();
        if length < XVD_HEADER_SIZE as u64 {
            return Err(XvdError::MalformedInput(format!(
                "container is {length} bytes, shorter than its header"
            )));
        }

        let mut cursor = RangeCursor::new(self.provider.as_ref());
        cursor.seek(0)?;
        let bytes = cursor.read_exact(XVD_HEADER_SIZE).await?;

        self.header = XvdHeader::parse(&bytes)?;
        let layout = ContainerLayout::from_header(&self.header)?;
        debug!("Region offsets: {:?}", layout.offsets);

        self.layout = Some(layout);
        self.state = ContainerState::HeaderParsed;
        Ok(())
    }

    async fn read_region(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut cursor = RangeCursor::new(self.provider.as_ref());
        cursor.seek(offset)?;
        Ok(cursor.read_exact(len as usize).await?.to_vec())
    }

    async fn parse_user_data(&mut self) -> Result<()> {
        let offset = self.offsets()?.user_data;
        let bytes = self.read_region(offset, self.header.user_data_length).await?;
        let user_data = UserData::parse(&bytes)?;

        if let Some(file) = user_data.file(SEGMENT_METADATA_FILENAME) {
            let index = SegmentIndex::parse(&file.contents)?;
            debug!("Segment index holds {} segments", index.len());
            self.segment_index = Some(index);
        }

        debug!("User data holds {} package files", user_data.files.len());
        self.user_data = Some(user_data);
        self.state = ContainerState::UserDataParsed;
        Ok(())
    }

    async fn parse_content_index(&mut self) -> Result<()> {
        let offset = self.offsets()?.xvc_info;
        let bytes = self.read_region(offset, self.header.xvc_data_length).await?;
        let index = ContentIndex::parse(&bytes, self.header.mutable_data_page_count > 0)?;

        debug!(
            "Content index v{}: {} regions, {} update segments, {} specifiers",
            index.info.version,
            index.regions.len(),
            index.update_segments.len(),
            index.specifiers.len()
        );
        self.content_index = Some(index);
        self.state = ContainerState::ContentIndexParsed;
        Ok(())
    }

    /// Fail unless parsing completed
    pub fn require_ready(&self) -> Result<()> {
        if self.state == ContainerState::Ready {
            Ok(())
        } else {
            Err(XvdError::NotReady("container has not been parsed"))
        }
    }

    /// Parse state
    pub const fn state(&self) -> ContainerState {
        self.state
    }

    /// Configuration
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Underlying provider
    pub fn provider(&self) -> &dyn ByteRangeProvider {
        self.provider.as_ref()
    }

    /// Parsed header
    pub const fn header(&self) -> &XvdHeader {
        &self.header
    }

    /// Derived layout
    pub fn layout(&self) -> Result<&ContainerLayout> {
        self.layout
            .as_ref()
            .ok_or(XvdError::NotReady("header has not been parsed"))
    }

    /// Derived region offsets
    pub fn offsets(&self) -> Result<&RegionOffsets> {
        Ok(&self.layout()?.offsets)
    }

    /// Integrity configuration
    pub fn integrity(&self) -> Result<&IntegrityConfig> {
        Ok(&self.layout()?.integrity)
    }

    /// Parsed user data, if present
    pub const fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// Parsed segment index, if present
    pub const fn segment_index(&self) -> Option<&SegmentIndex> {
        self.segment_index.as_ref()
    }

    /// Parsed content index, if present
    pub const fn content_index(&self) -> Option<&ContentIndex> {
        self.content_index.as_ref()
    }

    /// Whether the container is the indexed (XVC) variant
    pub fn is_xvc(&self) -> bool {
        self.header.is_xvc()
    }

    /// Key id needed to decrypt the container
    ///
    /// Nil when the container is not encrypted, has no content index or
    /// has every key slot nulled.
    pub fn get_key_id(&self) -> Uuid {
        if !self.header.encrypted() {
            return Uuid::nil();
        }
        self.content_index
            .as_ref()
            .and_then(|index| index.info.first_key_id())
            .map_or_else(Uuid::nil, |key| key.to_guid())
    }
}
