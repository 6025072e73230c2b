//! HTTP range access
//!
//! The container length comes from a one-byte probe (`Range: bytes=0-0`),
//! whose `Content-Range` must report the full length. Every later read is
//! its own range request; a server answering 200 instead of 206 does not
//! support ranges and is rejected.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::Once;
use tracing::{debug, info, warn};
use url::Url;

use super::{ByteRangeProvider, clamp_read};
use crate::config::RemoteConfig;
use crate::error::{Result, XvdError};

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring provider for rustls once per process
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Fails only if another provider is already installed
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Parsed `Content-Range: bytes START-END/TOTAL`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: u64,
    end: u64,
    total: Option<u64>,
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    if let Some(bytes_part) = value.strip_prefix("bytes ")
        && let Some((range, total)) = bytes_part.split_once('/')
        && let Some((start_str, end_str)) = range.split_once('-')
        && let (Ok(start), Ok(end)) = (start_str.parse::<u64>(), end_str.parse::<u64>())
        && end >= start
    {
        return Some(ContentRange {
            start,
            end,
            total: total.parse::<u64>().ok(),
        });
    }
    None
}

fn validate_content_range(value: &str, expected_start: u64, expected_length: u64) -> bool {
    parse_content_range(value)
        .is_some_and(|range| range.start == expected_start && range.end - range.start + 1 == expected_length)
}

/// Container served over HTTP(S)
pub struct HttpRangeFile {
    client: Client,
    url: Url,
    len: u64,
    config: RemoteConfig,
}

impl HttpRangeFile {
    /// Probe `url` for range support and its length
    pub async fn open(url: &str, config: &RemoteConfig) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(XvdError::UnsupportedOperation(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        ensure_crypto_provider();

        // Ranges must arrive byte-exact, so no transparent decompression
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .gzip(false)
            .brotli(false)
            .deflate(false)
            .build()?;

        let len = Self::probe(&client, &url).await?;
        info!("Opened remote container {} ({} bytes)", url, len);

        Ok(Self {
            client,
            url,
            len,
            config: config.clone(),
        })
    }

    async fn probe(client: &Client, url: &Url) -> Result<u64> {
        let response = client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => return Err(XvdError::RangeNotSupported),
            status => return Err(XvdError::HttpStatus(status)),
        }

        let value = response
            .headers()
            .get(CONTENT_RANGE)
            .ok_or_else(|| XvdError::InvalidContentRange("missing on probe".to_string()))?
            .to_str()
            .map_err(|e| XvdError::InvalidContentRange(e.to_string()))?;

        parse_content_range(value)
            .and_then(|range| range.total)
            .ok_or_else(|| XvdError::InvalidContentRange(value.to_string()))
    }

    /// Container URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch_range(&self, offset: u64, len: usize) -> Result<Bytes> {
        let range_header = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        debug!("GET {} {}", self.url, range_header);

        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, &range_header)
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK => return Err(XvdError::RangeNotSupported),
            status => return Err(XvdError::HttpStatus(status)),
        }

        if let Some(content_range) = response.headers().get(CONTENT_RANGE) {
            let value = content_range
                .to_str()
                .map_err(|e| XvdError::InvalidContentRange(e.to_string()))?;
            if !validate_content_range(value, offset, len as u64) {
                return Err(XvdError::InvalidContentRange(value.to_string()));
            }
        }

        let data = response.bytes().await?;
        if data.len() != len {
            return Err(XvdError::IncompleteRead {
                expected: len as u64,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }
}

#[async_trait]
impl ByteRangeProvider for HttpRangeFile {
    async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let len = clamp_read(offset, len, self.len)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let attempts = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match self.fetch_range(offset, len).await {
                Ok(data) => return Ok(data),
                Err(e) if e.should_retry() && attempt + 1 < attempts => {
                    // Exponential backoff
                    let delay = self
                        .config
                        .retry_backoff
                        .saturating_mul(1_u32 << attempt.min(16));
                    warn!(
                        "Range request at 0x{:x} failed ({}), retrying in {:?}",
                        offset, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn kind(&self) -> &'static str {
        "remote"
    }
}
