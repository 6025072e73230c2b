//! Stream and walk configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of pages per cache window
pub const DEFAULT_WINDOW_PAGES: usize = 16;

/// HTTP range access settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Overall timeout of one range request
    pub request_timeout: Duration,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Attempts per range request before giving up
    pub max_retries: u32,

    /// Base delay of the exponential backoff between attempts
    ///
    /// Attempt `n` waits `retry_backoff * 2^n`.
    pub retry_backoff: Duration,

    /// User-Agent header
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(180),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            user_agent: concat!("xvdkit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl RemoteConfig {
    /// Set the number of attempts per request
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff base delay
    #[must_use]
    pub const fn with_retry_backoff(mut self, delay: Duration) -> Self {
        self.retry_backoff = delay;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the User-Agent header
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Container access settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pages held by each page cache window
    pub page_window_pages: usize,

    /// Pages held by each hash cache window
    pub hash_window_pages: usize,

    /// Regions extracted at the same time
    pub region_concurrency: usize,

    /// Remote access settings
    pub remote: RemoteConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            page_window_pages: DEFAULT_WINDOW_PAGES,
            hash_window_pages: DEFAULT_WINDOW_PAGES,
            region_concurrency: 1,
            remote: RemoteConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Set the page window size in pages (at least one)
    #[must_use]
    pub fn with_page_window_pages(mut self, pages: usize) -> Self {
        self.page_window_pages = pages.max(1);
        self
    }

    /// Set the hash window size in pages (at least one)
    #[must_use]
    pub fn with_hash_window_pages(mut self, pages: usize) -> Self {
        self.hash_window_pages = pages.max(1);
        self
    }

    /// Set how many regions run at once (at least one)
    #[must_use]
    pub fn with_region_concurrency(mut self, regions: usize) -> Self {
        self.region_concurrency = regions.max(1);
        self
    }

    /// Replace the remote settings
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }
}

/// Which regions a walk visits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionFilter {
    /// Every candidate region
    #[default]
    All,
    /// Only the listed region ids
    Include(Vec<u32>),
    /// Every candidate except the listed region ids
    Exclude(Vec<u32>),
}

impl RegionFilter {
    /// Whether a region id passes the filter
    pub fn allows(&self, id: u32) -> bool {
        match self {
            Self::All => true,
            Self::Include(ids) => ids.contains(&id),
            Self::Exclude(ids) => !ids.contains(&id),
        }
    }
}

/// Per-call options of the extraction walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkOptions {
    /// Skip page hash comparison
    pub skip_hash_check: bool,

    /// Region selection
    pub regions: RegionFilter,
}

impl WalkOptions {
    /// Disable or enable hash checking
    #[must_use]
    pub const fn with_skip_hash_check(mut self, skip: bool) -> Self {
        self.skip_hash_check = skip;
        self
    }

    /// Set the region filter
    #[must_use]
    pub fn with_regions(mut self, regions: RegionFilter) -> Self {
        self.regions = regions;
        self
    }
}
