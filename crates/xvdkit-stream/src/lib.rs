//! # xvdkit-stream - Container access for XVD/XVC files
//!
//! This crate runs the page walks over a container, whether it sits on
//! local disk or behind an HTTP server that honours range requests:
//!
//! - **Providers**: [`LocalFile`] (memory-mapped) and [`HttpRangeFile`]
//!   (one range request per read), both behind [`ByteRangeProvider`]
//! - **Cache windows**: page and hash read-ahead owned by one walk
//! - **Container handle**: [`XvdContainer`] parses the header, user data,
//!   segment index and content index once
//! - **Walks**: hash verification, in-place decryption, segment extraction
//!   and the embedded container copy
//! - **Report**: text and JSON views of the parsed structures
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use xvdkit_stream::{NoProgress, StreamConfig, WalkOptions, XvdContainer};
//!
//! # async fn run() -> xvdkit_stream::Result<()> {
//! let container =
//!     XvdContainer::open_url("https://example.com/game.xvc", StreamConfig::default()).await?;
//! println!("{}", container.render_info(false));
//!
//! let summary = container
//!     .extract_files(Path::new("out"), None, &WalkOptions::default(), &NoProgress)
//!     .await?;
//! println!("{} files", summary.files);
//! # Ok(())
//! # }
//! ```
//!
//! Decryption needs a key entry from `xvdkit_crypto::KeyStore` and, when
//! whole-file, a local file opened writable.

#![warn(missing_docs)]

pub mod config;
pub mod container;
pub mod decrypt;
pub mod error;
pub mod extract;
pub mod progress;
pub mod provider;
pub mod report;
pub mod verify;
pub mod window;

pub use config::{DEFAULT_WINDOW_PAGES, RegionFilter, RemoteConfig, StreamConfig, WalkOptions};
pub use container::{ContainerState, XvdContainer};
pub use decrypt::{DecryptOutcome, WHOLE_FILE_HEADER_ID};
pub use error::{Result, XvdError};
pub use extract::{EMBEDDED_TASK_ID, ExtractSummary, sanitize_segment_path};
pub use progress::{NoProgress, ProgressReporter};
pub use provider::{ByteRangeProvider, HttpRangeFile, LocalFile, RangeCursor, ensure_crypto_provider};
pub use report::{ContainerSummary, InfoReport, RegionSummary, SEGMENT_ROW_LIMIT, SegmentSummary};
pub use verify::VerifyReport;
pub use window::CacheWindow;
