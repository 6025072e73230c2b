//! Cryptographic operations for XVD/XVC containers
//!
//! This crate provides the primitives the container engine applies per page:
//!
//! - **Page cipher**: XTS-AES-128 decryption of 4096-byte pages with a tweak
//!   rebuilt from the page's data unit, a region id and the container VDUID
//! - **Page hashing**: truncated SHA-256 digests compared against hash-tree entries
//! - **Key entries**: the 48-byte (key id, tweak key, data key) triple supplied by
//!   the caller, plus an in-memory [`KeyStore`]
//!
//! Only decryption is implemented. Key acquisition (licenses, device keys) is
//! left to callers; the engine only consumes [`KeyEntry`] values.
//!
//! # Examples
//!
//! ```
//! use xvdkit_crypto::{PageCipher, PageTweak, PAGE_SIZE};
//!
//! let cipher = PageCipher::from_keys(&[0x11; 16], &[0x22; 16]);
//! let mut page = vec![0u8; PAGE_SIZE];
//! let tweak = PageTweak::new(0, 1, &[0xAB; 16]);
//! cipher.decrypt_page(&mut page, &tweak).expect("one full page");
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod hash;
pub mod keys;
pub mod xts;

pub use error::{CryptoError, Result};

// Re-export commonly used types
pub use hash::{page_digest, page_matches};
pub use keys::{KEY_ENTRY_SIZE, KeyEntry, KeyStore};
pub use uuid::Uuid;
pub use xts::{PAGE_SIZE, PageCipher, PageTweak, hardware_aes_available};
