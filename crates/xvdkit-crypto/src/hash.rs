//! Page digests for hash-tree verification
//!
//! Hash entries store a truncated SHA-256 of the page as it sits on disk
//! (ciphertext for encrypted containers).

use sha2::{Digest, Sha256};

/// Full SHA-256 digest length
pub const DIGEST_SIZE: usize = 32;

/// SHA-256 digest of one page
pub fn page_digest(page: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(page).into()
}

/// Compare the first `entry_length` bytes of a page digest with a stored entry
///
/// Returns false when the stored entry is shorter than `entry_length`.
pub fn page_matches(page: &[u8], stored: &[u8], entry_length: usize) -> bool {
    let entry_length = entry_length.min(DIGEST_SIZE);
    if stored.len() < entry_length {
        return false;
    }
    page_digest(page)[..entry_length] == stored[..entry_length]
}
