//! Page arithmetic
//!
//! Every region in a container is measured in 4096-byte pages. Byte lengths
//! round up to whole pages; page numbers convert back with checked
//! multiplication.

use crate::error::{FormatError, Result};

/// Size of one page in bytes
pub const PAGE_SIZE: u64 = 0x1000;

/// Size of the header including its signature pages
///
/// The embedded container (if any) starts right after it.
pub const HEADER_INCL_SIGNATURE_SIZE: u64 = 0x3000;

/// Number of pages needed to hold `length` bytes
pub const fn pages_for(length: u64) -> u64 {
    length.div_ceil(PAGE_SIZE)
}

/// Byte offset of a page number, failing on overflow
pub fn page_to_offset(page: u64) -> Result<u64> {
    page.checked_mul(PAGE_SIZE)
        .ok_or(FormatError::Overflow("page to byte offset"))
}

/// Page number containing a byte offset
pub const fn offset_to_page(offset: u64) -> u64 {
    offset / PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_for() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(0x1000), 1);
        assert_eq!(pages_for(0x1001), 2);
        assert_eq!(pages_for(u64::MAX), u64::MAX / PAGE_SIZE + 1);
    }

    #[test]
    fn test_page_offsets() {
        assert_eq!(page_to_offset(3).ok(), Some(0x3000));
        assert!(page_to_offset(u64::MAX).is_err());
        assert_eq!(offset_to_page(0x2FFF), 2);
        assert_eq!(offset_to_page(0x3000), 3);
    }
}
