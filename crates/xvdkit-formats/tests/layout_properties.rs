//! Property tests for offset derivation and hash-tree addressing

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use std::collections::HashSet;
use xvdkit_formats::{
    HASH_ENTRIES_PER_PAGE, HashTreeLayout, PAGE_SIZE, RegionOffsets, VolumeFlags, XvdHeader,
    XvdType,
};

fn header_strategy() -> impl Strategy<Value = XvdHeader> {
    (
        any::<u32>(),
        0u64..(1 << 40),
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<u8>(),
        0u32..2,
    )
        .prop_map(
            |(flags, drive_size, embedded, user, xvc, dynamic, mutable, xvd_type)| XvdHeader {
                volume_flags: VolumeFlags(flags),
                drive_size,
                embedded_xvd_length: embedded,
                user_data_length: user,
                xvc_data_length: xvc,
                dynamic_header_length: dynamic,
                mutable_data_page_count: mutable,
                xvd_type: XvdType(xvd_type),
                ..XvdHeader::default()
            },
        )
}

proptest! {
    #[test]
    fn prop_offsets_monotonic_and_aligned(header in header_strategy()) {
        let offsets = RegionOffsets::derive(&header).expect("offsets");
        let ordered = offsets.as_array();
        for pair in ordered.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        for offset in ordered {
            prop_assert_eq!(offset % PAGE_SIZE, 0);
        }
    }

    #[test]
    fn prop_level_zero_is_bijective(
        hashed_pages in 1u64..20_000,
        resilient in any::<bool>(),
    ) {
        let tree = HashTreeLayout::new(XvdType::DYNAMIC, hashed_pages, resilient).expect("tree");
        let mut seen = HashSet::with_capacity(hashed_pages as usize);
        for block in 0..hashed_pages {
            let location = tree.locate(block, 0).expect("locate");
            prop_assert!(location.entry < HASH_ENTRIES_PER_PAGE);
            prop_assert!(location.page < tree.page_count());
            prop_assert!(seen.insert(location));
        }
    }

    #[test]
    fn prop_chain_ends_at_root(block_seed in any::<u64>(), hashed_pages in 1u64..10_000_000) {
        let tree = HashTreeLayout::new(XvdType::FIXED, hashed_pages, false).expect("tree");
        let block = block_seed % hashed_pages;
        let chain = tree.chain(block).expect("chain");
        prop_assert_eq!(chain.len() as u64, tree.levels());
        let root = chain.last().expect("root");
        prop_assert_eq!(root.page, 0);

        // Each level's entry sits in a page of that level only
        let pages: HashSet<u64> = chain.iter().map(|l| l.page).collect();
        prop_assert_eq!(pages.len(), chain.len());
    }
}

#[test]
fn test_upper_level_entries_cover_lower_pages() {
    let n = 170 * 170 * 2 + 5;
    let tree = HashTreeLayout::new(XvdType::DYNAMIC, n, false).expect("tree");
    assert_eq!(tree.levels(), 3);

    // Blocks sharing a level-0 page share their level-1 entry
    let a = tree.locate(170 * 3, 1).expect("locate");
    let b = tree.locate(170 * 3 + 169, 1).expect("locate");
    let c = tree.locate(170 * 4, 1).expect("locate");
    assert_eq!(a, b);
    assert_ne!(a, c);
}
