//! Page decryption and hashing throughput.
//!
//! Run with:
//! ```bash
//! cargo bench --bench page_cipher
//! ```

#![allow(clippy::expect_used)]

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use xvdkit_crypto::{PAGE_SIZE, PageCipher, PageTweak, page_digest};

fn bench_decrypt_page(c: &mut Criterion) {
    let cipher = PageCipher::from_keys(&[0x11; 16], &[0x22; 16]);
    let vduid = [0x5A; 16];
    let mut page = vec![0xA5u8; PAGE_SIZE];

    let mut group = c.benchmark_group("page_cipher");
    group.throughput(Throughput::Bytes(PAGE_SIZE as u64));
    group.bench_function("decrypt_page", |b| {
        let mut unit = 0u32;
        b.iter(|| {
            unit = unit.wrapping_add(1);
            let tweak = PageTweak::new(unit, 1, &vduid);
            cipher
                .decrypt_page(black_box(&mut page), &tweak)
                .expect("page sized buffer");
        });
    });
    group.bench_function("page_digest", |b| {
        b.iter(|| black_box(page_digest(black_box(&page))));
    });
    group.finish();
}

criterion_group!(benches, bench_decrypt_page);
criterion_main!(benches);
