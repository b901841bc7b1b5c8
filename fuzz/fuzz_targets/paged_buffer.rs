//! Drives a paged buffer with arbitrary append/release sequences and checks
//! it against a `VecDeque` model and the page pool's accounting.

#![no_main]

use std::collections::VecDeque;

use libfuzzer_sys::fuzz_target;
use sealwire_core::{PagedBuffer, RecyclingPagePool};

fuzz_target!(|data: &[u8]| {
    let pool = RecyclingPagePool::new();
    let mut buffer = PagedBuffer::new(pool.clone());
    let mut model: VecDeque<u8> = VecDeque::new();

    for pair in data.chunks_exact(2) {
        let amount = usize::from(pair[1]) * 97;
        if pair[0] & 1 == 0 {
            let bytes = vec![pair[0]; amount];
            buffer.append(&bytes);
            model.extend(bytes);
        } else {
            let amount = amount.min(buffer.index());
            buffer.release(amount);
            model.drain(..amount);
        }

        assert_eq!(buffer.index(), model.len());
        assert_eq!(pool.outstanding(), buffer.page_count());
    }

    assert_eq!(buffer.to_vec(), model.iter().copied().collect::<Vec<_>>());
    drop(buffer);
    assert_eq!(pool.outstanding(), 0);
});
