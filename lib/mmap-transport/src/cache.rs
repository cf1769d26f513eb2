// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! CPU cache maintenance for host-visible regions.

use std::sync::atomic::{Ordering, fence};

use crate::{CommitFlags, MemoryDescriptor, TransportError};

/// Range-checked cache maintenance over part of a descriptor.
///
/// Flushes every cache line touching `[offset, offset + len)` when either
/// `write_back` or `invalidate` is requested, then fences.
pub fn commit_descriptor(
    target: &dyn MemoryDescriptor,
    offset: usize,
    len: usize,
    flags: CommitFlags,
) -> Result<(), TransportError> {
    let size = target.size();
    let in_range = offset
        .checked_add(len)
        .map(|end| end <= size)
        .unwrap_or(false);
    if !in_range {
        return Err(TransportError::OutOfRange { offset, len, size });
    }

    if len > 0 && (flags.write_back || flags.invalidate) {
        // SAFETY: the range was checked against the descriptor, which owns
        // the mapping for at least as long as the borrow of `target`.
        unsafe { flush_lines(target.as_ptr().add(offset), len) };
    }
    fence(Ordering::SeqCst);
    Ok(())
}

#[cfg(target_arch = "x86_64")]
unsafe fn flush_lines(start: *const u8, len: usize) {
    use crate::CACHE_LINE_SIZE;
    use std::arch::x86_64::{_mm_clflush, _mm_mfence};

    let first = start as usize & !(CACHE_LINE_SIZE - 1);
    let end = start as usize + len;
    let mut line = first;
    while line < end {
        // SAFETY: every flushed line overlaps the caller's valid range.
        unsafe { _mm_clflush(line as *const u8) };
        line += CACHE_LINE_SIZE;
    }
    // SAFETY: mfence has no memory safety preconditions.
    unsafe { _mm_mfence() };
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn flush_lines(_start: *const u8, _len: usize) {
    // No portable user-space flush; the full fence in the caller orders the
    // following reads.
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Slice<'a>(&'a [u8]);

    impl MemoryDescriptor for Slice<'_> {
        fn addr(&self) -> usize {
            self.0.as_ptr() as usize
        }

        fn size(&self) -> usize {
            self.0.len()
        }
    }

    #[rstest]
    #[case(0, 4096, CommitFlags::FLUSH_ALL)]
    #[case(100, 200, CommitFlags::INVALIDATE)]
    #[case(4095, 1, CommitFlags::INVALIDATE)]
    #[case(4096, 0, CommitFlags::default())]
    fn test_commit_in_range(#[case] offset: usize, #[case] len: usize, #[case] flags: CommitFlags) {
        let buf = vec![0xabu8; 4096];
        let desc = Slice(&buf);
        commit_descriptor(&desc, offset, len, flags).unwrap();
        assert!(buf.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn test_commit_out_of_range() {
        let buf = vec![0u8; 128];
        let desc = Slice(&buf);
        assert!(matches!(
            commit_descriptor(&desc, 64, 65, CommitFlags::FLUSH_ALL),
            Err(TransportError::OutOfRange {
                offset: 64,
                len: 65,
                size: 128
            })
        ));
        assert!(matches!(
            commit_descriptor(&desc, usize::MAX, 2, CommitFlags::FLUSH_ALL),
            Err(TransportError::OutOfRange { .. })
        ));
    }
}
