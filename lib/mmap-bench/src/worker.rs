// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-thread scan of one slice of the mapped region.

use std::ops::Range;

use dynamo_mmap_transport::{CommitFlags, MemoryDescriptor, Transport};

use crate::cycles::read_cycles;
use crate::error::{BenchError, Result};

const WORD: usize = std::mem::size_of::<u64>();

/// Result of one worker's scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSample {
    /// Wrapping sum of every 8-byte word in the slice.
    pub accumulated: u64,
    /// Cycles spent reading, commit excluded.
    pub elapsed_cycles: u64,
}

/// Byte range owned by worker `index`: `[index * len, (index + 1) * len)`.
pub fn slice_range(index: usize, region_length: usize) -> Option<Range<usize>> {
    let start = index.checked_mul(region_length)?;
    let end = start.checked_add(region_length)?;
    Some(start..end)
}

/// Invalidate worker `index`'s slice of `mapping` and sum it.
///
/// `mapping` is `None` when the negotiated mapped length was zero; every slice
/// is then empty.
pub fn scan_slice<T: Transport>(
    transport: &T,
    mapping: Option<&T::Mapping>,
    index: usize,
    region_length: usize,
) -> Result<ScanSample> {
    let Some(mapping) = mapping.filter(|_| region_length > 0) else {
        return Ok(ScanSample::default());
    };

    let range = slice_range(index, region_length)
        .filter(|r| r.end <= mapping.size())
        .ok_or_else(|| {
            BenchError::InvalidParameters(format!(
                "slice {index} of {region_length} bytes exceeds mapping of {} bytes",
                mapping.size()
            ))
        })?;

    transport
        .commit(mapping, range.start, region_length, CommitFlags::INVALIDATE)
        .map_err(|e| BenchError::transport("commit invalidate", e))?;

    let sample = sum_words(mapping, range);
    tracing::debug!(
        thread = index,
        len = region_length,
        cycles = sample.elapsed_cycles,
        "Scanned slice"
    );
    Ok(sample)
}

/// Sum the whole 8-byte words of `range`, timed with the cycle counter.
///
/// Reads are volatile: the peer owns the memory and may be writing it.
pub fn sum_words(desc: &dyn MemoryDescriptor, range: Range<usize>) -> ScanSample {
    debug_assert!(range.end <= desc.size());
    let words = range.len() / WORD;

    // SAFETY: `range` lies inside `desc`, which stays mapped for the duration
    // of the call.
    let base = unsafe { desc.as_ptr().add(range.start) };

    let start = read_cycles();
    let accumulated = if base.align_offset(WORD) == 0 {
        let base = base as *const u64;
        (0..words).fold(0u64, |acc, i| {
            // SAFETY: aligned and within the slice.
            acc.wrapping_add(unsafe { base.add(i).read_volatile() })
        })
    } else {
        let base = base as *const [u8; WORD];
        (0..words).fold(0u64, |acc, i| {
            // SAFETY: byte arrays have alignment 1; within the slice.
            acc.wrapping_add(u64::from_ne_bytes(unsafe { base.add(i).read_volatile() }))
        })
    };
    let elapsed_cycles = read_cycles().wrapping_sub(start);

    ScanSample {
        accumulated,
        elapsed_cycles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Words(Vec<u64>);

    impl MemoryDescriptor for Words {
        fn addr(&self) -> usize {
            self.0.as_ptr() as usize
        }

        fn size(&self) -> usize {
            self.0.len() * WORD
        }
    }

    #[rstest]
    #[case(0, 0..4)]
    #[case(1, 4..8)]
    #[case(3, 12..16)]
    fn test_slices_are_disjoint_and_contiguous(#[case] index: usize, #[case] expected: Range<usize>) {
        assert_eq!(slice_range(index, 4), Some(expected));
    }

    #[test]
    fn test_slice_range_overflow() {
        assert_eq!(slice_range(2, usize::MAX), None);
    }

    #[test]
    fn test_sum_covers_every_word() {
        let words = Words((1..=16).collect());
        // Words 4..8 are 5, 6, 7, 8.
        let sample = sum_words(&words, 4 * WORD..8 * WORD);
        assert_eq!(sample.accumulated, 5 + 6 + 7 + 8);
    }

    #[test]
    fn test_sum_wraps() {
        let words = Words(vec![u64::MAX, 2]);
        assert_eq!(sum_words(&words, 0..2 * WORD).accumulated, 1);
    }

    #[test]
    fn test_sum_ignores_trailing_bytes() {
        let words = Words(vec![7, 100]);
        assert_eq!(sum_words(&words, 0..WORD + 3).accumulated, 7);
    }

    #[test]
    fn test_sum_unaligned_start() {
        let words = Words(vec![0, 0, 0]);
        let sample = sum_words(&words, 1..1 + 2 * WORD);
        assert_eq!(sample.accumulated, 0);
    }

    mod heap {
        use super::super::*;
        use dynamo_mmap_transport::testing::{Faults, HeapMapping, HeapRegion, HeapTransport};
        use dynamo_mmap_transport::{LocalRegion, MapAccess, PeerAddress};

        fn mapped(faults: Faults) -> (HeapTransport, HeapRegion, HeapMapping) {
            let responder = HeapTransport::new();
            let initiator = responder.peer().with_faults(faults);
            let domain = responder.setup_domain().unwrap();
            let endpoint = responder.setup_endpoint(&domain).unwrap();
            let mut region = responder.register_region(&endpoint, 64).unwrap();
            for (i, chunk) in region.as_mut_slice().chunks_exact_mut(WORD).enumerate() {
                chunk.copy_from_slice(&(i as u64 + 1).to_ne_bytes());
            }
            let mapping = initiator
                .map(&endpoint, &PeerAddress::new("heap-0"), region.key(), 64, MapAccess::ReadWrite)
                .unwrap();
            (initiator, region, mapping)
        }

        #[test]
        fn test_scan_commits_then_sums() {
            let (transport, _region, mapping) = mapped(Faults::default());
            let sample = scan_slice(&transport, Some(&mapping), 1, 32).unwrap();
            assert_eq!(sample.accumulated, 5 + 6 + 7 + 8);
            assert_eq!(transport.commit_count(), 1);
        }

        #[test]
        fn test_scan_commit_failure() {
            let (transport, _region, mapping) = mapped(Faults {
                commit: true,
                ..Default::default()
            });
            let err = scan_slice(&transport, Some(&mapping), 0, 32).unwrap_err();
            assert_eq!(err.operation(), "commit invalidate");
        }

        #[test]
        fn test_scan_past_mapping_is_rejected() {
            let (transport, _region, mapping) = mapped(Faults::default());
            let err = scan_slice(&transport, Some(&mapping), 2, 32).unwrap_err();
            assert!(matches!(err, BenchError::InvalidParameters(_)));
        }

        #[test]
        fn test_scan_without_mapping() {
            let transport = HeapTransport::new();
            let sample = scan_slice(&transport, None, 3, 4096).unwrap();
            assert_eq!(sample, ScanSample::default());
            assert_eq!(transport.commit_count(), 0);
        }
    }
}
