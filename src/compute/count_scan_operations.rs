//! Count/Scan Operations - Pure DOP Functions
//!
//! Hierarchical stream compaction: count per group bottom-up, read back the
//! top-level totals at a named sync point, then push offsets back down to
//! individual elements. Every level runs as a rayon data-parallel pass.

use super::count_scan_data::{CountScanResult, ScanHierarchy};
use super::sync_point::{read_group_totals, SyncPoint};
use rayon::prelude::*;

/// Exclusive prefix sum. Returns the offsets and the grand total.
pub fn exclusive_scan(values: &[u32]) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(values.len());
    let mut running = 0u32;
    for &value in values {
        offsets.push(running);
        running += value;
    }
    (offsets, running)
}

/// Count phase: per-group sums at every level of the hierarchy
pub fn count_groups(counts: &[u32], widths: &[usize]) -> ScanHierarchy {
    debug_assert!(!widths.is_empty());
    debug_assert!(widths.windows(2).all(|w| w[1] % w[0] == 0));

    let mut group_counts: Vec<Vec<u32>> = Vec::with_capacity(widths.len());
    let first: Vec<u32> = counts
        .par_chunks(widths[0])
        .map(|chunk| chunk.iter().sum())
        .collect();
    group_counts.push(first);

    for level in 1..widths.len() {
        let ratio = widths[level] / widths[level - 1];
        let next: Vec<u32> = group_counts[level - 1]
            .par_chunks(ratio)
            .map(|chunk| chunk.iter().sum())
            .collect();
        group_counts.push(next);
    }

    ScanHierarchy {
        widths: widths.to_vec(),
        group_offsets: vec![Vec::new(); widths.len()],
        group_counts,
        total: 0,
    }
}

/// Offset phase: propagate top-level offsets down to level 0 groups.
///
/// Requires the top level to have been resolved by a sync point.
pub fn mark_group_offsets(hierarchy: &mut ScanHierarchy) {
    let levels = hierarchy.widths.len();
    for level in (0..levels.saturating_sub(1)).rev() {
        let ratio = hierarchy.widths[level + 1] / hierarchy.widths[level];
        let parent_offsets = hierarchy.group_offsets[level + 1].clone();
        let counts = &hierarchy.group_counts[level];
        let mut offsets = vec![0u32; counts.len()];

        offsets
            .par_chunks_mut(ratio)
            .zip(counts.par_chunks(ratio))
            .zip(parent_offsets.par_iter())
            .for_each(|((offsets, counts), &parent)| {
                let mut running = parent;
                for (offset, &count) in offsets.iter_mut().zip(counts) {
                    *offset = running;
                    running += count;
                }
            });

        hierarchy.group_offsets[level] = offsets;
    }
}

/// Element phase: exclusive offset of every element
pub fn element_offsets(counts: &[u32], hierarchy: &ScanHierarchy) -> Vec<u32> {
    let width = hierarchy.widths[0];
    let mut offsets = vec![0u32; counts.len()];

    offsets
        .par_chunks_mut(width)
        .zip(counts.par_chunks(width))
        .zip(hierarchy.group_offsets[0].par_iter())
        .for_each(|((offsets, counts), &base)| {
            let mut running = base;
            for (offset, &count) in offsets.iter_mut().zip(counts) {
                *offset = running;
                running += count;
            }
        });

    offsets
}

/// Full count→scan over per-element counts
pub fn count_scan(counts: &[u32], widths: &[usize], point: SyncPoint) -> CountScanResult {
    let mut hierarchy = count_groups(counts, widths);
    let total = read_group_totals(point, &mut hierarchy);
    mark_group_offsets(&mut hierarchy);
    let offsets = element_offsets(counts, &hierarchy);

    CountScanResult {
        offsets,
        total,
        hierarchy,
    }
}

/// Count→scan over boolean marks
pub fn count_scan_marks(marks: &[bool], widths: &[usize], point: SyncPoint) -> (Vec<u32>, CountScanResult) {
    let counts: Vec<u32> = marks.par_iter().map(|&m| u32::from(m)).collect();
    let result = count_scan(&counts, widths, point);
    (counts, result)
}

/// Split `data` into consecutive mutable ranges of the given lengths
pub fn split_ranges<'a, T>(data: &'a mut [T], lengths: impl Iterator<Item = usize>) -> Vec<&'a mut [T]> {
    let mut slices = Vec::new();
    let mut rest = data;
    for length in lengths {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(length);
        slices.push(head);
        rest = tail;
    }
    slices
}

/// Stream-compact: write `value(i)` for every element with a count of 1 to
/// its scanned offset.
///
/// Level 0 groups own disjoint output ranges, so each is filled in parallel.
pub fn compact<T, F>(counts: &[u32], scan: &CountScanResult, fill: T, value: F) -> Vec<T>
where
    T: Copy + Send + Sync,
    F: Fn(usize) -> T + Sync,
{
    debug_assert!(counts.iter().all(|&c| c <= 1));
    let width = scan.hierarchy.widths[0];
    let mut output = vec![fill; scan.total as usize];

    let slices = split_ranges(&mut output, scan.hierarchy.group_counts[0].iter().map(|&c| c as usize));

    slices.into_par_iter().enumerate().for_each(|(group, slice)| {
        let start = group * width;
        let end = (start + width).min(counts.len());
        let mut cursor = 0;
        for i in start..end {
            if counts[i] != 0 {
                slice[cursor] = value(i);
                cursor += 1;
            }
        }
    });

    output
}
