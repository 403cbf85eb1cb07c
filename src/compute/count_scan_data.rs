//! Count/Scan Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in count_scan_operations.rs

/// Per-level group counts and offsets of one hierarchical count→scan.
///
/// Level 0 groups cover `widths[0]` elements, level `n` groups cover
/// `widths[n]` elements. Each width is a multiple of the one below it.
#[derive(Debug, Clone, Default)]
pub struct ScanHierarchy {
    pub widths: Vec<usize>,
    pub group_counts: Vec<Vec<u32>>,
    pub group_offsets: Vec<Vec<u32>>,
    pub total: u32,
}

/// Result of a full count→scan over per-element counts
#[derive(Debug, Clone, Default)]
pub struct CountScanResult {
    /// Exclusive prefix sum per element
    pub offsets: Vec<u32>,
    pub total: u32,
    pub hierarchy: ScanHierarchy,
}
