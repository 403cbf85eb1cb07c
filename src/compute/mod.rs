//! Compute Module
//!
//! Data-parallel building blocks shared by the reconstruction and culling
//! stages.

pub mod count_scan_data;
pub mod count_scan_operations;
pub mod sync_point;

pub use count_scan_data::{CountScanResult, ScanHierarchy};
pub use count_scan_operations::{
    compact, count_groups, count_scan, count_scan_marks, element_offsets, exclusive_scan,
    mark_group_offsets, split_ranges,
};
pub use sync_point::{read_group_totals, SyncPoint};
