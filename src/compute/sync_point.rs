//! Named synchronization points
//!
//! Each point is a place where a stage must read back a count before the
//! next stage can be sized. The read-back scans the top level of a count
//! hierarchy on the calling thread.

use super::count_scan_data::ScanHierarchy;
use super::count_scan_operations::exclusive_scan;

/// Every count read-back in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPoint {
    ReferencedVertexCount,
    DeduplicatedVertexCount,
    DeduplicatedTriangleCount,
    VertexMapEntryCount,
    MatchedVertexCount,
    MarkedNanoSectorCount,
    MarkedMicroSectorCount,
    SmallTriangleCount,
    LargeTriangleCount,
    TexelCount,
    RenderVertexCount,
    RenderTriangleCount,
    OcclusionVertexCount,
    OcclusionTriangleCount,
}

impl SyncPoint {
    /// What the read-back count sizes
    pub fn purpose(&self) -> &'static str {
        match self {
            SyncPoint::ReferencedVertexCount => "size the reduced vertex buffer",
            SyncPoint::DeduplicatedVertexCount => "size the condensed vertex buffer",
            SyncPoint::DeduplicatedTriangleCount => "size the condensed index buffer",
            SyncPoint::VertexMapEntryCount => "size the vertex to triangle map",
            SyncPoint::MatchedVertexCount => "size the matched vertex pair list",
            SyncPoint::MarkedNanoSectorCount => "size the nano sector colour table",
            SyncPoint::MarkedMicroSectorCount => "size the micro sector colour table",
            SyncPoint::SmallTriangleCount => "size the small slot table",
            SyncPoint::LargeTriangleCount => "size the large slot table",
            SyncPoint::TexelCount => "size the colour staging buffer",
            SyncPoint::RenderVertexCount => "size the render vertex buffer",
            SyncPoint::RenderTriangleCount => "size the render index buffer",
            SyncPoint::OcclusionVertexCount => "size the occlusion vertex buffer",
            SyncPoint::OcclusionTriangleCount => "size the occlusion index buffer",
        }
    }
}

/// Fence: scan the top-level group totals and return the grand total.
///
/// Writes the top-level offsets into the hierarchy so the downward pass can
/// proceed.
pub fn read_group_totals(point: SyncPoint, hierarchy: &mut ScanHierarchy) -> u32 {
    let top = hierarchy.group_counts.len().saturating_sub(1);
    let (offsets, total) = match hierarchy.group_counts.last() {
        Some(counts) => exclusive_scan(counts),
        None => (Vec::new(), 0),
    };

    if let Some(level) = hierarchy.group_offsets.get_mut(top) {
        *level = offsets;
    }
    hierarchy.total = total;

    log::trace!(
        "[sync_point::read_group_totals] {:?} = {} ({})",
        point,
        total,
        point.purpose()
    );
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_group_totals_scans_top_level() {
        let mut hierarchy = ScanHierarchy {
            widths: vec![16],
            group_counts: vec![vec![3, 5, 2, 4]],
            group_offsets: vec![Vec::new()],
            total: 0,
        };
        let total = read_group_totals(SyncPoint::MatchedVertexCount, &mut hierarchy);
        assert_eq!(total, 14);
        assert_eq!(hierarchy.group_offsets[0], vec![0, 3, 8, 10]);
    }

    #[test]
    fn test_every_point_has_a_purpose() {
        assert!(!SyncPoint::TexelCount.purpose().is_empty());
        assert!(SyncPoint::RenderTriangleCount.purpose().contains("index"));
    }
}
