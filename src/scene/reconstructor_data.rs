//! Reconstruction Coordinator Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in reconstructor_operations.rs

use super::anchor_data::AnchorSet;
use super::atlas_data::{AtlasAssignment, AtlasStorage, SlotStats};
use super::atlas_operations::TransferStats;
use super::culler_data::{CullOutput, CullStats, ViewSet};
use super::dedup_operations::DuplicateRemovalStats;
use super::matcher_data::{MatchRecord, MatchStats};
use super::mesh_data::{MeshUpdateThrottle, ReducedMesh, ReductionStats, VertexTriangleMap};
use super::occlusion_data::{CameraFrame, ColorState, ColorUpdateStats, OcclusionGrid, OcclusionStats};
use super::sorter_data::{CullingSectorIds, SectorLayout, SortStats};
use super::texel_data::TexelLayout;
use crate::memory::BufferMemoryStats;
use crate::ReconstructionConfig;
use parking_lot::RwLock;
use std::sync::Arc;

/// One complete mesh generation. Immutable once published as stable.
#[derive(Debug)]
pub struct SceneGeneration {
    pub id: u64,
    pub mesh: ReducedMesh,
    pub layout: SectorLayout,
    pub vertex_map: VertexTriangleMap,
    pub texels: TexelLayout,
    pub atlas: AtlasAssignment,
    pub sector_ids: CullingSectorIds,
}

/// Everything a background reconstruction needs, owned by the job
#[derive(Debug, Clone)]
pub struct ReconstructionJob {
    pub anchors: AnchorSet,
    /// Stable generation at launch; the match target
    pub previous: Arc<SceneGeneration>,
    /// Snapshot of the stable generation's live triangle colours
    pub previous_colors: Arc<Vec<u32>>,
    pub config: ReconstructionConfig,
    pub epoch: u64,
    pub generation_id: u64,
}

/// A finished generation waiting for handoff
#[derive(Debug)]
pub struct PendingGeneration {
    pub generation: SceneGeneration,
    pub record: MatchRecord,
    /// ID of the generation it was matched against
    pub based_on: u64,
    pub epoch: u64,
    pub stats: ReconstructionStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReconstructionStats {
    pub reduction: ReductionStats,
    pub sort: SortStats,
    pub dedup: DuplicateRemovalStats,
    pub matching: MatchStats,
    pub slots: SlotStats,
    pub memory: BufferMemoryStats,
    pub elapsed_ms: f64,
}

impl std::fmt::Display for ReconstructionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} anchors -> {} vertices / {} triangles | {} | {} | slots: {} kept, {} new | {} | {:.2}ms",
            self.reduction.anchors,
            self.dedup.vertices_after,
            self.dedup.triangles_after,
            self.sort,
            self.matching,
            self.slots.inherited,
            self.slots.allocated_small + self.slots.allocated_large,
            self.memory,
            self.elapsed_ms
        )
    }
}

/// Per-frame inputs from the host
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub anchors: &'a AnchorSet,
    pub views: &'a ViewSet,
    /// Absent while the camera stalls
    pub frame: Option<&'a CameraFrame>,
}

/// What happened during one `update_resources` call
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReport {
    /// 1-based index of the frame this report covers
    pub frame_index: u64,
    pub handed_off: bool,
    pub launched: bool,
    pub doing_rendering: bool,
    pub reconstruction: Option<ReconstructionStats>,
    pub transfer: Option<TransferStats>,
    pub cull: CullStats,
    pub occlusion: Option<OcclusionStats>,
    pub colors: Option<ColorUpdateStats>,
}

impl FrameReport {
    /// Atlas planes changed this frame and need uploading
    pub fn atlas_dirty(&self) -> bool {
        self.transfer.is_some() || self.colors.is_some()
    }
}

/// Owner of the stable generation and every render-side resource.
///
/// The stable handle is the only thing shared with other threads; it is
/// replaced, never mutated, at handoff.
pub struct SceneReconstructor {
    pub config: ReconstructionConfig,
    pub stable: Arc<RwLock<Arc<SceneGeneration>>>,
    pub atlas_storage: AtlasStorage,
    pub colors: ColorState,
    pub throttle: MeshUpdateThrottle,
    pub grid: OcclusionGrid,
    pub last_cull: CullOutput,
    /// Bumped on environment transform changes; older results are dropped
    pub epoch: u64,
    pub in_flight: bool,
    pub result_sender: flume::Sender<PendingGeneration>,
    pub result_receiver: flume::Receiver<PendingGeneration>,
    pub next_generation_id: u64,
    pub frame_index: u64,
}
