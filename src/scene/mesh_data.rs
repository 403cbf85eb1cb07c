//! Reduced Mesh Data - Pure DOP
//!
//! NO METHODS. Just data.
//! Built by mesh_operations.rs, reordered by sorter_operations.rs and
//! condensed by dedup_operations.rs.

use crate::memory::GrowableBuffer;
use cgmath::Matrix4;

/// One merged mesh generation in structure-of-arrays form
#[derive(Debug, Clone)]
pub struct ReducedMesh {
    pub positions: GrowableBuffer<[f32; 3]>,
    pub normals: GrowableBuffer<[f32; 3]>,
    pub indices: GrowableBuffer<[u32; 3]>,
    /// Packed YCbCr + flag per triangle, see `scene::color`
    pub colors: GrowableBuffer<u32>,
    /// Mesh frame to world: first anchor's rotation, no translation
    pub mesh_to_world: Matrix4<f32>,
    /// Vertices submitted by the anchors before any filtering
    pub pre_filter_vertex_count: u32,
    pub pre_cull_vertex_count: u32,
    pub pre_cull_triangle_count: u32,
}

/// Scratch state of the reducer, reused across cycles
#[derive(Debug, Clone)]
pub struct ReducerWorkspace {
    pub vertex_marks: GrowableBuffer<u32>,
    pub anchor_vertex_offsets: Vec<u32>,
    pub anchor_triangle_offsets: Vec<u32>,
}

/// Vertex→triangle adjacency in compressed-row form
#[derive(Debug, Clone, Default)]
pub struct VertexTriangleMap {
    /// `offsets[v]..offsets[v + 1]` indexes into `triangles`
    pub offsets: Vec<u32>,
    pub triangles: Vec<u32>,
}

/// Decides when a reconstruction is worth starting
#[derive(Debug, Clone, Default)]
pub struct MeshUpdateThrottle {
    pub frames_since_update: u32,
    /// Revision of every anchor at the last reconstruction
    pub anchor_revisions: rustc_hash::FxHashMap<super::anchor_data::AnchorId, u64>,
    /// Set by an environment transform change
    pub force_next: bool,
    pub min_frames_between_updates: u32,
    pub refresh_interval_frames: u32,
}

/// Counters for one reduction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReductionStats {
    pub anchors: usize,
    pub rejected_anchors: usize,
    pub submitted_vertices: u32,
    pub referenced_vertices: u32,
    pub triangles: u32,
}
