//! Culler Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in culler_operations.rs

use crate::math::ViewFrustum;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// View volumes of one frame, in world space
#[derive(Debug, Clone)]
pub struct ViewSet {
    /// One render view (mono) or two (stereo)
    pub views: Vec<ViewFrustum>,
    /// Capture camera used for occlusion testing and colour sampling
    pub camera: ViewFrustum,
}

/// Per small sector lane decisions of one frame
#[derive(Debug, Clone, Default)]
pub struct SectorInclusion {
    pub render: Vec<bool>,
    pub occlusion: Vec<bool>,
}

/// Indexed indirect draw arguments
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// Indirect draw command
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Indirect compute dispatch arguments
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchCommand {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

const_assert_eq!(std::mem::size_of::<DrawIndexedCommand>(), 20);
const_assert_eq!(std::mem::size_of::<DrawCommand>(), 16);
const_assert_eq!(std::mem::size_of::<DispatchCommand>(), 12);

/// Compacted geometry of one lane
#[derive(Debug, Clone, Default)]
pub struct CulledGeometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// Indices into this lane's compacted vertices
    pub indices: Vec<[u32; 3]>,
    /// Generation triangle index of every compacted triangle
    pub triangle_ids: Vec<u32>,
}

/// Everything the renderer and the occlusion tester read for one frame
#[derive(Debug, Clone, Default)]
pub struct CullOutput {
    pub render: CulledGeometry,
    /// Camera image coordinates of every render vertex, in [0, 1] when visible
    pub camera_coordinates: Vec<[f32; 2]>,
    pub occlusion: CulledGeometry,
    pub render_draw: DrawIndexedCommand,
    /// Non-indexed draw of the occlusion triangles into the ID grid
    pub occlusion_draw: DrawCommand,
    /// One workgroup per occlusion triangle for the colour update
    pub color_dispatch: DispatchCommand,
    pub stats: CullStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullStats {
    pub visible_sectors: u32,
    pub occlusion_sectors: u32,
    /// Vertices whose own sector passed the render test
    pub visible_sector_vertices: u32,
    pub render_vertices: u32,
    pub render_triangles: u32,
    pub occlusion_vertices: u32,
    pub occlusion_triangles: u32,
}

impl std::fmt::Display for CullStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Render: {} sectors, {} vertices, {} triangles | Occlusion: {} sectors, {} vertices, {} triangles",
            self.visible_sectors,
            self.render_vertices,
            self.render_triangles,
            self.occlusion_sectors,
            self.occlusion_vertices,
            self.occlusion_triangles
        )
    }
}
