//! Scene GPU Buffers Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in scene_buffers_operations.rs

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Interleaved render vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SceneVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Camera image coordinates for live video passthrough blending
    pub camera_coordinate: [f32; 2],
}

const_assert_eq!(std::mem::size_of::<SceneVertex>(), 32);

/// A GPU buffer whose capacity only grows, in powers of two
#[derive(Debug)]
pub struct SceneBuffer {
    pub label: &'static str,
    pub buffer: wgpu::Buffer,
    pub usage: wgpu::BufferUsages,
    /// Allocated bytes
    pub capacity: u64,
    /// Bytes written by the last upload
    pub len: u64,
    pub growth_count: u32,
}

/// Luma and chroma textures of one atlas size class
#[derive(Debug)]
pub struct AtlasTextures {
    pub luma: wgpu::Texture,
    pub luma_view: wgpu::TextureView,
    pub chroma: wgpu::Texture,
    pub chroma_view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

/// Everything the renderer binds to draw the scene
#[derive(Debug)]
pub struct SceneBuffers {
    pub vertices: SceneBuffer,
    pub indices: SceneBuffer,
    pub triangle_ids: SceneBuffer,
    pub occlusion_positions: SceneBuffer,
    pub occlusion_indices: SceneBuffer,
    pub occlusion_triangle_ids: SceneBuffer,
    pub render_indirect: SceneBuffer,
    pub occlusion_indirect: SceneBuffer,
    pub dispatch_indirect: SceneBuffer,
    pub small_atlas: AtlasTextures,
    pub large_atlas: AtlasTextures,
    pub atlas_sampler: wgpu::Sampler,
}

/// Bytes uploaded by one call, for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub buffer_bytes: u64,
    pub texture_bytes: u64,
    pub reallocations: u32,
}
