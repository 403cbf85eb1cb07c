//! Renderer Module - GPU upload boundary for the reconstructed scene
//!
//! The pipeline runs on the CPU; this module only moves its outputs into
//! wgpu buffers and textures.

pub mod scene_buffers_data;
pub mod scene_buffers_operations;

pub use scene_buffers_data::{AtlasTextures, SceneBuffer, SceneBuffers, SceneVertex, UploadStats};
pub use scene_buffers_operations::{
    create_atlas_textures, create_scene_buffer, create_scene_buffers, ensure_buffer_capacity, interleave_vertices,
    upload_atlas_planes, upload_frame, upload_slice, vertex_buffer_layout,
};
