//! Occlusion Tester Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in occlusion_operations.rs

use super::atlas_data::ChromaImage;
use cgmath::{Matrix4, Point3};
use image::GrayImage;
use std::sync::Arc;

/// Triangle-ID and depth grid of the capture camera
#[derive(Debug, Clone)]
pub struct OcclusionGrid {
    pub width: u32,
    pub height: u32,
    /// Generation triangle index per cell, INVALID_INDEX when empty
    pub triangle_ids: Vec<u32>,
    /// Normalized device depth per cell
    pub depth: Vec<f32>,
}

/// One camera image pair, handed in by the camera ingestion side
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Full resolution luma
    pub luma: GrayImage,
    /// Half resolution Cb/Cr
    pub chroma: ChromaImage,
    /// Dynamic occluders (people); non-zero pixels block colour capture
    pub segmentation: Option<GrayImage>,
    /// World to camera clip space at capture time
    pub view_proj: Matrix4<f32>,
    pub position: Point3<f32>,
}

/// Device thermal pressure, reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// Per-triangle colours of the stable generation.
///
/// Shared with in-flight reconstructions as a snapshot; written on the
/// render side only.
#[derive(Debug, Clone, Default)]
pub struct ColorState {
    pub triangle_colors: Arc<Vec<u32>>,
    /// Frames since the last colour update
    pub sample_counter: u32,
    pub thermal_state: ThermalState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OcclusionStats {
    pub rasterized_triangles: u32,
    pub back_facing_triangles: u32,
    pub covered_cells: u32,
    pub masked_cells: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorUpdateStats {
    pub triangles_updated: u32,
    pub texels_sampled: u32,
    pub texels_occluded: u32,
}
