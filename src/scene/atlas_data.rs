//! Texture Atlas Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in atlas_operations.rs

use super::texel_data::SizeClass;
use bit_vec::BitVec;
use image::{GrayImage, ImageBuffer, LumaA};

/// Half-resolution chroma plane: Cb in the first channel, Cr in the second
pub type ChromaImage = ImageBuffer<LumaA<u8>, Vec<u8>>;

/// Occupancy of one size class, rebuilt every classification pass
#[derive(Debug, Clone)]
pub struct SlotTable {
    pub class: SizeClass,
    pub occupied: BitVec,
    /// Open slot IDs in ascending order, as many as were needed
    pub open_slots: Vec<u32>,
    /// Table width; only grows, always a multiple of 32
    pub max_slot_id: u32,
}

/// Slot churn of one classification pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub inherited: u32,
    pub allocated_small: u32,
    pub allocated_large: u32,
}

/// Slot of every triangle of one generation
#[derive(Debug, Clone)]
pub struct AtlasAssignment {
    pub slot_ids: Vec<u32>,
    pub size_classes: Vec<SizeClass>,
    pub small: SlotTable,
    pub large: SlotTable,
    pub stats: SlotStats,
}

/// Luma and chroma planes of one size class
#[derive(Debug, Clone)]
pub struct AtlasPlanes {
    pub class: SizeClass,
    pub luma: GrayImage,
    pub chroma: ChromaImage,
    /// Luma texels per slot edge
    pub slot_side: u32,
    pub slots_per_row: u32,
    pub slot_capacity: u32,
}

/// Persistent colour storage, owned by the render side.
///
/// Survives generation handoffs; grows copy-on-grow.
#[derive(Debug, Clone)]
pub struct AtlasStorage {
    pub small: AtlasPlanes,
    pub large: AtlasPlanes,
    pub atlas_width: u32,
}
