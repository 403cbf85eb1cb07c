//! Shared constants for the reconstruction pipeline
//!
//! Sector geometry, scan group widths and initial capacities live here so
//! every stage agrees on them.

/// Sector hierarchy geometry
pub mod sector {
    /// Edge length of a small sector, in mesh units (meters)
    pub const SMALL_SECTOR_SIZE: f32 = 2.0;
    /// Micro sectors per small sector edge
    pub const MICRO_PER_AXIS: u32 = 8;
    /// Nano sectors per micro sector edge
    pub const NANO_PER_AXIS: u32 = 8;
    pub const MICRO_SECTOR_SIZE: f32 = SMALL_SECTOR_SIZE / MICRO_PER_AXIS as f32;
    pub const NANO_SECTOR_SIZE: f32 = MICRO_SECTOR_SIZE / NANO_PER_AXIS as f32;
    /// Largest small-sector count addressable with 8-bit IDs
    pub const NARROW_ID_LIMIT: usize = 255;
    /// Elements sharing one pooled sector ID
    pub const SECTOR_GROUP_SIZE: usize = 8;
}

/// Group widths for the hierarchical count→scan stages
pub mod scan {
    /// Vertex reduction, duplicate removal
    pub const REDUCTION_WIDTHS: &[usize] = &[4, 16, 64, 512, 4096];
    /// Vertex matching and triangle size classification
    pub const MATCH_WIDTHS: &[usize] = &[16, 64, 512, 4096];
    /// Texel footprint offsets
    pub const TEXEL_WIDTHS: &[usize] = &[16, 64, 256, 1024, 4096];
    /// Per-frame culling
    pub const CULL_WIDTHS: &[usize] = &[8, 32, 128, 512, 2048, 8192];
    /// Vertex groups are padded to a multiple of this
    pub const VERTEX_GROUP_PADDING: usize = 4096;
}

/// Initial buffer capacities
pub mod capacity {
    pub const VERTEX_CAPACITY: usize = 32768;
    pub const TRIANGLE_CAPACITY: usize = 65536;
    pub const SMALL_SECTOR_CAPACITY: usize = 16;
    pub const MICRO_SECTOR_CAPACITY: usize = 512;
    /// Slot table width before any growth
    pub const INITIAL_SLOT_COUNT: u32 = 1024;
    /// Slot tables grow in steps of this many slots
    pub const SLOT_ALIGNMENT: u32 = 32;
}

/// Texel footprint limits
pub mod texel {
    /// Largest footprint side stored in a small slot
    pub const SMALL_SLOT_SIDE: u32 = 8;
    /// Largest footprint side overall
    pub const LARGE_SLOT_SIDE: u32 = 32;
    pub const DEFAULT_ATLAS_WIDTH: u32 = 16384;
}

/// Occlusion grid resolution
pub mod occlusion {
    pub const GRID_WIDTH: u32 = 256;
    pub const GRID_HEIGHT: u32 = 192;
}

/// Colour sampling cadence per thermal state, in frames
pub mod thermal {
    pub const NOMINAL_SAMPLING_RATE: u32 = 6;
    pub const FAIR_SAMPLING_RATE: u32 = 9;
    pub const SERIOUS_SAMPLING_RATE: u32 = 24;
    pub const CRITICAL_SAMPLING_RATE: u32 = 100_000_000;
}

/// Sentinel for "no match" / "no slot" in index arrays
pub const INVALID_INDEX: u32 = u32::MAX;
