//! Sector Hierarchy Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in sorter_operations.rs

/// A 2-unit cube of the mesh, a leaf of the octree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmallSector {
    /// Integer grid coordinates (min corner / small sector size)
    pub coords: [i32; 3],
    pub center: [f32; 3],
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub micro_offset: u32,
    pub micro_count: u32,
}

/// One cell of the 8x8x8 grid inside a small sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicroSector {
    pub small_sector: u32,
    /// x + 8y + 64z inside the small sector
    pub local_id: u16,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub nano_offset: u32,
    pub nano_count: u32,
}

/// One cell of the 8x8x8 grid inside a micro sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NanoSector {
    pub micro_sector: u32,
    /// x + 8y + 64z inside the micro sector
    pub local_id: u16,
    pub vertex_offset: u32,
    pub vertex_count: u32,
}

/// Width of per-element small sector IDs, chosen per cycle from the sector count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorIdWidth {
    Narrow,
    Wide,
}

/// Full three-level partition of one generation.
///
/// Vertices are stored sorted, so every sector at every level owns one
/// contiguous vertex range.
#[derive(Debug, Clone, Default)]
pub struct SectorLayout {
    pub small_sectors: Vec<SmallSector>,
    /// (key, small sector index) sorted by key
    pub sorted_keys: Vec<(u64, u32)>,
    pub micro_sectors: Vec<MicroSector>,
    pub nano_sectors: Vec<NanoSector>,
    /// Nano sector of every vertex
    pub vertex_nano_sector: Vec<u32>,
    /// Origin of the octree root cube
    pub root_origin: [f32; 3],
    pub root_size: f32,
    /// Octree subdivision passes run to reach small sectors
    pub octree_depth: u32,
}

/// Per-sort counters for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub small_sectors: usize,
    pub micro_sectors: usize,
    pub nano_sectors: usize,
    pub octree_depth: u32,
}

impl std::fmt::Display for SortStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sectors: {} small / {} micro / {} nano, depth {}",
            self.small_sectors, self.micro_sectors, self.nano_sectors, self.octree_depth
        )
    }
}

/// Integer type used for per-element small sector IDs
pub trait SectorId: Copy + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// Largest sector index this width can address
    const MAX_SECTORS: usize;
    /// Saturates at the largest ID instead of wrapping
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

impl SectorId for u8 {
    const MAX_SECTORS: usize = 255;

    fn from_index(index: usize) -> Self {
        u8::try_from(index).unwrap_or(u8::MAX)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl SectorId for u16 {
    const MAX_SECTORS: usize = 65535;

    fn from_index(index: usize) -> Self {
        u16::try_from(index).unwrap_or(u16::MAX)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Small sector IDs per vertex and triangle, pooled per group of 8
#[derive(Debug, Clone, Default)]
pub struct SectorIdBuffers<I: SectorId> {
    pub vertex_ids: Vec<I>,
    pub triangle_ids: Vec<I>,
    /// Shared ID of each 8-vertex group (valid when not mixed)
    pub vertex_group_ids: Vec<I>,
    pub vertex_group_mixed: bit_vec::BitVec,
    pub triangle_group_ids: Vec<I>,
    pub triangle_group_mixed: bit_vec::BitVec,
}

/// The two instantiations, selected once per cycle
#[derive(Debug, Clone)]
pub enum CullingSectorIds {
    Narrow(SectorIdBuffers<u8>),
    Wide(SectorIdBuffers<u16>),
}

impl Default for CullingSectorIds {
    fn default() -> Self {
        CullingSectorIds::Narrow(SectorIdBuffers::default())
    }
}
