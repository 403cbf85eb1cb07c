//! Cross-Frame Matcher Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in matcher_operations.rs

use super::mesh_data::{ReducedMesh, VertexTriangleMap};
use super::sorter_data::SectorLayout;
use bit_vec::BitVec;

/// Read-only view of the stable generation used as the match target
#[derive(Debug, Clone, Copy)]
pub struct PreviousGeneration<'a> {
    pub mesh: &'a ReducedMesh,
    pub layout: &'a SectorLayout,
    pub vertex_map: &'a VertexTriangleMap,
    /// Current per-triangle colours of the stable generation
    pub colors: &'a [u32],
}

/// Where a new triangle's initial colour comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSource {
    /// Nothing to inherit: neutral texels, no colour flag
    #[default]
    None,
    /// Identity match in the vertex pass
    Matched,
    /// Average of old coloured triangles in the same nano sector
    NanoSector,
    /// Average over the same octant of the micro sector
    SubMicroSector,
    /// Average over the whole micro sector
    MicroSector,
}

/// Matching strategies, tried in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPass {
    VertexIdentity,
    NanoSectorColor,
    MicroSectorColor,
}

/// New triangles the previous passes left without a match or colour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchWorklist {
    pub unmatched: Vec<u32>,
}

/// New → old mapping of one reconstruction cycle
#[derive(Debug, Clone, Default)]
pub struct MatchRecord {
    /// Old vertex per new vertex, or INVALID_INDEX
    pub vertex_matches: Vec<u32>,
    /// Compacted (new, old) vertex pairs in new-index order
    pub matched_vertex_pairs: Vec<[u32; 2]>,
    /// Old triangle per new triangle, or INVALID_INDEX
    pub triangle_matches: Vec<u32>,
    /// New corner k is old corner (k + winding) % 3
    pub match_windings: Vec<u8>,
    /// Per old triangle: some new triangle took its identity
    pub old_match_exists: BitVec,
    /// Initial colour per new triangle
    pub inherited_colors: Vec<u32>,
    pub color_sources: Vec<ColorSource>,
    /// Old small sector per new small sector, or INVALID_INDEX
    pub small_sector_map: Vec<u32>,
    /// Set when the nano pass left triangles without a colour
    pub should_do_third_match: bool,
    /// False when there was nothing to match against
    pub did_match: bool,
}

/// Counters for one matching cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub matched_vertices: u32,
    pub matched_triangles: u32,
    pub nano_colored: u32,
    pub micro_colored: u32,
    pub uncolored: u32,
}

impl std::fmt::Display for MatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} vertices / {} triangles matched, {} nano + {} micro coloured, {} uncoloured",
            self.matched_vertices,
            self.matched_triangles,
            self.nano_colored,
            self.micro_colored,
            self.uncolored
        )
    }
}
