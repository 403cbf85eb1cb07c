//! Texel Footprint Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in texel_operations.rs

use bit_vec::BitVec;

/// Atlas size class of a triangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Footprint side up to 8, stored in an 8x8 slot
    Small,
    /// Footprint side up to 32, stored in a 32x32 slot
    Large,
}

/// Per-triangle texel footprints of one generation.
///
/// A footprint of side `n` holds `n(n+1)/2` texels in `n` columns: column
/// `c` has `n - c` rows. Texels are addressed by (column, row) with
/// `column + row < n`.
#[derive(Debug, Clone, Default)]
pub struct TexelLayout {
    pub sides: Vec<u8>,
    /// Offset of each triangle's texels in the colour staging buffer
    pub texel_offsets: Vec<u32>,
    pub texel_total: u32,
    /// Matched triangles whose footprint or winding changed, plus all unmatched ones
    pub have_changed: BitVec,
}

/// Colour staging buffer filled during the gather phase of colour transfer
#[derive(Debug, Clone, Default)]
pub struct ColorStaging {
    pub luma: Vec<u8>,
    pub chroma: Vec<[u8; 2]>,
}
