//! Texel Rasterizer Operations - Pure DOP Functions
//!
//! Gives every triangle a texel footprint sized from its longest edge and
//! lays the footprints out for colour transfer.

use super::matcher_data::MatchRecord;
use super::mesh_data::ReducedMesh;
use super::texel_data::{SizeClass, TexelLayout};
use crate::compute::{count_scan, SyncPoint};
use crate::constants::scan::TEXEL_WIDTHS;
use crate::constants::texel::{LARGE_SLOT_SIDE, SMALL_SLOT_SIDE};
use crate::constants::INVALID_INDEX;
use bit_vec::BitVec;
use rayon::prelude::*;

/// Footprint side of a triangle: longest edge in texels, clamped to 1..=32
pub fn footprint_side(positions: [[f32; 3]; 3], texel_size: f32) -> u8 {
    let edge = |a: [f32; 3], b: [f32; 3]| {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    };
    let longest = edge(positions[0], positions[1])
        .max(edge(positions[1], positions[2]))
        .max(edge(positions[2], positions[0]));
    let side = (longest / texel_size).ceil();
    side.clamp(1.0, LARGE_SLOT_SIDE as f32) as u8
}

/// Texels in a footprint of side `n`
pub fn texel_count(side: u8) -> u32 {
    let n = side as u32;
    n * (n + 1) / 2
}

pub fn size_class(side: u8) -> SizeClass {
    if side as u32 <= SMALL_SLOT_SIDE {
        SizeClass::Small
    } else {
        SizeClass::Large
    }
}

/// Linear index of texel (column, row) inside its footprint
pub fn texel_index(side: u8, column: u32, row: u32) -> u32 {
    let n = side as u32;
    // Columns before `column` hold n + (n - 1) + ... texels
    column * n - column * column.saturating_sub(1) / 2 + row
}

/// (column, row) of every texel in footprint order
pub fn texel_coordinates(side: u8) -> impl Iterator<Item = (u32, u32)> {
    let n = side as u32;
    (0..n).flat_map(move |column| (0..n - column).map(move |row| (column, row)))
}

/// Barycentric weights of a texel center for corners 0, 1, 2
pub fn texel_barycentric(side: u8, column: u32, row: u32) -> [f32; 3] {
    let n = side as f32;
    let u = (column as f32 + 1.0 / 3.0) / n;
    let v = (row as f32 + 1.0 / 3.0) / n;
    [1.0 - u - v, u, v]
}

/// Texel of a footprint covering the given barycentric weights
pub fn texel_at_barycentric(side: u8, weights: [f32; 3]) -> (u32, u32) {
    let n = side as u32;
    let column = ((weights[1] * side as f32).floor().max(0.0) as u32).min(n - 1);
    let row = ((weights[2] * side as f32).floor().max(0.0) as u32).min(n - 1 - column);
    (column, row)
}

/// Carry weights over to the old triangle's corner order
pub fn rotate_barycentric(weights: [f32; 3], winding: u8) -> [f32; 3] {
    let mut rotated = [0.0; 3];
    for (corner, &weight) in weights.iter().enumerate() {
        rotated[(corner + winding as usize) % 3] = weight;
    }
    rotated
}

/// Mesh-space position of a texel center
pub fn texel_position(corners: [[f32; 3]; 3], weights: [f32; 3]) -> [f32; 3] {
    let mut p = [0.0; 3];
    for axis in 0..3 {
        p[axis] = corners[0][axis] * weights[0] + corners[1][axis] * weights[1] + corners[2][axis] * weights[2];
    }
    p
}

/// Corner positions of a triangle
pub fn triangle_corners(mesh: &ReducedMesh, triangle: usize) -> [[f32; 3]; 3] {
    let t = mesh.indices[triangle];
    [
        mesh.positions[t[0] as usize],
        mesh.positions[t[1] as usize],
        mesh.positions[t[2] as usize],
    ]
}

/// Footprints for every triangle of the pending mesh.
///
/// `old_sides` are the stable generation's footprints; a matched triangle
/// is marked changed when its side or winding differs.
pub fn rasterize_texels(
    mesh: &ReducedMesh,
    record: &MatchRecord,
    old_sides: &[u8],
    texel_size: f32,
) -> TexelLayout {
    let sides: Vec<u8> = (0..mesh.indices.len())
        .into_par_iter()
        .map(|t| footprint_side(triangle_corners(mesh, t), texel_size))
        .collect();

    let counts: Vec<u32> = sides.par_iter().map(|&s| texel_count(s)).collect();
    let scan = count_scan(&counts, TEXEL_WIDTHS, SyncPoint::TexelCount);

    let changed: Vec<bool> = sides
        .par_iter()
        .enumerate()
        .map(|(t, &side)| {
            let old = record.triangle_matches.get(t).copied().unwrap_or(INVALID_INDEX);
            if old == INVALID_INDEX {
                return true;
            }
            let old_side = old_sides.get(old as usize).copied().unwrap_or(0);
            old_side != side || record.match_windings[t] != 0
        })
        .collect();

    let mut have_changed = BitVec::from_elem(changed.len(), false);
    for (t, &c) in changed.iter().enumerate() {
        if c {
            have_changed.set(t, true);
        }
    }

    log::debug!(
        "[texel_operations::rasterize_texels] {} triangles, {} texels, {} changed",
        sides.len(),
        scan.total,
        have_changed.iter().filter(|&c| c).count()
    );

    TexelLayout {
        sides,
        texel_offsets: scan.offsets,
        texel_total: scan.total,
        have_changed,
    }
}
