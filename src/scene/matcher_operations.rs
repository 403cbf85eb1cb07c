//! Cross-Frame Matcher Operations - Pure DOP Functions
//!
//! Maps the pending generation onto the stable one so identity (and with
//! it captured colour) survives reconstruction.
//!
//! Passes, each consuming the worklist the previous one left behind:
//! - vertex identity: same sector path, position within tolerance, then
//!   triangles whose three vertices map onto one old triangle
//! - nano sector colour: average of old coloured triangles in the nano sector
//! - micro sector colour: same octant of the micro sector, then the whole micro sector
//!
//! Only the first pass produces triangle matches. The colour passes only
//! decide what an unmatched triangle starts out looking like.

use super::color::{accumulate_color, average_color, ColorSum};
use super::dedup_operations::triangles_of_vertex;
use super::matcher_data::{ColorSource, MatchPass, MatchRecord, MatchStats, MatchWorklist, PreviousGeneration};
use super::mesh_data::ReducedMesh;
use super::sorter_data::SectorLayout;
use super::sorter_operations::{map_micro_sector, map_nano_sector, map_small_sectors, vertex_sector_path};
use crate::compute::{compact, count_scan, SyncPoint};
use crate::constants::scan::MATCH_WIDTHS;
use crate::constants::sector::NANO_PER_AXIS;
use crate::constants::INVALID_INDEX;
use bit_vec::BitVec;
use cgmath::Matrix4;
use rayon::prelude::*;

/// Empty record sized for the pending generation
pub fn create_match_record(new_vertices: usize, new_triangles: usize, old_triangles: usize) -> MatchRecord {
    MatchRecord {
        vertex_matches: vec![INVALID_INDEX; new_vertices],
        matched_vertex_pairs: Vec::new(),
        triangle_matches: vec![INVALID_INDEX; new_triangles],
        match_windings: vec![0; new_triangles],
        old_match_exists: BitVec::from_elem(old_triangles, false),
        inherited_colors: vec![0; new_triangles],
        color_sources: vec![ColorSource::None; new_triangles],
        small_sector_map: Vec::new(),
        should_do_third_match: false,
        did_match: false,
    }
}

/// Matching only makes sense when both generations share a mesh frame
pub fn should_do_match(old: &ReducedMesh, new: &ReducedMesh) -> bool {
    if old.indices.is_empty() || new.indices.is_empty() {
        return false;
    }
    let a: &[[f32; 4]; 4] = old.mesh_to_world.as_ref();
    let b: &[[f32; 4]; 4] = new.mesh_to_world.as_ref();
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .all(|(x, y)| (x - y).abs() < 1e-5)
}

fn frames_equal(a: &Matrix4<f32>, b: &Matrix4<f32>) -> bool {
    let a: &[[f32; 4]; 4] = a.as_ref();
    let b: &[[f32; 4]; 4] = b.as_ref();
    a == b
}

fn distance_squared(a: [f32; 3], b: [f32; 3]) -> f32 {
    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
}

/// Keep the lowest new index per old target. Input is (old, new, payload).
fn resolve_conflicts<P: Copy + Send + Ord>(mut claims: Vec<(u32, u32, P)>) -> Vec<(u32, u32, P)> {
    claims.par_sort_unstable();
    claims.dedup_by_key(|claim| claim.0);
    claims
}

/// Pass 1a: new vertex → old vertex in the corresponding nano sector
pub fn match_vertices(
    old: &PreviousGeneration<'_>,
    new_mesh: &ReducedMesh,
    new_layout: &SectorLayout,
    tolerance: f32,
    record: &mut MatchRecord,
) -> u32 {
    record.small_sector_map = map_small_sectors(old.layout, new_layout);
    let small_map = &record.small_sector_map;
    let tolerance_squared = tolerance * tolerance;

    let claims: Vec<(u32, u32, ())> = (0..new_mesh.positions.len() as u32)
        .into_par_iter()
        .filter_map(|v| {
            let (_, _, new_nano) = vertex_sector_path(new_layout, v);
            let old_nano = map_nano_sector(old.layout, new_layout, small_map, new_nano)?;
            let range = &old.layout.nano_sectors[old_nano as usize];
            let p = new_mesh.positions[v as usize];

            let mut best: Option<(f32, u32)> = None;
            for o in range.vertex_offset..range.vertex_offset + range.vertex_count {
                let d = distance_squared(p, old.mesh.positions[o as usize]);
                if d <= tolerance_squared && best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, o));
                }
            }
            best.map(|(_, o)| (o, v, ()))
        })
        .collect();

    for (o, v, ()) in resolve_conflicts(claims) {
        record.vertex_matches[v as usize] = o;
    }

    let marks: Vec<u32> = record
        .vertex_matches
        .par_iter()
        .map(|&o| u32::from(o != INVALID_INDEX))
        .collect();
    let scan = count_scan(&marks, MATCH_WIDTHS, SyncPoint::MatchedVertexCount);
    let vertex_matches = &record.vertex_matches;
    record.matched_vertex_pairs = compact(&marks, &scan, [0u32; 2], |v| [v as u32, vertex_matches[v]]);

    scan.total
}

/// Rotation taking `corners` onto `old_triangle`, if they are the same triangle
pub fn winding_between(corners: [u32; 3], old_triangle: [u32; 3]) -> Option<u8> {
    (0..3u8).find(|&w| {
        let w = w as usize;
        old_triangle[w] == corners[0]
            && old_triangle[(w + 1) % 3] == corners[1]
            && old_triangle[(w + 2) % 3] == corners[2]
    })
}

/// Pass 1b: new triangle → old triangle over matched vertices
pub fn match_triangles(old: &PreviousGeneration<'_>, new_mesh: &ReducedMesh, record: &mut MatchRecord) -> u32 {
    let vertex_matches = &record.vertex_matches;

    let claims: Vec<(u32, u32, u8)> = new_mesh
        .indices
        .par_iter()
        .enumerate()
        .filter_map(|(t, tri)| {
            let corners = [
                vertex_matches[tri[0] as usize],
                vertex_matches[tri[1] as usize],
                vertex_matches[tri[2] as usize],
            ];
            if corners.contains(&INVALID_INDEX) {
                return None;
            }
            triangles_of_vertex(old.vertex_map, corners[0])
                .iter()
                .find_map(|&ot| {
                    winding_between(corners, old.mesh.indices[ot as usize]).map(|w| (ot, t as u32, w))
                })
        })
        .collect();

    let resolved = resolve_conflicts(claims);
    for &(ot, t, w) in &resolved {
        record.triangle_matches[t as usize] = ot;
        record.match_windings[t as usize] = w;
        record.color_sources[t as usize] = ColorSource::Matched;
        record.inherited_colors[t as usize] = old.colors.get(ot as usize).copied().unwrap_or(0);
        record.old_match_exists.set(ot as usize, true);
    }

    resolved.len() as u32
}

/// Pass 1: vertex identity. Returns the worklist of unmatched triangles.
pub fn match_meshes(
    old: Option<&PreviousGeneration<'_>>,
    new_mesh: &ReducedMesh,
    new_layout: &SectorLayout,
    tolerance: f32,
    record: &mut MatchRecord,
    stats: &mut MatchStats,
) -> MatchWorklist {
    let old = match old {
        Some(old) if should_do_match(old.mesh, new_mesh) => old,
        Some(old) => {
            if !frames_equal(&old.mesh.mesh_to_world, &new_mesh.mesh_to_world) {
                log::debug!("[matcher_operations::match_meshes] Mesh frame changed, skipping match");
            }
            return MatchWorklist::default();
        }
        None => return MatchWorklist::default(),
    };

    record.did_match = true;
    stats.matched_vertices = match_vertices(old, new_mesh, new_layout, tolerance, record);
    stats.matched_triangles = match_triangles(old, new_mesh, record);

    let unmatched: Vec<u32> = record
        .triangle_matches
        .par_iter()
        .enumerate()
        .filter(|(_, &ot)| ot == INVALID_INDEX)
        .map(|(t, _)| t as u32)
        .collect();

    log::debug!(
        "[matcher_operations::match_meshes] {:?}: {} vertices, {} triangles matched, {} left",
        MatchPass::VertexIdentity,
        stats.matched_vertices,
        stats.matched_triangles,
        unmatched.len()
    );
    MatchWorklist { unmatched }
}

/// Octant of a nano sector inside its micro sector
fn nano_octant(local_id: u16) -> usize {
    let half = (NANO_PER_AXIS / 2) as u16;
    let per_axis = NANO_PER_AXIS as u16;
    let x = local_id % per_axis;
    let y = (local_id / per_axis) % per_axis;
    let z = local_id / (per_axis * per_axis);
    usize::from(x >= half) | usize::from(y >= half) << 1 | usize::from(z >= half) << 2
}

/// Compacted slot of every marked sector, plus the slot count
fn compact_marked_sectors(marks: &[u32], point: SyncPoint) -> (Vec<u32>, u32) {
    let scan = count_scan(marks, MATCH_WIDTHS, point);
    (scan.offsets, scan.total)
}

/// Pass 2: average colour of the corresponding old nano sector
pub fn match_nano_sector_colors(
    old: Option<&PreviousGeneration<'_>>,
    new_mesh: &ReducedMesh,
    new_layout: &SectorLayout,
    record: &mut MatchRecord,
    worklist: MatchWorklist,
    stats: &mut MatchStats,
) -> MatchWorklist {
    let old = match old {
        Some(old) if record.did_match && !worklist.unmatched.is_empty() => old,
        _ => return worklist,
    };
    let small_map = &record.small_sector_map;

    let targets: Vec<u32> = worklist
        .unmatched
        .par_iter()
        .map(|&t| {
            let first = new_mesh.indices[t as usize][0];
            let (_, _, nano) = vertex_sector_path(new_layout, first);
            map_nano_sector(old.layout, new_layout, small_map, nano).unwrap_or(INVALID_INDEX)
        })
        .collect();

    let mut marks = vec![0u32; old.layout.nano_sectors.len()];
    for &nano in targets.iter().filter(|&&n| n != INVALID_INDEX) {
        marks[nano as usize] = 1;
    }
    let (slots, slot_count) = compact_marked_sectors(&marks, SyncPoint::MarkedNanoSectorCount);

    let contributions: Vec<(u32, u32)> = old
        .mesh
        .indices
        .par_iter()
        .enumerate()
        .filter_map(|(ot, tri)| {
            let nano = old.layout.vertex_nano_sector[tri[0] as usize] as usize;
            (marks[nano] != 0).then(|| (slots[nano], old.colors.get(ot).copied().unwrap_or(0)))
        })
        .collect();
    let mut sums = vec![ColorSum::default(); slot_count as usize];
    for (slot, color) in contributions {
        accumulate_color(&mut sums[slot as usize], color);
    }

    let mut remaining = Vec::new();
    for (&t, &nano) in worklist.unmatched.iter().zip(&targets) {
        let color = if nano == INVALID_INDEX {
            None
        } else {
            average_color(&sums[slots[nano as usize] as usize])
        };
        match color {
            Some(color) => {
                record.inherited_colors[t as usize] = color;
                record.color_sources[t as usize] = ColorSource::NanoSector;
                stats.nano_colored += 1;
            }
            None => remaining.push(t),
        }
    }

    record.should_do_third_match = !remaining.is_empty();
    log::debug!(
        "[matcher_operations::match_nano_sector_colors] {:?}: {} coloured, {} left",
        MatchPass::NanoSectorColor,
        stats.nano_colored,
        remaining.len()
    );
    MatchWorklist { unmatched: remaining }
}

/// Pass 3: micro sector octant average, then whole micro sector average
pub fn match_micro_sector_colors(
    old: Option<&PreviousGeneration<'_>>,
    new_mesh: &ReducedMesh,
    new_layout: &SectorLayout,
    record: &mut MatchRecord,
    worklist: MatchWorklist,
    stats: &mut MatchStats,
) -> MatchWorklist {
    let old = match old {
        Some(old) if record.should_do_third_match => old,
        _ => {
            stats.uncolored += worklist.unmatched.len() as u32;
            return worklist;
        }
    };
    let small_map = &record.small_sector_map;

    // (old micro sector, octant of the new triangle's nano sector)
    let targets: Vec<(u32, usize)> = worklist
        .unmatched
        .par_iter()
        .map(|&t| {
            let first = new_mesh.indices[t as usize][0];
            let (_, micro, nano) = vertex_sector_path(new_layout, first);
            let octant = nano_octant(new_layout.nano_sectors[nano as usize].local_id);
            let old_micro = map_micro_sector(old.layout, new_layout, small_map, micro).unwrap_or(INVALID_INDEX);
            (old_micro, octant)
        })
        .collect();

    let mut marks = vec![0u32; old.layout.micro_sectors.len()];
    for &(micro, _) in targets.iter().filter(|(m, _)| *m != INVALID_INDEX) {
        marks[micro as usize] = 1;
    }
    let (slots, slot_count) = compact_marked_sectors(&marks, SyncPoint::MarkedMicroSectorCount);

    // Nine sums per marked micro sector: eight octants, then the whole sector
    let contributions: Vec<(usize, u32)> = old
        .mesh
        .indices
        .par_iter()
        .enumerate()
        .filter_map(|(ot, tri)| {
            let nano = old.layout.vertex_nano_sector[tri[0] as usize];
            let nano_sector = &old.layout.nano_sectors[nano as usize];
            let micro = nano_sector.micro_sector as usize;
            (marks[micro] != 0).then(|| {
                let base = slots[micro] as usize * 9;
                (base + nano_octant(nano_sector.local_id), old.colors.get(ot).copied().unwrap_or(0))
            })
        })
        .collect();
    let mut sums = vec![ColorSum::default(); slot_count as usize * 9];
    for (slot, color) in contributions {
        accumulate_color(&mut sums[slot], color);
        accumulate_color(&mut sums[slot - slot % 9 + 8], color);
    }

    let mut remaining = Vec::new();
    for (&t, &(micro, octant)) in worklist.unmatched.iter().zip(&targets) {
        if micro == INVALID_INDEX {
            remaining.push(t);
            continue;
        }
        let base = slots[micro as usize] as usize * 9;
        let found = average_color(&sums[base + octant])
            .map(|c| (c, ColorSource::SubMicroSector))
            .or_else(|| average_color(&sums[base + 8]).map(|c| (c, ColorSource::MicroSector)));
        match found {
            Some((color, source)) => {
                record.inherited_colors[t as usize] = color;
                record.color_sources[t as usize] = source;
                stats.micro_colored += 1;
            }
            None => remaining.push(t),
        }
    }

    stats.uncolored += remaining.len() as u32;
    log::debug!(
        "[matcher_operations::match_micro_sector_colors] {:?}: {} coloured, {} without colour",
        MatchPass::MicroSectorColor,
        stats.micro_colored,
        remaining.len()
    );
    MatchWorklist { unmatched: remaining }
}

/// True if no two entries share a target
pub fn is_injective(matches: &[u32]) -> bool {
    let mut targets: Vec<u32> = matches.iter().copied().filter(|&m| m != INVALID_INDEX).collect();
    targets.sort_unstable();
    targets.windows(2).all(|w| w[0] != w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::assign;
    use crate::scene::color::pack_color;
    use crate::scene::dedup_operations::build_vertex_map;
    use crate::scene::mesh_data::VertexTriangleMap;
    use crate::scene::mesh_operations::create_reduced_mesh;
    use crate::scene::sorter_operations::do_scene_sort;

    const TOLERANCE: f32 = 2.4 / 256.0;

    struct Generation {
        mesh: ReducedMesh,
        layout: SectorLayout,
        map: VertexTriangleMap,
        colors: Vec<u32>,
    }

    fn generation(positions: &[[f32; 3]], indices: &[[u32; 3]], color: u32) -> Generation {
        let mut mesh = create_reduced_mesh(16, 16);
        assign(&mut mesh.positions, positions);
        assign(&mut mesh.normals, &vec![[0.0, 0.0, 1.0]; positions.len()]);
        assign(&mut mesh.indices, indices);
        assign(&mut mesh.colors, &vec![0; indices.len()]);
        let mut layout = SectorLayout::default();
        do_scene_sort(&mut mesh, &mut layout);
        let map = build_vertex_map(&mesh.indices, mesh.positions.len());
        let colors = vec![color; indices.len()];
        Generation { mesh, layout, map, colors }
    }

    fn previous(g: &Generation) -> PreviousGeneration<'_> {
        PreviousGeneration {
            mesh: &g.mesh,
            layout: &g.layout,
            vertex_map: &g.map,
            colors: &g.colors,
        }
    }

    fn patch() -> (Vec<[f32; 3]>, Vec<[u32; 3]>) {
        let mut positions = Vec::new();
        for y in 0..6 {
            for x in 0..6 {
                positions.push([0.1 + 0.1 * x as f32, 0.1 + 0.1 * y as f32, 0.5]);
            }
        }
        let mut indices = Vec::new();
        for y in 0..5u32 {
            for x in 0..5u32 {
                let i = y * 6 + x;
                indices.push([i, i + 1, i + 7]);
                indices.push([i, i + 7, i + 6]);
            }
        }
        (positions, indices)
    }

    fn run_pass_one(old: &Generation, new: &Generation) -> (MatchRecord, MatchStats, MatchWorklist) {
        let mut record = create_match_record(new.mesh.positions.len(), new.mesh.indices.len(), old.mesh.indices.len());
        let mut stats = MatchStats::default();
        let prev = previous(old);
        let worklist = match_meshes(Some(&prev), &new.mesh, &new.layout, TOLERANCE, &mut record, &mut stats);
        (record, stats, worklist)
    }

    #[test]
    fn test_identical_mesh_matches_fully() {
        let (positions, indices) = patch();
        let old = generation(&positions, &indices, pack_color(90, 100, 110));
        let new = generation(&positions, &indices, 0);

        let (record, stats, worklist) = run_pass_one(&old, &new);
        assert_eq!(stats.matched_vertices as usize, positions.len());
        assert_eq!(stats.matched_triangles as usize, indices.len());
        assert!(worklist.unmatched.is_empty());
        assert!(record.match_windings.iter().all(|&w| w == 0));
        assert!(record.old_match_exists.all());
        assert!(record.inherited_colors.iter().all(|&c| c == pack_color(90, 100, 110)));
        assert_eq!(record.matched_vertex_pairs.len(), positions.len());
    }

    #[test]
    fn test_rotated_triangle_records_winding() {
        let positions = [[0.5, 0.5, 0.5], [0.6, 0.5, 0.5], [0.5, 0.6, 0.5]];
        let old = generation(&positions, &[[0, 1, 2]], 0);
        let new = generation(&positions, &[[1, 2, 0]], 0);

        let (record, _, _) = run_pass_one(&old, &new);
        assert_eq!(record.triangle_matches[0], 0);
        let corners = new.mesh.indices[0].map(|v| record.vertex_matches[v as usize]);
        let w = record.match_windings[0] as usize;
        for k in 0..3 {
            assert_eq!(old.mesh.indices[0][(k + w) % 3], corners[k]);
        }
    }

    #[test]
    fn test_flipped_triangle_does_not_match() {
        let positions = [[0.5, 0.5, 0.5], [0.6, 0.5, 0.5], [0.5, 0.6, 0.5]];
        let old = generation(&positions, &[[0, 1, 2]], 0);
        let new = generation(&positions, &[[0, 2, 1]], 0);
        let (record, stats, worklist) = run_pass_one(&old, &new);
        assert_eq!(stats.matched_vertices, 3);
        assert_eq!(record.triangle_matches[0], INVALID_INDEX);
        assert_eq!(worklist.unmatched, vec![0]);
    }

    #[test]
    fn test_vertex_match_tolerance_and_conflicts() {
        let old = generation(&[[0.5, 0.5, 0.5], [0.9, 0.9, 0.9]], &[[0, 0, 1]], 0);
        let new = generation(
            &[
                [0.5, 0.5, 0.5],
                [0.5 + TOLERANCE * 0.5, 0.5, 0.5],
                [0.9 + TOLERANCE * 3.0, 0.9, 0.9],
            ],
            &[[0, 1, 2]],
            0,
        );

        let (record, stats, _) = run_pass_one(&old, &new);
        assert_eq!(stats.matched_vertices, 1);
        assert!(is_injective(&record.vertex_matches));
        let matched: Vec<usize> = (0..3).filter(|&v| record.vertex_matches[v] != INVALID_INDEX).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(new.mesh.positions[matched[0]], [0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_nano_pass_inherits_neighbor_color() {
        let (positions, indices) = patch();
        let old = generation(&positions, &indices, pack_color(200, 90, 80));

        // Same surface, vertices nudged beyond tolerance inside their nano sectors
        let moved: Vec<[f32; 3]> = positions.iter().map(|p| [p[0] + 0.012, p[1], p[2]]).collect();
        let new = generation(&moved, &indices, 0);

        let (mut record, mut stats, worklist) = run_pass_one(&old, &new);
        assert_eq!(stats.matched_triangles, 0);

        let prev = previous(&old);
        let left = match_nano_sector_colors(Some(&prev), &new.mesh, &new.layout, &mut record, worklist, &mut stats);
        assert!(stats.nano_colored > 0);
        for t in 0..indices.len() {
            if record.color_sources[t] == ColorSource::NanoSector {
                assert_eq!(record.inherited_colors[t], pack_color(200, 90, 80));
            }
        }

        let left = match_micro_sector_colors(Some(&prev), &new.mesh, &new.layout, &mut record, left, &mut stats);
        assert!(left.unmatched.len() as u32 == stats.uncolored);
        assert!(record.triangle_matches.iter().all(|&m| m == INVALID_INDEX));
    }

    #[test]
    fn test_micro_pass_covers_sparse_nano_sectors() {
        let old = generation(
            &[[0.26, 0.26, 0.26], [0.28, 0.26, 0.26], [0.26, 0.28, 0.26]],
            &[[0, 1, 2]],
            pack_color(50, 60, 70),
        );
        // Same micro sector, same octant, a different nano sector
        let new = generation(
            &[[0.33, 0.33, 0.26], [0.35, 0.33, 0.26], [0.33, 0.35, 0.26]],
            &[[0, 1, 2], [0, 2, 1]],
            0,
        );

        let (mut record, mut stats, worklist) = run_pass_one(&old, &new);
        let prev = previous(&old);
        let worklist = match_nano_sector_colors(Some(&prev), &new.mesh, &new.layout, &mut record, worklist, &mut stats);
        assert!(record.should_do_third_match);
        assert_eq!(worklist.unmatched.len(), 2);

        let left = match_micro_sector_colors(Some(&prev), &new.mesh, &new.layout, &mut record, worklist, &mut stats);
        assert!(left.unmatched.is_empty());
        assert_eq!(record.color_sources[0], ColorSource::SubMicroSector);
        assert_eq!(record.inherited_colors[1], pack_color(50, 60, 70));
    }

    #[test]
    fn test_no_previous_generation() {
        let (positions, indices) = patch();
        let new = generation(&positions, &indices, 0);
        let mut record = create_match_record(positions.len(), indices.len(), 0);
        let mut stats = MatchStats::default();
        let worklist = match_meshes(None, &new.mesh, &new.layout, TOLERANCE, &mut record, &mut stats);
        assert!(worklist.unmatched.is_empty());
        assert!(!record.did_match);
        assert!(record.triangle_matches.iter().all(|&m| m == INVALID_INDEX));
    }

    #[test]
    fn test_matching_is_injective_under_jitter() {
        let (positions, indices) = patch();
        let old = generation(&positions, &indices, 0);
        let mut doubled = positions.clone();
        doubled.extend(positions.iter().map(|p| [p[0] + TOLERANCE * 0.2, p[1], p[2]]));
        let mut doubled_indices = indices.clone();
        doubled_indices.extend(indices.iter().map(|t| t.map(|v| v + positions.len() as u32)));
        let new = generation(&doubled, &doubled_indices, 0);

        let (record, _, _) = run_pass_one(&old, &new);
        assert!(is_injective(&record.vertex_matches));
        assert!(is_injective(&record.triangle_matches));
    }

    #[test]
    fn test_nano_octant() {
        assert_eq!(nano_octant(0), 0);
        assert_eq!(nano_octant(4), 1);
        assert_eq!(nano_octant(4 * 8), 2);
        assert_eq!(nano_octant(4 * 64 + 7 + 7 * 8), 7);
    }
}
