//! Duplicate Remover Operations - Pure DOP Functions
//!
//! Overlapping anchors submit the same surface point more than once. Inside
//! every nano sector, vertices are hashed on a grid one tolerance wide and
//! merged into the lowest-indexed representative within tolerance. The
//! result does not depend on thread scheduling, and running it a second
//! time changes nothing.

use super::mesh_data::{ReducedMesh, VertexTriangleMap};
use super::sorter_data::SectorLayout;
use super::sorter_operations::condense_layout;
use crate::compute::{compact, count_scan, SyncPoint};
use crate::constants::scan::REDUCTION_WIDTHS;
use crate::memory::assign_vec;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// Counters for one duplicate removal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateRemovalStats {
    pub vertices_before: u32,
    pub vertices_after: u32,
    pub triangles_before: u32,
    pub triangles_after: u32,
    pub degenerate_triangles: u32,
    pub duplicate_triangles: u32,
}

impl std::fmt::Display for DuplicateRemovalStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vertices {} -> {}, triangles {} -> {} ({} degenerate, {} duplicate)",
            self.vertices_before,
            self.vertices_after,
            self.triangles_before,
            self.triangles_after,
            self.degenerate_triangles,
            self.duplicate_triangles
        )
    }
}

fn hash_cell(position: [f32; 3], tolerance: f32) -> [i64; 3] {
    [
        (position[0] / tolerance).floor() as i64,
        (position[1] / tolerance).floor() as i64,
        (position[2] / tolerance).floor() as i64,
    ]
}

fn distance_squared(a: [f32; 3], b: [f32; 3]) -> f32 {
    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
}

/// Merges inside one vertex range: (merged vertex, representative) pairs
fn find_duplicates_in_range(positions: &[[f32; 3]], start: u32, end: u32, tolerance: f32) -> Vec<(u32, u32)> {
    let mut cells: FxHashMap<[i64; 3], Vec<u32>> = FxHashMap::default();
    let mut merges = Vec::new();
    let tolerance_squared = tolerance * tolerance;

    for vertex in start..end {
        let p = positions[vertex as usize];
        let cell = hash_cell(p, tolerance);

        let mut representative: Option<u32> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let neighbor = [cell[0] + dx, cell[1] + dy, cell[2] + dz];
                    if let Some(candidates) = cells.get(&neighbor) {
                        for &candidate in candidates {
                            if distance_squared(p, positions[candidate as usize]) <= tolerance_squared {
                                representative = Some(representative.map_or(candidate, |r| r.min(candidate)));
                            }
                        }
                    }
                }
            }
        }

        match representative {
            Some(r) => merges.push((vertex, r)),
            None => cells.entry(cell).or_default().push(vertex),
        }
    }

    merges
}

/// Representative of every vertex (itself when kept)
pub fn find_duplicate_vertices(positions: &[[f32; 3]], layout: &SectorLayout, tolerance: f32) -> Vec<u32> {
    let merges: Vec<Vec<(u32, u32)>> = layout
        .nano_sectors
        .par_iter()
        .map(|nano| {
            find_duplicates_in_range(
                positions,
                nano.vertex_offset,
                nano.vertex_offset + nano.vertex_count,
                tolerance,
            )
        })
        .collect();

    let mut representatives: Vec<u32> = (0..positions.len() as u32).collect();
    for (vertex, representative) in merges.into_iter().flatten() {
        representatives[vertex as usize] = representative;
    }
    representatives
}

/// Merge near-duplicate vertices, then drop triangles that became
/// degenerate or duplicate. Sector ranges are condensed to match.
pub fn remove_duplicate_vertices(
    mesh: &mut ReducedMesh,
    layout: &mut SectorLayout,
    tolerance: f32,
) -> DuplicateRemovalStats {
    let mut stats = DuplicateRemovalStats {
        vertices_before: mesh.positions.len() as u32,
        triangles_before: mesh.indices.len() as u32,
        ..Default::default()
    };
    if mesh.positions.is_empty() {
        return stats;
    }

    let representatives = find_duplicate_vertices(&mesh.positions, layout, tolerance);
    let vertex_keep: Vec<u32> = representatives
        .par_iter()
        .enumerate()
        .map(|(v, &r)| u32::from(r as usize == v))
        .collect();
    let vertex_scan = count_scan(&vertex_keep, REDUCTION_WIDTHS, SyncPoint::DeduplicatedVertexCount);
    let remap = |v: u32| vertex_scan.offsets[representatives[v as usize] as usize];

    // Remap triangles and flag the ones to drop
    let remapped: Vec<[u32; 3]> = mesh
        .indices
        .par_iter()
        .map(|t| [remap(t[0]), remap(t[1]), remap(t[2])])
        .collect();
    let degenerate: Vec<bool> = remapped
        .par_iter()
        .map(|t| t[0] == t[1] || t[1] == t[2] || t[0] == t[2])
        .collect();

    let mut keyed: Vec<([u32; 3], u32)> = remapped
        .par_iter()
        .enumerate()
        .filter(|(t, _)| !degenerate[*t])
        .map(|(t, tri)| {
            let mut key = *tri;
            key.sort_unstable();
            (key, t as u32)
        })
        .collect();
    keyed.par_sort_unstable();

    let mut triangle_keep: Vec<u32> = degenerate.iter().map(|&d| u32::from(!d)).collect();
    for pair in keyed.windows(2) {
        if pair[0].0 == pair[1].0 {
            triangle_keep[pair[1].1 as usize] = 0;
            stats.duplicate_triangles += 1;
        }
    }
    stats.degenerate_triangles = degenerate.iter().filter(|&&d| d).count() as u32;

    let triangle_scan = count_scan(&triangle_keep, REDUCTION_WIDTHS, SyncPoint::DeduplicatedTriangleCount);

    // Condense
    let indices = compact(&triangle_keep, &triangle_scan, [0u32; 3], |t| remapped[t]);
    let colors = compact(&triangle_keep, &triangle_scan, 0u32, |t| mesh.colors[t]);
    let positions = compact(&vertex_keep, &vertex_scan, [0.0f32; 3], |v| mesh.positions[v]);
    let normals = compact(&vertex_keep, &vertex_scan, [0.0f32; 3], |v| mesh.normals[v]);

    assign_vec(&mut mesh.indices, indices);
    assign_vec(&mut mesh.colors, colors);
    assign_vec(&mut mesh.positions, positions);
    assign_vec(&mut mesh.normals, normals);
    condense_layout(layout, &vertex_scan.offsets, vertex_scan.total);

    mesh.pre_cull_vertex_count = vertex_scan.total;
    mesh.pre_cull_triangle_count = triangle_scan.total;
    stats.vertices_after = vertex_scan.total;
    stats.triangles_after = triangle_scan.total;

    log::debug!("[dedup_operations::remove_duplicate_vertices] {}", stats);
    stats
}

/// Vertex → triangles adjacency of a condensed mesh
pub fn build_vertex_map(indices: &[[u32; 3]], vertex_count: usize) -> VertexTriangleMap {
    let mut counts = vec![0u32; vertex_count];
    for t in indices {
        for &v in t {
            counts[v as usize] += 1;
        }
    }

    let scan = count_scan(&counts, REDUCTION_WIDTHS, SyncPoint::VertexMapEntryCount);
    let mut cursor = scan.offsets.clone();
    let mut triangles = vec![0u32; scan.total as usize];
    for (t, tri) in indices.iter().enumerate() {
        for &v in tri {
            triangles[cursor[v as usize] as usize] = t as u32;
            cursor[v as usize] += 1;
        }
    }

    let mut offsets = scan.offsets;
    offsets.push(scan.total);
    VertexTriangleMap { offsets, triangles }
}

/// Triangles touching a vertex
pub fn triangles_of_vertex(map: &VertexTriangleMap, vertex: u32) -> &[u32] {
    let v = vertex as usize;
    match (map.offsets.get(v), map.offsets.get(v + 1)) {
        (Some(&start), Some(&end)) => &map.triangles[start as usize..end as usize],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::anchor_data::{Anchor, AnchorSet};
    use crate::scene::mesh_operations::{create_reduced_mesh, create_reducer_workspace, reduce_meshes};
    use crate::scene::sorter_operations::{do_scene_sort, small_sector_coords};
    use crate::memory::assign;
    use cgmath::{Matrix4, SquareMatrix};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    const TOLERANCE: f32 = 2.4 / 256.0;

    fn sorted_mesh(positions: &[[f32; 3]], indices: &[[u32; 3]]) -> (ReducedMesh, SectorLayout) {
        let mut mesh = create_reduced_mesh(16, 16);
        assign(&mut mesh.positions, positions);
        assign(&mut mesh.normals, &vec![[0.0, 0.0, 1.0]; positions.len()]);
        assign(&mut mesh.indices, indices);
        assign(&mut mesh.colors, &vec![0u32; indices.len()]);
        let mut layout = SectorLayout::default();
        do_scene_sort(&mut mesh, &mut layout);
        (mesh, layout)
    }

    fn grid(count: usize, z: f32) -> Vec<[f32; 3]> {
        (0..count)
            .map(|i| [0.1 + 0.15 * (i % 10) as f32, 0.1 + 0.15 * (i / 10) as f32, z])
            .collect()
    }

    fn strip(count: u32) -> Vec<[u32; 3]> {
        (0..count - 2).map(|i| [i, i + 1, i + 2]).collect()
    }

    #[test]
    fn test_two_overlapping_anchors_share_ten_vertices() {
        let first = grid(100, 0.5);
        let mut second = grid(70, 1.0);
        second.splice(0..0, first[..10].iter().copied());
        assert_eq!(second.len(), 80);

        let anchors = AnchorSet {
            anchors: vec![
                Arc::new(Anchor {
                    id: 1,
                    revision: 0,
                    normals: vec![[0.0, 0.0, 1.0]; 100],
                    vertices: first,
                    indices: strip(100),
                    transform: Matrix4::identity(),
                }),
                Arc::new(Anchor {
                    id: 2,
                    revision: 0,
                    normals: vec![[0.0, 0.0, 1.0]; 80],
                    vertices: second,
                    indices: strip(80),
                    transform: Matrix4::identity(),
                }),
            ],
        };

        let mut mesh = create_reduced_mesh(16, 16);
        let mut workspace = create_reducer_workspace(16);
        reduce_meshes(&anchors, &mut mesh, &mut workspace);
        assert_eq!(mesh.positions.len(), 180);

        let mut layout = SectorLayout::default();
        do_scene_sort(&mut mesh, &mut layout);
        assert_eq!(layout.small_sectors.len(), 1);

        let stats = remove_duplicate_vertices(&mut mesh, &mut layout, TOLERANCE);
        assert_eq!(stats.vertices_after, 170);
        assert_eq!(mesh.positions.len(), 170);
        assert_eq!(layout.small_sectors[0].vertex_count, 170);
        assert!(mesh.indices.iter().flatten().all(|&i| i < 170));
        assert_eq!(mesh.indices.len(), mesh.colors.len());
        assert_eq!(small_sector_coords(mesh.positions[0]), layout.small_sectors[0].coords);
    }

    #[test]
    fn test_duplicate_removal_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut positions: Vec<[f32; 3]> = (0..400)
            .map(|_| [rng.gen_range(-3.0..3.0), rng.gen_range(0.0..2.0), rng.gen_range(-1.0..1.0)])
            .collect();
        for i in 0..150 {
            let p = positions[i * 2];
            let jitter = TOLERANCE * 0.3;
            positions.push([p[0] + jitter, p[1] - jitter, p[2]]);
        }
        let indices: Vec<[u32; 3]> = (0..positions.len() as u32 - 2).map(|i| [i, i + 1, i + 2]).collect();

        let (mut mesh, mut layout) = sorted_mesh(&positions, &indices);
        let first = remove_duplicate_vertices(&mut mesh, &mut layout, TOLERANCE);
        assert!(first.vertices_after < first.vertices_before);

        let positions_after_first = mesh.positions.to_vec();
        let indices_after_first = mesh.indices.to_vec();
        let second = remove_duplicate_vertices(&mut mesh, &mut layout, TOLERANCE);

        assert_eq!(second.vertices_before, second.vertices_after);
        assert_eq!(second.triangles_before, second.triangles_after);
        assert_eq!(&mesh.positions[..], &positions_after_first[..]);
        assert_eq!(&mesh.indices[..], &indices_after_first[..]);
    }

    #[test]
    fn test_merge_respects_tolerance() {
        let positions = [
            [0.5, 0.5, 0.5],
            [0.5 + TOLERANCE * 0.5, 0.5, 0.5],
            [0.5 + TOLERANCE * 2.5, 0.5, 0.5],
            [0.6, 0.6, 0.5],
        ];
        let (mut mesh, mut layout) = sorted_mesh(&positions, &[[0, 2, 3], [1, 2, 3]]);
        let stats = remove_duplicate_vertices(&mut mesh, &mut layout, TOLERANCE);

        assert_eq!(stats.vertices_after, 3);
        assert_eq!(stats.duplicate_triangles, 1);
        assert_eq!(stats.triangles_after, 1);
    }

    #[test]
    fn test_degenerate_triangles_are_dropped() {
        let positions = [[0.5, 0.5, 0.5], [0.5, 0.5, 0.5], [0.7, 0.5, 0.5], [0.5, 0.7, 0.5]];
        let (mut mesh, mut layout) = sorted_mesh(&positions, &[[0, 1, 2], [0, 2, 3]]);
        let stats = remove_duplicate_vertices(&mut mesh, &mut layout, TOLERANCE);

        assert_eq!(stats.degenerate_triangles, 1);
        assert_eq!(mesh.indices.len(), 1);
        assert_eq!(layout.vertex_nano_sector.len(), 3);
    }

    #[test]
    fn test_vertex_map() {
        let indices = [[0, 1, 2], [2, 1, 3]];
        let map = build_vertex_map(&indices, 4);
        assert_eq!(triangles_of_vertex(&map, 0), &[0]);
        assert_eq!(triangles_of_vertex(&map, 1), &[0, 1]);
        assert_eq!(triangles_of_vertex(&map, 3), &[1]);
        assert!(triangles_of_vertex(&map, 9).is_empty());
    }
}
