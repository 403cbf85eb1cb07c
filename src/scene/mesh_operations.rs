//! Mesh Reducer Operations - Pure DOP Functions
//!
//! Merges the live anchors into one reduced mesh, decides when a new
//! reconstruction should start, and prepares per-sector IDs for culling.

use super::anchor_data::{Anchor, AnchorSet};
use super::error::{SceneError, SceneResult};
use super::mesh_data::{MeshUpdateThrottle, ReducedMesh, ReducerWorkspace, ReductionStats};
use super::sorter_data::{CullingSectorIds, SectorId, SectorIdBuffers, SectorIdWidth, SectorLayout};
use super::sorter_operations::{sector_id_width, triangle_small_sector, vertex_sector_path};
use crate::compute::{compact, count_scan, exclusive_scan, split_ranges, SyncPoint};
use crate::constants::scan::{REDUCTION_WIDTHS, VERTEX_GROUP_PADDING};
use crate::constants::sector::SECTOR_GROUP_SIZE;
use crate::memory::{
    assign_vec, combine_stats, create_growable_buffer, memory_stats, reset, round_up_to_multiple, BufferMemoryStats,
};
use bit_vec::BitVec;
use cgmath::{Matrix3, Matrix4, SquareMatrix, Vector3, Vector4};
use rayon::prelude::*;
use std::sync::Arc;

/// Create an empty reduced mesh
pub fn create_reduced_mesh(vertex_capacity: usize, triangle_capacity: usize) -> ReducedMesh {
    ReducedMesh {
        positions: create_growable_buffer("Reduced Positions", vertex_capacity),
        normals: create_growable_buffer("Reduced Normals", vertex_capacity),
        indices: create_growable_buffer("Reduced Indices", triangle_capacity),
        colors: create_growable_buffer("Reduced Colors", triangle_capacity),
        mesh_to_world: Matrix4::identity(),
        pre_filter_vertex_count: 0,
        pre_cull_vertex_count: 0,
        pre_cull_triangle_count: 0,
    }
}

/// Create reducer scratch buffers
pub fn create_reducer_workspace(vertex_capacity: usize) -> ReducerWorkspace {
    ReducerWorkspace {
        vertex_marks: create_growable_buffer("Vertex Marks", vertex_capacity),
        anchor_vertex_offsets: Vec::new(),
        anchor_triangle_offsets: Vec::new(),
    }
}

/// Create a throttle with the given intervals
pub fn create_mesh_update_throttle(min_frames_between_updates: u32, refresh_interval_frames: u32) -> MeshUpdateThrottle {
    MeshUpdateThrottle {
        min_frames_between_updates,
        refresh_interval_frames,
        ..Default::default()
    }
}

/// Reject anchors that would break the index invariant
pub fn validate_anchor(anchor: &Anchor) -> SceneResult<()> {
    if !anchor.normals.is_empty() && anchor.normals.len() != anchor.vertices.len() {
        return Err(SceneError::NormalCountMismatch {
            anchor: anchor.id,
            vertices: anchor.vertices.len(),
            normals: anchor.normals.len(),
        }
        .into());
    }

    if anchor.vertices.iter().flatten().any(|c| !c.is_finite()) {
        return Err(SceneError::NonFiniteVertex { anchor: anchor.id }.into());
    }

    let vertex_count = anchor.vertices.len();
    if let Some(&index) = anchor
        .indices
        .iter()
        .flatten()
        .find(|&&i| i as usize >= vertex_count)
    {
        return Err(SceneError::IndexOutOfRange {
            anchor: anchor.id,
            index,
            vertex_count,
        }
        .into());
    }

    Ok(())
}

/// Mesh frame of an anchor set: first anchor's rotation, translation removed
pub fn mesh_frame(anchors: &[Arc<Anchor>]) -> Matrix4<f32> {
    match anchors.first() {
        Some(anchor) => {
            let mut frame = anchor.transform;
            frame.w = Vector4::new(0.0, 0.0, 0.0, 1.0);
            frame
        }
        None => Matrix4::identity(),
    }
}

fn rotation_part(m: &Matrix4<f32>) -> Matrix3<f32> {
    Matrix3::from_cols(m.x.truncate(), m.y.truncate(), m.z.truncate())
}

fn transform_point(m: &Matrix4<f32>, p: [f32; 3]) -> [f32; 3] {
    let v = m * Vector4::new(p[0], p[1], p[2], 1.0);
    [v.x, v.y, v.z]
}

fn transform_normal(m: &Matrix3<f32>, n: [f32; 3]) -> [f32; 3] {
    let v = m * Vector3::new(n[0], n[1], n[2]);
    let length = (v.x * v.x + v.y * v.y + v.z * v.z).sqrt();
    if length > 0.0 {
        [v.x / length, v.y / length, v.z / length]
    } else {
        [0.0, 0.0, 0.0]
    }
}

/// Merge every valid anchor into `mesh`.
///
/// Vertices no triangle references are dropped. Indices are rebased onto
/// the merged vertex array; colours are reset to "no colour".
pub fn reduce_meshes(anchors: &AnchorSet, mesh: &mut ReducedMesh, workspace: &mut ReducerWorkspace) -> ReductionStats {
    let valid: Vec<Arc<Anchor>> = anchors
        .anchors
        .iter()
        .filter(|anchor| match validate_anchor(anchor) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[mesh_operations::reduce_meshes] Skipping anchor: {}", e);
                false
            }
        })
        .cloned()
        .collect();

    let mut stats = ReductionStats {
        anchors: valid.len(),
        rejected_anchors: anchors.anchors.len() - valid.len(),
        ..Default::default()
    };

    mesh.mesh_to_world = mesh_frame(&valid);
    let world_to_mesh = match mesh.mesh_to_world.invert() {
        Some(inverse) => inverse,
        None => {
            log::warn!("[mesh_operations::reduce_meshes] Anchor transform is singular, using identity frame");
            mesh.mesh_to_world = Matrix4::identity();
            Matrix4::identity()
        }
    };

    let vertex_counts: Vec<u32> = valid.iter().map(|a| a.vertices.len() as u32).collect();
    let triangle_counts: Vec<u32> = valid.iter().map(|a| a.indices.len() as u32).collect();
    let (vertex_offsets, submitted) = exclusive_scan(&vertex_counts);
    let (triangle_offsets, triangle_total) = exclusive_scan(&triangle_counts);
    stats.submitted_vertices = submitted;
    stats.triangles = triangle_total;
    mesh.pre_filter_vertex_count = submitted;

    // Mark referenced vertices, one task per anchor over its own range
    let padded = round_up_to_multiple(submitted as usize, VERTEX_GROUP_PADDING);
    reset(&mut workspace.vertex_marks, padded, 0);
    {
        let ranges = split_ranges(&mut workspace.vertex_marks, vertex_counts.iter().map(|&c| c as usize));
        ranges
            .into_par_iter()
            .zip(valid.par_iter())
            .for_each(|(marks, anchor)| {
                for &index in anchor.indices.iter().flatten() {
                    marks[index as usize] = 1;
                }
            });
    }

    let scan = count_scan(&workspace.vertex_marks, REDUCTION_WIDTHS, SyncPoint::ReferencedVertexCount);
    stats.referenced_vertices = scan.total;

    let to_mesh: Vec<Matrix4<f32>> = valid.iter().map(|a| world_to_mesh * a.transform).collect();
    let normal_to_mesh: Vec<Matrix3<f32>> = to_mesh.iter().map(rotation_part).collect();
    let anchor_of = |vertex: usize| -> usize {
        vertex_offsets.partition_point(|&offset| offset as usize <= vertex) - 1
    };

    let positions = compact(&workspace.vertex_marks, &scan, [0.0f32; 3], |v| {
        let a = anchor_of(v);
        let local = v - vertex_offsets[a] as usize;
        transform_point(&to_mesh[a], valid[a].vertices[local])
    });
    let normals = compact(&workspace.vertex_marks, &scan, [0.0f32; 3], |v| {
        let a = anchor_of(v);
        let local = v - vertex_offsets[a] as usize;
        match valid[a].normals.get(local) {
            Some(&n) => transform_normal(&normal_to_mesh[a], n),
            None => [0.0, 0.0, 0.0],
        }
    });

    let offsets = &scan.offsets;
    let indices: Vec<[u32; 3]> = valid
        .par_iter()
        .zip(vertex_offsets.par_iter())
        .flat_map_iter(|(anchor, &base)| {
            anchor.indices.iter().map(move |t| {
                [
                    offsets[(base + t[0]) as usize],
                    offsets[(base + t[1]) as usize],
                    offsets[(base + t[2]) as usize],
                ]
            })
        })
        .collect();
    debug_assert_eq!(indices.len() as u32, triangle_total);
    debug_assert!(triangle_offsets.len() == valid.len());

    assign_vec(&mut mesh.positions, positions);
    assign_vec(&mut mesh.normals, normals);
    assign_vec(&mut mesh.indices, indices);
    reset(&mut mesh.colors, triangle_total as usize, 0);
    mesh.pre_cull_vertex_count = scan.total;
    mesh.pre_cull_triangle_count = triangle_total;

    workspace.anchor_vertex_offsets = vertex_offsets;
    workspace.anchor_triangle_offsets = triangle_offsets;

    log::debug!(
        "[mesh_operations::reduce_meshes] {} anchors ({} rejected): {} -> {} vertices, {} triangles",
        stats.anchors,
        stats.rejected_anchors,
        stats.submitted_vertices,
        stats.referenced_vertices,
        stats.triangles
    );
    stats
}

/// True if the anchor set differs from the one last reconstructed
pub fn anchors_changed(throttle: &MeshUpdateThrottle, anchors: &AnchorSet) -> bool {
    if anchors.anchors.len() != throttle.anchor_revisions.len() {
        return true;
    }
    anchors
        .anchors
        .iter()
        .any(|a| throttle.anchor_revisions.get(&a.id) != Some(&a.revision))
}

/// Count a frame and decide whether to start a reconstruction.
///
/// Records the anchor revisions when it says yes.
pub fn should_update_mesh(throttle: &mut MeshUpdateThrottle, anchors: &AnchorSet) -> bool {
    throttle.frames_since_update = throttle.frames_since_update.saturating_add(1);

    let changed = throttle.force_next || anchors_changed(throttle, anchors);
    let elapsed = throttle.frames_since_update;
    let due = changed && elapsed >= throttle.min_frames_between_updates;
    let refresh = !anchors.anchors.is_empty() && elapsed >= throttle.refresh_interval_frames;

    if !(due || refresh) {
        return false;
    }

    throttle.anchor_revisions = anchors.anchors.iter().map(|a| (a.id, a.revision)).collect();
    throttle.frames_since_update = 0;
    throttle.force_next = false;
    true
}

/// Pool per-element IDs into groups of 8: uniform groups store their ID once
fn pool_groups<I: SectorId>(ids: &[I]) -> (Vec<I>, BitVec) {
    let pooled: Vec<(I, bool)> = ids
        .par_chunks(SECTOR_GROUP_SIZE)
        .map(|group| {
            let first = group[0];
            (first, group.iter().any(|&id| id != first))
        })
        .collect();

    let mut mixed = BitVec::from_elem(pooled.len(), false);
    for (i, &(_, is_mixed)) in pooled.iter().enumerate() {
        mixed.set(i, is_mixed);
    }
    (pooled.into_iter().map(|(id, _)| id).collect(), mixed)
}

/// Generic sector ID kernel, instantiated for u8 and u16
fn assign_sector_ids<I: SectorId>(mesh: &ReducedMesh, layout: &SectorLayout) -> SectorIdBuffers<I> {
    if layout.small_sectors.len() > I::MAX_SECTORS {
        log::warn!(
            "[mesh_operations::assign_sector_ids] {} small sectors exceed ID range {}, IDs saturate",
            layout.small_sectors.len(),
            I::MAX_SECTORS
        );
    }

    let vertex_ids: Vec<I> = (0..mesh.positions.len() as u32)
        .into_par_iter()
        .map(|v| I::from_index(vertex_sector_path(layout, v).0 as usize))
        .collect();
    let triangle_ids: Vec<I> = mesh
        .indices
        .par_iter()
        .map(|&t| I::from_index(triangle_small_sector(layout, t) as usize))
        .collect();

    let (vertex_group_ids, vertex_group_mixed) = pool_groups(&vertex_ids);
    let (triangle_group_ids, triangle_group_mixed) = pool_groups(&triangle_ids);

    SectorIdBuffers {
        vertex_ids,
        triangle_ids,
        vertex_group_ids,
        vertex_group_mixed,
        triangle_group_ids,
        triangle_group_mixed,
    }
}

/// Sector IDs for culling at an explicit width
pub fn prepare_optimized_culling_with_width(
    mesh: &ReducedMesh,
    layout: &SectorLayout,
    width: SectorIdWidth,
) -> CullingSectorIds {
    match width {
        SectorIdWidth::Narrow => CullingSectorIds::Narrow(assign_sector_ids::<u8>(mesh, layout)),
        SectorIdWidth::Wide => CullingSectorIds::Wide(assign_sector_ids::<u16>(mesh, layout)),
    }
}

/// Sector IDs for culling, width chosen from the small sector count
pub fn prepare_optimized_culling(mesh: &ReducedMesh, layout: &SectorLayout) -> CullingSectorIds {
    let width = sector_id_width(layout);
    log::debug!(
        "[mesh_operations::prepare_optimized_culling] {} small sectors, {:?} IDs",
        layout.small_sectors.len(),
        width
    );
    prepare_optimized_culling_with_width(mesh, layout, width)
}

/// Memory held by the mesh columns of one generation
pub fn mesh_memory_stats(mesh: &ReducedMesh) -> BufferMemoryStats {
    [
        memory_stats(&mesh.normals),
        memory_stats(&mesh.indices),
        memory_stats(&mesh.colors),
    ]
    .into_iter()
    .fold(memory_stats(&mesh.positions), combine_stats)
}
