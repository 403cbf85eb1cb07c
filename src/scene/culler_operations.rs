//! Culler Operations - Pure DOP Functions
//!
//! Per-frame frustum and orientation culling of the stable generation.
//! Sector visibility is decided once per small sector; per-element kernels
//! only look up their sector's decision and the results are stream-compacted
//! into the render and occlusion lanes.

use super::culler_data::{
    CullOutput, CullStats, CulledGeometry, DispatchCommand, DrawCommand, DrawIndexedCommand, SectorInclusion, ViewSet,
};
use super::dedup_operations::triangles_of_vertex;
use super::mesh_data::{ReducedMesh, VertexTriangleMap};
use super::sorter_data::{CullingSectorIds, SectorId, SectorIdBuffers, SectorLayout};
use crate::compute::{compact, count_scan_marks, SyncPoint};
use crate::constants::scan::CULL_WIDTHS;
use crate::constants::sector::{SECTOR_GROUP_SIZE, SMALL_SECTOR_SIZE};
use crate::math::{aabb_from_center_half_extents, aabb_outside_frustum, project_point, ViewFrustum};
use bit_vec::BitVec;
use cgmath::{Matrix4, Point3, SquareMatrix, Vector3};
use rayon::prelude::*;

/// Bring a world-space view into the mesh frame
pub fn frustum_in_mesh_space(view: &ViewFrustum, mesh_to_world: &Matrix4<f32>) -> ViewFrustum {
    let world_to_mesh = mesh_to_world.invert().unwrap_or_else(Matrix4::identity);
    let position = Point3::from_homogeneous(world_to_mesh * view.position.to_homogeneous());
    ViewFrustum::from_matrices(view.view_proj * mesh_to_world, position)
}

/// Render and occlusion decision for every small sector
pub fn compute_sector_inclusion(layout: &SectorLayout, views: &[ViewFrustum], camera: &ViewFrustum) -> SectorInclusion {
    let half = SMALL_SECTOR_SIZE / 2.0;
    let (render, occlusion) = layout
        .small_sectors
        .par_iter()
        .map(|sector| {
            let aabb = aabb_from_center_half_extents(Point3::from(sector.center), Vector3::new(half, half, half));
            let render = views.iter().any(|view| !aabb_outside_frustum(view, &aabb));
            let occlusion = !aabb_outside_frustum(camera, &aabb);
            (render, occlusion)
        })
        .unzip();

    SectorInclusion { render, occlusion }
}

/// Sector of an element, read from its pooled group unless the group is mixed
fn pooled_sector<I: SectorId>(ids: &[I], group_ids: &[I], mixed: &BitVec, element: usize) -> usize {
    let group = element / SECTOR_GROUP_SIZE;
    if mixed.get(group).unwrap_or(true) {
        ids[element].index()
    } else {
        group_ids[group].index()
    }
}

fn is_front_facing(mesh: &ReducedMesh, triangle: [u32; 3], eye: Point3<f32>) -> bool {
    let a = Vector3::from(mesh.positions[triangle[0] as usize]);
    let b = Vector3::from(mesh.positions[triangle[1] as usize]);
    let c = Vector3::from(mesh.positions[triangle[2] as usize]);
    let normal = (b - a).cross(c - a);
    let to_eye = Vector3::new(eye.x, eye.y, eye.z) - a;
    normal.x * to_eye.x + normal.y * to_eye.y + normal.z * to_eye.z > 0.0
}

/// Triangle marks of both lanes, instantiated per ID width
fn mark_triangles<I: SectorId>(
    ids: &SectorIdBuffers<I>,
    mesh: &ReducedMesh,
    inclusion: &SectorInclusion,
    eye: Point3<f32>,
) -> (Vec<bool>, Vec<bool>) {
    mesh.indices
        .par_iter()
        .enumerate()
        .map(|(t, &triangle)| {
            let sector = pooled_sector(&ids.triangle_ids, &ids.triangle_group_ids, &ids.triangle_group_mixed, t);
            let render = inclusion.render[sector];
            let occlusion = inclusion.occlusion[sector] && is_front_facing(mesh, triangle, eye);
            (render, occlusion)
        })
        .unzip()
}

fn count_visible_sector_vertices<I: SectorId>(ids: &SectorIdBuffers<I>, inclusion: &SectorInclusion) -> u32 {
    (0..ids.vertex_ids.len())
        .into_par_iter()
        .filter(|&v| {
            let sector = pooled_sector(&ids.vertex_ids, &ids.vertex_group_ids, &ids.vertex_group_mixed, v);
            inclusion.render[sector]
        })
        .count() as u32
}

/// A vertex belongs to a lane when any included triangle references it
fn mark_referenced_vertices(map: &VertexTriangleMap, triangle_marks: &[bool], vertex_count: usize) -> Vec<bool> {
    (0..vertex_count as u32)
        .into_par_iter()
        .map(|v| {
            triangles_of_vertex(map, v)
                .iter()
                .any(|&t| triangle_marks[t as usize])
        })
        .collect()
}

fn compact_lane(
    mesh: &ReducedMesh,
    vertex_marks: &[bool],
    triangle_marks: &[bool],
    vertex_point: SyncPoint,
    triangle_point: SyncPoint,
) -> CulledGeometry {
    let (vertex_counts, vertex_scan) = count_scan_marks(vertex_marks, CULL_WIDTHS, vertex_point);
    let positions = compact(&vertex_counts, &vertex_scan, [0.0; 3], |v| mesh.positions[v]);
    let normals = compact(&vertex_counts, &vertex_scan, [0.0; 3], |v| mesh.normals[v]);

    let (triangle_counts, triangle_scan) = count_scan_marks(triangle_marks, CULL_WIDTHS, triangle_point);
    let remap = &vertex_scan.offsets;
    let indices = compact(&triangle_counts, &triangle_scan, [0; 3], |t| {
        let [a, b, c] = mesh.indices[t];
        [remap[a as usize], remap[b as usize], remap[c as usize]]
    });
    let triangle_ids = compact(&triangle_counts, &triangle_scan, 0, |t| t as u32);

    CulledGeometry {
        positions,
        normals,
        indices,
        triangle_ids,
    }
}

/// Normalized camera image coordinates of a mesh-space point.
///
/// Points behind the camera map to (-1, -1).
pub fn camera_coordinate(view_proj: &Matrix4<f32>, point: [f32; 3]) -> [f32; 2] {
    let clip = project_point(view_proj, point);
    if clip.w <= f32::EPSILON {
        return [-1.0, -1.0];
    }
    [clip.x / clip.w * 0.5 + 0.5, 0.5 - clip.y / clip.w * 0.5]
}

/// Cull the stable generation against this frame's views.
///
/// An empty generation produces empty lanes and zeroed draw arguments.
pub fn cull_scene(
    mesh: &ReducedMesh,
    layout: &SectorLayout,
    sector_ids: &CullingSectorIds,
    vertex_map: &VertexTriangleMap,
    views: &ViewSet,
) -> CullOutput {
    if mesh.indices.is_empty() || layout.small_sectors.is_empty() {
        return CullOutput::default();
    }

    let mesh_views: Vec<ViewFrustum> = views
        .views
        .iter()
        .map(|view| frustum_in_mesh_space(view, &mesh.mesh_to_world))
        .collect();
    let camera = frustum_in_mesh_space(&views.camera, &mesh.mesh_to_world);
    let inclusion = compute_sector_inclusion(layout, &mesh_views, &camera);

    let ((render_triangles, occlusion_triangles), visible_sector_vertices) = match sector_ids {
        CullingSectorIds::Narrow(ids) => (
            mark_triangles(ids, mesh, &inclusion, camera.position),
            count_visible_sector_vertices(ids, &inclusion),
        ),
        CullingSectorIds::Wide(ids) => (
            mark_triangles(ids, mesh, &inclusion, camera.position),
            count_visible_sector_vertices(ids, &inclusion),
        ),
    };

    let vertex_count = mesh.positions.len();
    let render_vertices = mark_referenced_vertices(vertex_map, &render_triangles, vertex_count);
    let occlusion_vertices = mark_referenced_vertices(vertex_map, &occlusion_triangles, vertex_count);

    let render = compact_lane(
        mesh,
        &render_vertices,
        &render_triangles,
        SyncPoint::RenderVertexCount,
        SyncPoint::RenderTriangleCount,
    );
    let occlusion = compact_lane(
        mesh,
        &occlusion_vertices,
        &occlusion_triangles,
        SyncPoint::OcclusionVertexCount,
        SyncPoint::OcclusionTriangleCount,
    );
    let camera_coordinates = render
        .positions
        .par_iter()
        .map(|&p| camera_coordinate(&camera.view_proj, p))
        .collect();

    let stats = CullStats {
        visible_sectors: inclusion.render.iter().filter(|&&r| r).count() as u32,
        occlusion_sectors: inclusion.occlusion.iter().filter(|&&o| o).count() as u32,
        visible_sector_vertices,
        render_vertices: render.positions.len() as u32,
        render_triangles: render.indices.len() as u32,
        occlusion_vertices: occlusion.positions.len() as u32,
        occlusion_triangles: occlusion.indices.len() as u32,
    };
    log::debug!("[culler_operations::cull_scene] {}", stats);

    CullOutput {
        render_draw: DrawIndexedCommand {
            index_count: stats.render_triangles * 3,
            instance_count: 1,
            ..Default::default()
        },
        occlusion_draw: DrawCommand {
            vertex_count: stats.occlusion_triangles * 3,
            instance_count: 1,
            ..Default::default()
        },
        color_dispatch: DispatchCommand {
            x: stats.occlusion_triangles,
            y: 1,
            z: 1,
        },
        render,
        camera_coordinates,
        occlusion,
        stats,
    }
}
