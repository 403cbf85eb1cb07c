//! Occlusion Tester Operations - Pure DOP Functions
//!
//! Rasterizes the occlusion lane into a coarse triangle-ID grid as seen by
//! the capture camera, then samples camera images into the atlas slots of
//! triangles that are visible in that grid.

use super::atlas_data::{AtlasAssignment, AtlasStorage};
use super::atlas_operations::{planes_for_mut, read_texel, write_texel};
use super::color::{accumulate_color, average_color, blend_channel, pack_color, ColorSum};
use super::culler_data::CulledGeometry;
use super::mesh_data::ReducedMesh;
use super::occlusion_data::{CameraFrame, ColorState, ColorUpdateStats, OcclusionGrid, OcclusionStats, ThermalState};
use super::texel_data::TexelLayout;
use super::texel_operations::{texel_barycentric, texel_coordinates, texel_position, triangle_corners};
use crate::constants::occlusion::{GRID_HEIGHT, GRID_WIDTH};
use crate::constants::thermal::{
    CRITICAL_SAMPLING_RATE, FAIR_SAMPLING_RATE, NOMINAL_SAMPLING_RATE, SERIOUS_SAMPLING_RATE,
};
use crate::constants::INVALID_INDEX;
use crate::math::project_point;
use cgmath::Matrix4;
use image::GrayImage;
use rayon::prelude::*;
use std::sync::Arc;

pub fn create_occlusion_grid() -> OcclusionGrid {
    let cells = (GRID_WIDTH * GRID_HEIGHT) as usize;
    OcclusionGrid {
        width: GRID_WIDTH,
        height: GRID_HEIGHT,
        triangle_ids: vec![INVALID_INDEX; cells],
        depth: vec![f32::INFINITY; cells],
    }
}

pub fn clear_occlusion_grid(grid: &mut OcclusionGrid) {
    grid.triangle_ids.fill(INVALID_INDEX);
    grid.depth.fill(f32::INFINITY);
}

/// Frames between colour updates for a thermal state
pub fn sampling_rate(state: ThermalState) -> u32 {
    match state {
        ThermalState::Nominal => NOMINAL_SAMPLING_RATE,
        ThermalState::Fair => FAIR_SAMPLING_RATE,
        ThermalState::Serious => SERIOUS_SAMPLING_RATE,
        ThermalState::Critical => CRITICAL_SAMPLING_RATE,
    }
}

pub fn should_sample_colors(colors: &ColorState) -> bool {
    colors.sample_counter >= sampling_rate(colors.thermal_state)
}

/// Normalized device coordinates, None behind the camera
fn project_to_ndc(view_proj: &Matrix4<f32>, point: [f32; 3]) -> Option<[f32; 3]> {
    let clip = project_point(view_proj, point);
    if clip.w <= f32::EPSILON {
        return None;
    }
    Some([clip.x / clip.w, clip.y / clip.w, clip.z / clip.w])
}

/// Grid cell under a normalized device position
fn grid_cell(grid: &OcclusionGrid, ndc: [f32; 3]) -> Option<usize> {
    let x = (ndc[0] * 0.5 + 0.5) * grid.width as f32;
    let y = (0.5 - ndc[1] * 0.5) * grid.height as f32;
    if x < 0.0 || y < 0.0 || x >= grid.width as f32 || y >= grid.height as f32 {
        return None;
    }
    Some(y as usize * grid.width as usize + x as usize)
}

fn edge(a: [f32; 3], b: [f32; 3], x: f32, y: f32) -> f32 {
    (b[0] - a[0]) * (y - a[1]) - (b[1] - a[1]) * (x - a[0])
}

/// Rasterize the occlusion lane into `grid`, then clear cells covered by
/// the segmentation mask.
///
/// Counter-clockwise triangles face the camera. Triangles with a corner
/// behind the camera are skipped.
pub fn do_occlusion_test(
    grid: &mut OcclusionGrid,
    occlusion: &CulledGeometry,
    view_proj: &Matrix4<f32>,
    segmentation: Option<&GrayImage>,
) -> OcclusionStats {
    clear_occlusion_grid(grid);
    let (width, height) = (grid.width as f32, grid.height as f32);

    // Corners in grid pixels (y down) plus device depth
    let projected: Vec<Option<(u32, [[f32; 3]; 3], bool)>> = occlusion
        .indices
        .par_iter()
        .zip(occlusion.triangle_ids.par_iter())
        .map(|(&triangle, &id)| {
            let mut corners = [[0.0f32; 3]; 3];
            for (corner, &v) in corners.iter_mut().zip(triangle.iter()) {
                let ndc = project_to_ndc(view_proj, occlusion.positions[v as usize])?;
                *corner = [(ndc[0] * 0.5 + 0.5) * width, (0.5 - ndc[1] * 0.5) * height, ndc[2]];
            }
            // y is flipped, so front faces wind clockwise here
            let front = edge(corners[0], corners[1], corners[2][0], corners[2][1]) < 0.0;
            Some((id, corners, front))
        })
        .collect();

    let mut stats = OcclusionStats::default();
    let triangles: Vec<(u32, [[f32; 3]; 3])> = projected
        .into_iter()
        .flatten()
        .filter_map(|(id, corners, front)| {
            if front {
                Some((id, corners))
            } else {
                stats.back_facing_triangles += 1;
                None
            }
        })
        .collect();
    stats.rasterized_triangles = triangles.len() as u32;

    let row_width = grid.width as usize;
    grid.triangle_ids
        .par_chunks_mut(row_width)
        .zip(grid.depth.par_chunks_mut(row_width))
        .enumerate()
        .for_each(|(y, (ids, depths))| {
            let py = y as f32 + 0.5;
            for (id, [a, b, c]) in &triangles {
                let min_y = a[1].min(b[1]).min(c[1]);
                let max_y = a[1].max(b[1]).max(c[1]);
                if py < min_y || py > max_y {
                    continue;
                }
                let area = edge(*a, *b, c[0], c[1]);
                if area.abs() <= f32::EPSILON {
                    continue;
                }
                let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as usize;
                let max_x = (a[0].max(b[0]).max(c[0]).ceil().max(0.0) as usize).min(row_width);

                for x in min_x..max_x {
                    let px = x as f32 + 0.5;
                    let w0 = edge(*b, *c, px, py) / area;
                    let w1 = edge(*c, *a, px, py) / area;
                    let w2 = edge(*a, *b, px, py) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }
                    let depth = w0 * a[2] + w1 * b[2] + w2 * c[2];
                    if depth < depths[x] {
                        depths[x] = depth;
                        ids[x] = *id;
                    }
                }
            }
        });

    if let Some(mask) = segmentation {
        stats.masked_cells = apply_segmentation_mask(grid, mask);
    }
    stats.covered_cells = grid.triangle_ids.par_iter().filter(|&&id| id != INVALID_INDEX).count() as u32;

    log::trace!(
        "[occlusion_operations::do_occlusion_test] {} triangles ({} back facing), {} cells covered, {} masked",
        stats.rasterized_triangles,
        stats.back_facing_triangles,
        stats.covered_cells,
        stats.masked_cells
    );
    stats
}

/// Clear grid cells behind dynamic occluders. Returns the cleared count.
fn apply_segmentation_mask(grid: &mut OcclusionGrid, mask: &GrayImage) -> u32 {
    let (width, height) = (grid.width, grid.height);
    let (mask_width, mask_height) = mask.dimensions();
    if mask_width == 0 || mask_height == 0 {
        return 0;
    }

    grid.triangle_ids
        .par_iter_mut()
        .zip(grid.depth.par_iter_mut())
        .enumerate()
        .map(|(cell, (id, depth))| {
            let x = (cell as u32 % width) * mask_width / width;
            let y = (cell as u32 / width) * mask_height / height;
            if *id != INVALID_INDEX && mask.get_pixel(x, y).0[0] != 0 {
                *id = INVALID_INDEX;
                *depth = f32::INFINITY;
                1
            } else {
                0
            }
        })
        .sum()
}

/// Luma and chroma of the camera image at normalized device coordinates
fn sample_frame(frame: &CameraFrame, ndc: [f32; 3]) -> (u8, [u8; 2]) {
    let u = (ndc[0] * 0.5 + 0.5).clamp(0.0, 1.0);
    let v = (0.5 - ndc[1] * 0.5).clamp(0.0, 1.0);
    let pixel = |extent: u32, t: f32| ((t * extent as f32) as u32).min(extent.saturating_sub(1));

    let (lw, lh) = frame.luma.dimensions();
    let (cw, ch) = frame.chroma.dimensions();
    let luma = frame.luma.get_pixel(pixel(lw, u), pixel(lh, v)).0[0];
    let chroma = frame.chroma.get_pixel(pixel(cw, u), pixel(ch, v)).0;
    (luma, chroma)
}

/// Blend the camera frame into the atlas slots of visible occlusion
/// triangles and refresh their average colours.
#[allow(clippy::too_many_arguments)]
pub fn update_colors(
    grid: &OcclusionGrid,
    occlusion: &CulledGeometry,
    mesh: &ReducedMesh,
    texels: &TexelLayout,
    atlas: &AtlasAssignment,
    storage: &mut AtlasStorage,
    colors: &mut ColorState,
    frame: &CameraFrame,
    blend_weight: f32,
) -> ColorUpdateStats {
    let view_proj = frame.view_proj * mesh.mesh_to_world;
    let alpha = blend_weight.clamp(0.0, 1.0);

    // Sampling runs in parallel; writes are applied afterwards
    let samples: Vec<(u32, Vec<(u32, u32, u8, [u8; 2])>, u32)> = occlusion
        .triangle_ids
        .par_iter()
        .map(|&t| {
            let side = texels.sides[t as usize];
            let corners = triangle_corners(mesh, t as usize);
            let mut visible = Vec::new();
            let mut occluded = 0;

            for (column, row) in texel_coordinates(side) {
                let position = texel_position(corners, texel_barycentric(side, column, row));
                let cell = project_to_ndc(&view_proj, position).and_then(|ndc| Some((ndc, grid_cell(grid, ndc)?)));
                match cell {
                    Some((ndc, cell)) if grid.triangle_ids[cell] == t => {
                        let (luma, chroma) = sample_frame(frame, ndc);
                        visible.push((column, row, luma, chroma));
                    }
                    _ => occluded += 1,
                }
            }
            (t, visible, occluded)
        })
        .collect();

    let mut stats = ColorUpdateStats::default();
    let triangle_colors = Arc::make_mut(&mut colors.triangle_colors);

    for (t, visible, occluded) in samples {
        stats.texels_occluded += occluded;
        if visible.is_empty() {
            continue;
        }

        let slot = atlas.slot_ids[t as usize];
        let planes = planes_for_mut(storage, atlas.size_classes[t as usize]);
        let mut sum = ColorSum::default();
        for (column, row, luma, chroma) in visible {
            let (current_luma, current_chroma) = read_texel(planes, slot, column, row);
            let blended_luma = blend_channel(current_luma, luma, alpha);
            let blended_chroma = [
                blend_channel(current_chroma[0], chroma[0], alpha),
                blend_channel(current_chroma[1], chroma[1], alpha),
            ];
            write_texel(planes, slot, column, row, blended_luma, blended_chroma);
            accumulate_color(&mut sum, pack_color(blended_luma, blended_chroma[0], blended_chroma[1]));
            stats.texels_sampled += 1;
        }

        if let (Some(color), Some(entry)) = (average_color(&sum), triangle_colors.get_mut(t as usize)) {
            *entry = color;
            stats.triangles_updated += 1;
        }
    }

    log::debug!(
        "[occlusion_operations::update_colors] {} triangles, {} texels sampled, {} occluded",
        stats.triangles_updated,
        stats.texels_sampled,
        stats.texels_occluded
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::assign;
    use crate::scene::atlas_data::ChromaImage;
    use crate::scene::atlas_operations::{
        classify_triangle_sizes, create_atlas_storage, ensure_atlas_capacity, planes_for,
    };
    use crate::scene::matcher_operations::create_match_record;
    use crate::scene::mesh_operations::create_reduced_mesh;
    use crate::scene::texel_operations::{rasterize_texels, texel_count};
    use cgmath::{perspective, Deg, Point3, Vector3};
    use image::{Luma, LumaA};

    fn camera() -> Matrix4<f32> {
        let proj = perspective(Deg(90.0), GRID_WIDTH as f32 / GRID_HEIGHT as f32, 0.1, 100.0);
        let view = Matrix4::look_at_rh(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, -1.0), Vector3::unit_y());
        proj * view
    }

    /// Facing the camera when `front`, centered on the view axis at depth `z`
    fn facing(z: f32, front: bool) -> [[f32; 3]; 3] {
        let a = [-1.0, -1.0, z];
        let b = [1.0, -1.0, z];
        let c = [0.0, 1.0, z];
        if front {
            [a, b, c]
        } else {
            [a, c, b]
        }
    }

    fn lane(triangles: &[[[f32; 3]; 3]], ids: &[u32]) -> CulledGeometry {
        let positions: Vec<[f32; 3]> = triangles.iter().flatten().copied().collect();
        let indices = (0..triangles.len() as u32).map(|t| [3 * t, 3 * t + 1, 3 * t + 2]).collect();
        CulledGeometry {
            normals: vec![[0.0, 0.0, 1.0]; positions.len()],
            positions,
            indices,
            triangle_ids: ids.to_vec(),
        }
    }

    fn center_cell(grid: &OcclusionGrid) -> usize {
        (grid.height / 2) as usize * grid.width as usize + (grid.width / 2) as usize
    }

    #[test]
    fn test_front_face_is_rasterized_back_face_is_not() {
        let mut grid = create_occlusion_grid();
        let stats = do_occlusion_test(&mut grid, &lane(&[facing(-2.0, true)], &[7]), &camera(), None);
        assert_eq!(stats.rasterized_triangles, 1);
        assert!(stats.covered_cells > 0);
        assert_eq!(grid.triangle_ids[center_cell(&grid)], 7);

        let stats = do_occlusion_test(&mut grid, &lane(&[facing(-2.0, false)], &[7]), &camera(), None);
        assert_eq!(stats.back_facing_triangles, 1);
        assert_eq!(stats.covered_cells, 0);
    }

    #[test]
    fn test_nearest_triangle_wins() {
        let mut grid = create_occlusion_grid();
        let geometry = lane(&[facing(-5.0, true), facing(-2.0, true)], &[1, 2]);
        do_occlusion_test(&mut grid, &geometry, &camera(), None);
        assert_eq!(grid.triangle_ids[center_cell(&grid)], 2);
    }

    #[test]
    fn test_segmentation_mask_clears_cells() {
        let mut grid = create_occlusion_grid();
        let mask = GrayImage::from_pixel(64, 48, Luma([255]));
        let stats = do_occlusion_test(&mut grid, &lane(&[facing(-2.0, true)], &[0]), &camera(), Some(&mask));
        assert!(stats.masked_cells > 0);
        assert_eq!(stats.covered_cells, 0);
    }

    #[test]
    fn test_sampling_rates() {
        assert_eq!(sampling_rate(ThermalState::Nominal), 6);
        assert_eq!(sampling_rate(ThermalState::Fair), 9);
        assert_eq!(sampling_rate(ThermalState::Serious), 24);
        assert_eq!(sampling_rate(ThermalState::Critical), 100_000_000);

        let mut colors = ColorState::default();
        colors.sample_counter = 5;
        assert!(!should_sample_colors(&colors));
        colors.sample_counter = 6;
        assert!(should_sample_colors(&colors));
    }

    #[test]
    fn test_update_colors_blends_visible_texels() {
        let triangle = facing(-2.0, true);
        let mut mesh = create_reduced_mesh(16, 16);
        assign(&mut mesh.positions, &triangle);
        assign(&mut mesh.normals, &[[0.0, 0.0, 1.0]; 3]);
        assign(&mut mesh.indices, &[[0, 1, 2]]);

        let record = create_match_record(3, 1, 0);
        let texels = rasterize_texels(&mesh, &record, &[], 0.5);
        let atlas = classify_triangle_sizes(&texels, &record, None);
        let mut storage = create_atlas_storage(256, 64);
        ensure_atlas_capacity(&mut storage, &atlas);

        let geometry = lane(&[triangle], &[0]);
        let mut grid = create_occlusion_grid();
        do_occlusion_test(&mut grid, &geometry, &camera(), None);

        let frame = CameraFrame {
            luma: GrayImage::from_pixel(64, 48, Luma([200])),
            chroma: ChromaImage::from_pixel(32, 24, LumaA([50, 60])),
            segmentation: None,
            view_proj: camera(),
            position: Point3::new(0.0, 0.0, 0.0),
        };
        let mut colors = ColorState {
            triangle_colors: Arc::new(vec![0]),
            ..Default::default()
        };

        let stats = update_colors(&grid, &geometry, &mesh, &texels, &atlas, &mut storage, &mut colors, &frame, 1.0);
        let side = texels.sides[0];
        assert!(stats.texels_sampled > 0);
        assert_eq!(stats.texels_sampled + stats.texels_occluded, texel_count(side));
        assert_eq!(stats.triangles_updated, 1);
        assert_eq!(colors.triangle_colors[0], pack_color(200, 50, 60));

        let planes = planes_for(&storage, atlas.size_classes[0]);
        let sampled = texel_coordinates(side)
            .filter(|&(column, row)| read_texel(planes, atlas.slot_ids[0], column, row).0 == 200)
            .count() as u32;
        assert_eq!(sampled, stats.texels_sampled);
    }
}
