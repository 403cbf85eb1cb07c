//! Spatial Sorter Operations - Pure DOP Functions
//!
//! Partitions a reduced mesh into small → micro → nano sectors and reorders
//! its vertices so that every sector owns a contiguous range.
//!
//! Four sorts run in sequence:
//! 1. bounding cube aligned to the small sector grid, edge a power of two
//! 2. octree subdivision down to small sectors
//! 3. 8x8x8 micro grid inside each small sector
//! 4. 8x8x8 nano grid inside each micro sector
//!
//! Every sort is a stable counting sort, so relative vertex order inside a
//! sector is preserved.

use super::mesh_data::ReducedMesh;
use super::sorter_data::{
    MicroSector, NanoSector, SectorIdWidth, SectorLayout, SmallSector, SortStats,
};
use crate::constants::sector::{
    MICRO_PER_AXIS, MICRO_SECTOR_SIZE, NANO_PER_AXIS, NANO_SECTOR_SIZE, NARROW_ID_LIMIT,
    SMALL_SECTOR_SIZE,
};
use crate::compute::split_ranges;
use crate::constants::INVALID_INDEX;
use crate::math::aabb_from_positions;
use crate::memory::assign_vec;
use rayon::prelude::*;

/// Octree node during the second sort: a cube of `size` small-sector cells
#[derive(Debug, Clone, Copy)]
struct OctreeNode {
    start: usize,
    end: usize,
    cell_origin: [u32; 3],
}

/// Integer small sector coordinates of a position
pub fn small_sector_coords(position: [f32; 3]) -> [i32; 3] {
    [
        (position[0] / SMALL_SECTOR_SIZE).floor() as i32,
        (position[1] / SMALL_SECTOR_SIZE).floor() as i32,
        (position[2] / SMALL_SECTOR_SIZE).floor() as i32,
    ]
}

/// Pack small sector coordinates into a collision-free key (21 bits per axis)
pub fn small_sector_key(coords: [i32; 3]) -> u64 {
    let pack = |c: i32| ((c as i64 + (1 << 20)) as u64) & 0x1F_FFFF;
    pack(coords[0]) | pack(coords[1]) << 21 | pack(coords[2]) << 42
}

fn grid_cell(value: f32, origin: f32, cell_size: f32, cells: u32) -> u32 {
    (((value - origin) / cell_size).floor().max(0.0) as u32).min(cells - 1)
}

fn local_id(cell: [u32; 3], per_axis: u32) -> u16 {
    (cell[0] + per_axis * cell[1] + per_axis * per_axis * cell[2]) as u16
}

fn micro_cell(position: [f32; 3], small: [i32; 3]) -> [u32; 3] {
    let mut cell = [0u32; 3];
    for axis in 0..3 {
        let origin = small[axis] as f32 * SMALL_SECTOR_SIZE;
        cell[axis] = grid_cell(position[axis], origin, MICRO_SECTOR_SIZE, MICRO_PER_AXIS);
    }
    cell
}

/// Micro sector local ID (x + 8y + 64z) of a position inside its small sector
pub fn micro_local_id(position: [f32; 3]) -> u16 {
    let small = small_sector_coords(position);
    local_id(micro_cell(position, small), MICRO_PER_AXIS)
}

/// Nano sector local ID of a position inside its micro sector
pub fn nano_local_id(position: [f32; 3]) -> u16 {
    let small = small_sector_coords(position);
    let micro = micro_cell(position, small);
    let mut cell = [0u32; 3];
    for axis in 0..3 {
        let origin = small[axis] as f32 * SMALL_SECTOR_SIZE + micro[axis] as f32 * MICRO_SECTOR_SIZE;
        cell[axis] = grid_cell(position[axis], origin, NANO_SECTOR_SIZE, NANO_PER_AXIS);
    }
    local_id(cell, NANO_PER_AXIS)
}

/// Octant index of a cell relative to a node's center
fn calculate_octant(cell: [u32; 3], node_origin: [u32; 3], half: u32) -> usize {
    let mut octant = 0;
    if cell[0] >= node_origin[0] + half {
        octant |= 1;
    }
    if cell[1] >= node_origin[1] + half {
        octant |= 2;
    }
    if cell[2] >= node_origin[2] + half {
        octant |= 4;
    }
    octant
}

/// Stable counting sort of `order` by `bucket_of`, returns (bucket, start, count)
/// for every non-empty bucket in ascending bucket order.
fn counting_sort<F>(order: &mut [u32], buckets: usize, bucket_of: F) -> Vec<(usize, usize, usize)>
where
    F: Fn(u32) -> usize,
{
    let mut counts = vec![0usize; buckets];
    for &v in order.iter() {
        counts[bucket_of(v)] += 1;
    }

    let mut offsets = vec![0usize; buckets];
    let mut running = 0;
    for (bucket, &count) in counts.iter().enumerate() {
        offsets[bucket] = running;
        running += count;
    }

    let scratch = order.to_vec();
    let mut cursor = offsets.clone();
    for &v in &scratch {
        let bucket = bucket_of(v);
        order[cursor[bucket]] = v;
        cursor[bucket] += 1;
    }

    counts
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .map(|(bucket, &count)| (bucket, offsets[bucket], count))
        .collect()
}

/// Second sort: subdivide the root cube until every node is one small sector
fn subdivide_octree(order: &mut [u32], cells: &[[u32; 3]], root_cells: u32) -> (Vec<OctreeNode>, u32) {
    let mut nodes = vec![OctreeNode {
        start: 0,
        end: order.len(),
        cell_origin: [0; 3],
    }];
    let mut size = root_cells;
    let mut depth = 0;

    while size > 1 {
        let half = size / 2;
        let slices = split_ranges(order, nodes.iter().map(|n| n.end - n.start));

        nodes = slices
            .into_par_iter()
            .zip(nodes.par_iter())
            .flat_map_iter(|(slice, node)| {
                let origin = node.cell_origin;
                let buckets = counting_sort(slice, 8, |v| calculate_octant(cells[v as usize], origin, half));
                buckets.into_iter().map(move |(octant, start, count)| OctreeNode {
                    start: node.start + start,
                    end: node.start + start + count,
                    cell_origin: [
                        origin[0] + if octant & 1 != 0 { half } else { 0 },
                        origin[1] + if octant & 2 != 0 { half } else { 0 },
                        origin[2] + if octant & 4 != 0 { half } else { 0 },
                    ],
                })
            })
            .collect();

        size = half;
        depth += 1;
        log::trace!("[sorter_operations::subdivide_octree] depth {} -> {} nodes", depth, nodes.len());
    }

    (nodes, depth)
}

/// Micro and nano sectors of one small sector, with offsets relative to it
struct SectorSplit {
    micro: Vec<MicroSector>,
    nano: Vec<NanoSector>,
}

/// Third and fourth sorts for one small sector's vertex range
fn split_small_sector(order: &mut [u32], base: u32, micro_ids: &[u16], nano_ids: &[u16]) -> SectorSplit {
    let micro_buckets = counting_sort(order, (MICRO_PER_AXIS.pow(3)) as usize, |v| micro_ids[v as usize] as usize);

    let mut micro = Vec::with_capacity(micro_buckets.len());
    let mut nano = Vec::new();

    for (local, start, count) in micro_buckets {
        let range = &mut order[start..start + count];
        let nano_buckets = counting_sort(range, (NANO_PER_AXIS.pow(3)) as usize, |v| nano_ids[v as usize] as usize);

        micro.push(MicroSector {
            small_sector: 0,
            local_id: local as u16,
            vertex_offset: base + start as u32,
            vertex_count: count as u32,
            nano_offset: nano.len() as u32,
            nano_count: nano_buckets.len() as u32,
        });

        for (nano_local, nano_start, nano_count) in nano_buckets {
            nano.push(NanoSector {
                micro_sector: (micro.len() - 1) as u32,
                local_id: nano_local as u16,
                vertex_offset: base + (start + nano_start) as u32,
                vertex_count: nano_count as u32,
            });
        }
    }

    SectorSplit { micro, nano }
}

/// Sort the mesh into the sector hierarchy and reorder its vertices.
///
/// Triangle order is untouched; triangle indices are remapped to the new
/// vertex order.
pub fn do_scene_sort(mesh: &mut ReducedMesh, layout: &mut SectorLayout) -> SortStats {
    let vertex_count = mesh.positions.len();
    let bounds = match aabb_from_positions(&mesh.positions) {
        Some(bounds) => bounds,
        None => {
            *layout = SectorLayout::default();
            return SortStats::default();
        }
    };

    // First sort: root cube on the small sector grid
    let min_coords = small_sector_coords([bounds.min.x, bounds.min.y, bounds.min.z]);
    let max_coords = small_sector_coords([bounds.max.x, bounds.max.y, bounds.max.z]);
    let span = (0..3)
        .map(|axis| (max_coords[axis] - min_coords[axis] + 1) as u32)
        .max()
        .unwrap_or(1);
    let root_cells = span.next_power_of_two();

    let cells: Vec<[u32; 3]> = mesh
        .positions
        .par_iter()
        .map(|&p| {
            let c = small_sector_coords(p);
            [
                (c[0] - min_coords[0]) as u32,
                (c[1] - min_coords[1]) as u32,
                (c[2] - min_coords[2]) as u32,
            ]
        })
        .collect();
    let micro_ids: Vec<u16> = mesh.positions.par_iter().map(|&p| micro_local_id(p)).collect();
    let nano_ids: Vec<u16> = mesh.positions.par_iter().map(|&p| nano_local_id(p)).collect();

    // Second sort
    let mut order: Vec<u32> = (0..vertex_count as u32).collect();
    let (leaves, depth) = subdivide_octree(&mut order, &cells, root_cells);

    // Third and fourth sorts, one small sector per task
    let slices = split_ranges(&mut order, leaves.iter().map(|n| n.end - n.start));
    let splits: Vec<SectorSplit> = slices
        .into_par_iter()
        .zip(leaves.par_iter())
        .map(|(slice, leaf)| split_small_sector(slice, leaf.start as u32, &micro_ids, &nano_ids))
        .collect();

    let mut small_sectors = Vec::with_capacity(leaves.len());
    let mut micro_sectors = Vec::new();
    let mut nano_sectors = Vec::new();

    for (small_index, (leaf, split)) in leaves.iter().zip(splits).enumerate() {
        let coords = [
            min_coords[0] + leaf.cell_origin[0] as i32,
            min_coords[1] + leaf.cell_origin[1] as i32,
            min_coords[2] + leaf.cell_origin[2] as i32,
        ];
        let micro_base = micro_sectors.len() as u32;
        let nano_base = nano_sectors.len() as u32;

        small_sectors.push(SmallSector {
            coords,
            center: [
                (coords[0] as f32 + 0.5) * SMALL_SECTOR_SIZE,
                (coords[1] as f32 + 0.5) * SMALL_SECTOR_SIZE,
                (coords[2] as f32 + 0.5) * SMALL_SECTOR_SIZE,
            ],
            vertex_offset: leaf.start as u32,
            vertex_count: (leaf.end - leaf.start) as u32,
            micro_offset: micro_base,
            micro_count: split.micro.len() as u32,
        });

        micro_sectors.extend(split.micro.into_iter().map(|mut m| {
            m.small_sector = small_index as u32;
            m.nano_offset += nano_base;
            m
        }));
        nano_sectors.extend(split.nano.into_iter().map(|mut n| {
            n.micro_sector += micro_base;
            n
        }));
    }

    // Apply the permutation
    let positions: Vec<[f32; 3]> = order.par_iter().map(|&v| mesh.positions[v as usize]).collect();
    let normals: Vec<[f32; 3]> = order.par_iter().map(|&v| mesh.normals[v as usize]).collect();
    let mut new_index = vec![0u32; vertex_count];
    for (i, &v) in order.iter().enumerate() {
        new_index[v as usize] = i as u32;
    }
    let indices: Vec<[u32; 3]> = mesh
        .indices
        .par_iter()
        .map(|t| [new_index[t[0] as usize], new_index[t[1] as usize], new_index[t[2] as usize]])
        .collect();

    assign_vec(&mut mesh.positions, positions);
    assign_vec(&mut mesh.normals, normals);
    assign_vec(&mut mesh.indices, indices);

    let mut vertex_nano_sector = vec![INVALID_INDEX; vertex_count];
    for (index, nano) in nano_sectors.iter().enumerate() {
        let start = nano.vertex_offset as usize;
        let end = start + nano.vertex_count as usize;
        vertex_nano_sector[start..end].fill(index as u32);
    }

    let mut sorted_keys: Vec<(u64, u32)> = small_sectors
        .iter()
        .enumerate()
        .map(|(i, s)| (small_sector_key(s.coords), i as u32))
        .collect();
    sorted_keys.sort_unstable();

    *layout = SectorLayout {
        small_sectors,
        sorted_keys,
        micro_sectors,
        nano_sectors,
        vertex_nano_sector,
        root_origin: [
            min_coords[0] as f32 * SMALL_SECTOR_SIZE,
            min_coords[1] as f32 * SMALL_SECTOR_SIZE,
            min_coords[2] as f32 * SMALL_SECTOR_SIZE,
        ],
        root_size: root_cells as f32 * SMALL_SECTOR_SIZE,
        octree_depth: depth,
    };

    let stats = sort_stats(layout);
    log::debug!("[sorter_operations::do_scene_sort] {} vertices, {}", vertex_count, stats);
    stats
}

/// Counters describing a layout
pub fn sort_stats(layout: &SectorLayout) -> SortStats {
    SortStats {
        small_sectors: layout.small_sectors.len(),
        micro_sectors: layout.micro_sectors.len(),
        nano_sectors: layout.nano_sectors.len(),
        octree_depth: layout.octree_depth,
    }
}

/// ID width for this layout's small sector count
pub fn sector_id_width(layout: &SectorLayout) -> SectorIdWidth {
    if layout.small_sectors.len() <= NARROW_ID_LIMIT {
        SectorIdWidth::Narrow
    } else {
        SectorIdWidth::Wide
    }
}

/// (small, micro, nano) path of a vertex
pub fn vertex_sector_path(layout: &SectorLayout, vertex: u32) -> (u32, u32, u32) {
    let nano = layout.vertex_nano_sector[vertex as usize];
    let micro = layout.nano_sectors[nano as usize].micro_sector;
    let small = layout.micro_sectors[micro as usize].small_sector;
    (small, micro, nano)
}

/// Small sector of a triangle: the sector of its lowest vertex index
pub fn triangle_small_sector(layout: &SectorLayout, triangle: [u32; 3]) -> u32 {
    let lowest = triangle[0].min(triangle[1]).min(triangle[2]);
    vertex_sector_path(layout, lowest).0
}

/// Look up a small sector by key
pub fn find_small_sector(layout: &SectorLayout, key: u64) -> Option<u32> {
    layout
        .sorted_keys
        .binary_search_by_key(&key, |&(k, _)| k)
        .ok()
        .map(|i| layout.sorted_keys[i].1)
}

/// Look up a micro sector of a small sector by local ID
pub fn find_micro_sector(layout: &SectorLayout, small: u32, local_id: u16) -> Option<u32> {
    let sector = layout.small_sectors.get(small as usize)?;
    let start = sector.micro_offset as usize;
    let range = &layout.micro_sectors[start..start + sector.micro_count as usize];
    range
        .binary_search_by_key(&local_id, |m| m.local_id)
        .ok()
        .map(|i| (start + i) as u32)
}

/// Look up a nano sector of a micro sector by local ID
pub fn find_nano_sector(layout: &SectorLayout, micro: u32, local_id: u16) -> Option<u32> {
    let sector = layout.micro_sectors.get(micro as usize)?;
    let start = sector.nano_offset as usize;
    let range = &layout.nano_sectors[start..start + sector.nano_count as usize];
    range
        .binary_search_by_key(&local_id, |n| n.local_id)
        .ok()
        .map(|i| (start + i) as u32)
}

/// New small sector → old small sector with the same coordinates
pub fn map_small_sectors(old: &SectorLayout, new: &SectorLayout) -> Vec<u32> {
    new.small_sectors
        .par_iter()
        .map(|s| find_small_sector(old, small_sector_key(s.coords)).unwrap_or(INVALID_INDEX))
        .collect()
}

/// New micro sector → old micro sector covering the same cell
pub fn map_micro_sector(old: &SectorLayout, new: &SectorLayout, small_map: &[u32], new_micro: u32) -> Option<u32> {
    let micro = &new.micro_sectors[new_micro as usize];
    let old_small = small_map[micro.small_sector as usize];
    if old_small == INVALID_INDEX {
        return None;
    }
    find_micro_sector(old, old_small, micro.local_id)
}

/// New nano sector → old nano sector covering the same cell
pub fn map_nano_sector(old: &SectorLayout, new: &SectorLayout, small_map: &[u32], new_nano: u32) -> Option<u32> {
    let nano = &new.nano_sectors[new_nano as usize];
    let old_micro = map_micro_sector(old, new, small_map, nano.micro_sector)?;
    find_nano_sector(old, old_micro, nano.local_id)
}

/// Rebuild sector ranges after a stable vertex condensation.
///
/// `offsets` is the exclusive scan of the keep marks, `total` the kept count.
/// Sectors that lose every vertex keep a zero-length range.
pub fn condense_layout(layout: &mut SectorLayout, offsets: &[u32], total: u32) {
    let new_position = |old: u32| -> u32 {
        offsets.get(old as usize).copied().unwrap_or(total)
    };

    for nano in layout.nano_sectors.iter_mut() {
        let start = new_position(nano.vertex_offset);
        let end = new_position(nano.vertex_offset + nano.vertex_count);
        nano.vertex_offset = start;
        nano.vertex_count = end - start;
    }
    for micro in layout.micro_sectors.iter_mut() {
        let start = new_position(micro.vertex_offset);
        let end = new_position(micro.vertex_offset + micro.vertex_count);
        micro.vertex_offset = start;
        micro.vertex_count = end - start;
    }
    for small in layout.small_sectors.iter_mut() {
        let start = new_position(small.vertex_offset);
        let end = new_position(small.vertex_offset + small.vertex_count);
        small.vertex_offset = start;
        small.vertex_count = end - start;
    }

    let mut vertex_nano_sector = vec![0u32; total as usize];
    for (index, nano) in layout.nano_sectors.iter().enumerate() {
        let start = nano.vertex_offset as usize;
        vertex_nano_sector[start..start + nano.vertex_count as usize].fill(index as u32);
    }
    layout.vertex_nano_sector = vertex_nano_sector;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::mesh_operations::create_reduced_mesh;
    use crate::memory::assign;

    fn mesh_from(positions: &[[f32; 3]], indices: &[[u32; 3]]) -> ReducedMesh {
        let mut mesh = create_reduced_mesh(16, 16);
        assign(&mut mesh.positions, positions);
        assign(&mut mesh.normals, &vec![[0.0, 1.0, 0.0]; positions.len()]);
        assign(&mut mesh.indices, indices);
        mesh
    }

    fn scattered_positions() -> Vec<[f32; 3]> {
        (0..200)
            .map(|i| {
                let f = i as f32;
                [
                    (f * 0.37).sin() * 7.0,
                    (f * 0.11).cos() * 3.0,
                    (f * 0.23).sin() * 5.0 - 1.0,
                ]
            })
            .collect()
    }

    #[test]
    fn test_small_sector_coords() {
        assert_eq!(small_sector_coords([0.0, 1.99, -0.01]), [0, 0, -1]);
        assert_eq!(small_sector_coords([4.0, -4.0, 2.5]), [2, -2, 1]);
    }

    #[test]
    fn test_sector_key_distinguishes_negative_coords() {
        assert_ne!(small_sector_key([-1, 0, 0]), small_sector_key([1, 0, 0]));
        assert_ne!(small_sector_key([0, -1, 0]), small_sector_key([0, 0, -1]));
    }

    #[test]
    fn test_local_ids() {
        assert_eq!(micro_local_id([0.0, 0.0, 0.0]), 0);
        assert_eq!(micro_local_id([0.3, 0.0, 0.0]), 1);
        assert_eq!(micro_local_id([0.0, 0.3, 0.0]), 8);
        assert_eq!(micro_local_id([1.99, 1.99, 1.99]), 511);
        assert_eq!(nano_local_id([0.04, 0.0, 0.0]), 1);
    }

    #[test]
    fn test_sort_groups_vertices_by_sector() {
        let positions = scattered_positions();
        let indices: Vec<[u32; 3]> = (0..198).map(|i| [i, i + 1, i + 2]).collect();
        let mut mesh = mesh_from(&positions, &indices);
        let mut layout = SectorLayout::default();

        let stats = do_scene_sort(&mut mesh, &mut layout);
        assert!(stats.small_sectors > 1);

        let total: u32 = layout.small_sectors.iter().map(|s| s.vertex_count).sum();
        assert_eq!(total as usize, positions.len());

        for sector in &layout.small_sectors {
            let start = sector.vertex_offset as usize;
            for p in &mesh.positions[start..start + sector.vertex_count as usize] {
                assert_eq!(small_sector_coords(*p), sector.coords);
            }
        }
        for nano in &layout.nano_sectors {
            let start = nano.vertex_offset as usize;
            for p in &mesh.positions[start..start + nano.vertex_count as usize] {
                assert_eq!(nano_local_id(*p), nano.local_id);
            }
        }
    }

    #[test]
    fn test_sort_preserves_triangle_geometry() {
        let positions = scattered_positions();
        let indices: Vec<[u32; 3]> = (0..198).map(|i| [i, i + 1, i + 2]).collect();
        let mut mesh = mesh_from(&positions, &indices);
        let mut layout = SectorLayout::default();
        do_scene_sort(&mut mesh, &mut layout);

        for (t, original) in mesh.indices.iter().zip(&indices) {
            for k in 0..3 {
                assert_eq!(mesh.positions[t[k] as usize], positions[original[k] as usize]);
            }
        }
    }

    #[test]
    fn test_sector_lookup_across_layouts() {
        let positions = scattered_positions();
        let mut a = mesh_from(&positions, &[]);
        let mut b = mesh_from(&positions[50..], &[]);
        let mut old = SectorLayout::default();
        let mut new = SectorLayout::default();
        do_scene_sort(&mut a, &mut old);
        do_scene_sort(&mut b, &mut new);

        let map = map_small_sectors(&old, &new);
        for (new_index, &old_index) in map.iter().enumerate() {
            assert_ne!(old_index, INVALID_INDEX);
            assert_eq!(
                old.small_sectors[old_index as usize].coords,
                new.small_sectors[new_index].coords
            );
        }
        for nano in 0..new.nano_sectors.len() as u32 {
            assert!(map_nano_sector(&old, &new, &map, nano).is_some());
        }
    }

    #[test]
    fn test_empty_mesh_sorts_to_empty_layout() {
        let mut mesh = mesh_from(&[], &[]);
        let mut layout = SectorLayout::default();
        let stats = do_scene_sort(&mut mesh, &mut layout);
        assert_eq!(stats, SortStats::default());
        assert!(layout.small_sectors.is_empty());
        assert_eq!(sector_id_width(&layout), SectorIdWidth::Narrow);
    }
}
