//! Texture Atlas Operations - Pure DOP Functions
//!
//! Slot allocation per size class and colour transfer between generations.
//!
//! Allocation runs three steps every cycle: clear the occupancy table, mark
//! slots kept by matched triangles, then hand out open slots in ascending
//! order. A slot whose triangle vanished is open again in the same cycle.

use super::atlas_data::{AtlasAssignment, AtlasPlanes, AtlasStorage, ChromaImage, SlotStats, SlotTable};
use super::color::{has_color, unpack_color, NEUTRAL_CHROMA, NEUTRAL_LUMA};
use super::matcher_data::MatchRecord;
use super::texel_data::{ColorStaging, SizeClass, TexelLayout};
use super::texel_operations::{
    rotate_barycentric, size_class, texel_at_barycentric, texel_barycentric, texel_coordinates, texel_count,
};
use crate::compute::{count_scan, split_ranges, SyncPoint};
use crate::constants::capacity::{INITIAL_SLOT_COUNT, SLOT_ALIGNMENT};
use crate::constants::scan::MATCH_WIDTHS;
use crate::constants::texel::{LARGE_SLOT_SIDE, SMALL_SLOT_SIDE};
use crate::constants::INVALID_INDEX;
use crate::memory::round_up_to_power_of_2;
use bit_vec::BitVec;
use image::{GrayImage, LumaA};
use rayon::prelude::*;

/// One side of a colour transfer
#[derive(Debug, Clone, Copy)]
pub struct TransferSide<'a> {
    pub texels: &'a TexelLayout,
    pub atlas: &'a AtlasAssignment,
}

/// Counters for one colour transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub resampled_triangles: u32,
    pub filled_triangles: u32,
    pub texels_written: u32,
}

/// Slot table width for `needed` slots: never shrinks, multiple of 32
pub fn grow_max_slot_id(previous: u32, needed: u32) -> u32 {
    !(SLOT_ALIGNMENT - 1) & previous.max(needed + SLOT_ALIGNMENT - 1)
}

fn empty_table(class: SizeClass) -> SlotTable {
    SlotTable {
        class,
        occupied: BitVec::new(),
        open_slots: Vec::new(),
        max_slot_id: INITIAL_SLOT_COUNT,
    }
}

/// Clear, mark and scan one class. Returns the table with `needed` open slots.
fn build_slot_table(class: SizeClass, max_slot_id: u32, inherited: &[u32], needed: u32) -> SlotTable {
    let mut occupied = BitVec::from_elem(max_slot_id as usize, false);
    for &slot in inherited {
        debug_assert!(!occupied[slot as usize], "slot {} claimed twice", slot);
        occupied.set(slot as usize, true);
    }

    let open_slots: Vec<u32> = occupied
        .iter()
        .enumerate()
        .filter(|(_, taken)| !taken)
        .map(|(slot, _)| slot as u32)
        .take(needed as usize)
        .collect();
    debug_assert_eq!(open_slots.len() as u32, needed);

    SlotTable {
        class,
        occupied,
        open_slots,
        max_slot_id,
    }
}

/// Size classes and atlas slots for every triangle of the pending generation.
///
/// Matched triangles that stay in their class keep their old slot; all
/// others take the open slots of their class in triangle order.
pub fn classify_triangle_sizes(
    texels: &TexelLayout,
    record: &MatchRecord,
    old: Option<&AtlasAssignment>,
) -> AtlasAssignment {
    let triangle_count = texels.sides.len();
    let size_classes: Vec<SizeClass> = texels.sides.par_iter().map(|&s| size_class(s)).collect();

    let inherited: Vec<u32> = (0..triangle_count)
        .into_par_iter()
        .map(|t| {
            let old = match old {
                Some(old) => old,
                None => return INVALID_INDEX,
            };
            match record.triangle_matches.get(t) {
                Some(&ot) if ot != INVALID_INDEX && old.size_classes[ot as usize] == size_classes[t] => {
                    old.slot_ids[ot as usize]
                }
                _ => INVALID_INDEX,
            }
        })
        .collect();

    let needs = |class: SizeClass| -> Vec<u32> {
        (0..triangle_count)
            .into_par_iter()
            .map(|t| u32::from(size_classes[t] == class && inherited[t] == INVALID_INDEX))
            .collect()
    };
    let small_needs = needs(SizeClass::Small);
    let large_needs = needs(SizeClass::Large);
    let small_scan = count_scan(&small_needs, MATCH_WIDTHS, SyncPoint::SmallTriangleCount);
    let large_scan = count_scan(&large_needs, MATCH_WIDTHS, SyncPoint::LargeTriangleCount);

    let small_total = size_classes.iter().filter(|&&c| c == SizeClass::Small).count() as u32;
    let large_total = triangle_count as u32 - small_total;
    let (old_small_max, old_large_max) = match old {
        Some(old) => (old.small.max_slot_id, old.large.max_slot_id),
        None => (INITIAL_SLOT_COUNT, INITIAL_SLOT_COUNT),
    };

    let kept = |class: SizeClass| -> Vec<u32> {
        inherited
            .iter()
            .zip(&size_classes)
            .filter(|(&slot, &c)| slot != INVALID_INDEX && c == class)
            .map(|(&slot, _)| slot)
            .collect()
    };
    let small = build_slot_table(
        SizeClass::Small,
        grow_max_slot_id(old_small_max, small_total),
        &kept(SizeClass::Small),
        small_scan.total,
    );
    let large = build_slot_table(
        SizeClass::Large,
        grow_max_slot_id(old_large_max, large_total),
        &kept(SizeClass::Large),
        large_scan.total,
    );

    let slot_ids: Vec<u32> = (0..triangle_count)
        .into_par_iter()
        .map(|t| {
            if inherited[t] != INVALID_INDEX {
                return inherited[t];
            }
            match size_classes[t] {
                SizeClass::Small => small.open_slots[small_scan.offsets[t] as usize],
                SizeClass::Large => large.open_slots[large_scan.offsets[t] as usize],
            }
        })
        .collect();

    let stats = SlotStats {
        inherited: inherited.iter().filter(|&&s| s != INVALID_INDEX).count() as u32,
        allocated_small: small_scan.total,
        allocated_large: large_scan.total,
    };
    log::debug!(
        "[atlas_operations::classify_triangle_sizes] {} small / {} large, {} kept, {} + {} new slots",
        small_total,
        large_total,
        stats.inherited,
        stats.allocated_small,
        stats.allocated_large
    );

    AtlasAssignment {
        slot_ids,
        size_classes,
        small,
        large,
        stats,
    }
}

/// Assignment for an empty generation
pub fn create_empty_assignment() -> AtlasAssignment {
    AtlasAssignment {
        slot_ids: Vec::new(),
        size_classes: Vec::new(),
        small: empty_table(SizeClass::Small),
        large: empty_table(SizeClass::Large),
        stats: SlotStats::default(),
    }
}

fn create_planes(class: SizeClass, atlas_width: u32, slot_capacity: u32) -> AtlasPlanes {
    let slot_side = match class {
        SizeClass::Small => SMALL_SLOT_SIDE,
        SizeClass::Large => LARGE_SLOT_SIDE,
    };
    let slots_per_row = (atlas_width / slot_side).max(1);
    let rows = (slot_capacity + slots_per_row - 1) / slots_per_row;
    let height = rows.max(1) * slot_side;

    AtlasPlanes {
        class,
        luma: GrayImage::from_pixel(slots_per_row * slot_side, height, image::Luma([NEUTRAL_LUMA])),
        chroma: ChromaImage::from_pixel(
            slots_per_row * slot_side / 2,
            height / 2,
            LumaA([NEUTRAL_CHROMA[0], NEUTRAL_CHROMA[1]]),
        ),
        slot_side,
        slots_per_row,
        slot_capacity: rows.max(1) * slots_per_row,
    }
}

/// Create storage for `initial_slots` slots per class
pub fn create_atlas_storage(atlas_width: u32, initial_slots: u32) -> AtlasStorage {
    let width = atlas_width.max(LARGE_SLOT_SIDE) / LARGE_SLOT_SIDE * LARGE_SLOT_SIDE;
    if width != atlas_width {
        log::warn!(
            "[atlas_operations::create_atlas_storage] Atlas width {} rounded to {}",
            atlas_width,
            width
        );
    }
    AtlasStorage {
        small: create_planes(SizeClass::Small, width, initial_slots),
        large: create_planes(SizeClass::Large, width, initial_slots),
        atlas_width: width,
    }
}

/// Copy-on-grow: make room for `slot_count` slots, keeping every texel
pub fn ensure_plane_capacity(planes: &mut AtlasPlanes, slot_count: u32) -> bool {
    if slot_count <= planes.slot_capacity {
        return false;
    }

    let capacity = round_up_to_power_of_2(slot_count as usize) as u32;
    let grown = create_planes(planes.class, planes.slots_per_row * planes.slot_side, capacity);
    let mut luma = grown.luma;
    let mut chroma = grown.chroma;
    image::imageops::replace(&mut luma, &planes.luma, 0, 0);
    image::imageops::replace(&mut chroma, &planes.chroma, 0, 0);

    log::debug!(
        "[atlas_operations::ensure_plane_capacity] {:?}: {} -> {} slots",
        planes.class,
        planes.slot_capacity,
        grown.slot_capacity
    );
    planes.luma = luma;
    planes.chroma = chroma;
    planes.slot_capacity = grown.slot_capacity;
    true
}

/// Grow both classes to hold the assignment's slot tables
pub fn ensure_atlas_capacity(storage: &mut AtlasStorage, assignment: &AtlasAssignment) {
    ensure_plane_capacity(&mut storage.small, assignment.small.max_slot_id);
    ensure_plane_capacity(&mut storage.large, assignment.large.max_slot_id);
}

pub fn planes_for(storage: &AtlasStorage, class: SizeClass) -> &AtlasPlanes {
    match class {
        SizeClass::Small => &storage.small,
        SizeClass::Large => &storage.large,
    }
}

pub fn planes_for_mut(storage: &mut AtlasStorage, class: SizeClass) -> &mut AtlasPlanes {
    match class {
        SizeClass::Small => &mut storage.small,
        SizeClass::Large => &mut storage.large,
    }
}

/// Luma pixel of texel (column, row) of a slot
pub fn texel_pixel(planes: &AtlasPlanes, slot: u32, column: u32, row: u32) -> (u32, u32) {
    let x = (slot % planes.slots_per_row) * planes.slot_side + column;
    let y = (slot / planes.slots_per_row) * planes.slot_side + row;
    (x, y)
}

pub fn read_texel(planes: &AtlasPlanes, slot: u32, column: u32, row: u32) -> (u8, [u8; 2]) {
    let (x, y) = texel_pixel(planes, slot, column, row);
    let luma = planes.luma.get_pixel(x, y).0[0];
    let chroma = planes.chroma.get_pixel(x / 2, y / 2).0;
    (luma, chroma)
}

pub fn write_texel(planes: &mut AtlasPlanes, slot: u32, column: u32, row: u32, luma: u8, chroma: [u8; 2]) {
    let (x, y) = texel_pixel(planes, slot, column, row);
    planes.luma.put_pixel(x, y, image::Luma([luma]));
    planes.chroma.put_pixel(x / 2, y / 2, LumaA(chroma));
}

/// Gather phase: resample or fill every changed triangle into a staging buffer
pub fn gather_color_data(
    storage: &AtlasStorage,
    old: Option<TransferSide<'_>>,
    new: TransferSide<'_>,
    record: &MatchRecord,
) -> ColorStaging {
    let total = new.texels.texel_total as usize;
    let mut luma = vec![NEUTRAL_LUMA; total];
    let mut chroma = vec![NEUTRAL_CHROMA; total];
    let lengths = || new.texels.sides.iter().map(|&s| texel_count(s) as usize);

    split_ranges(&mut luma, lengths())
        .into_par_iter()
        .zip(split_ranges(&mut chroma, lengths()).into_par_iter())
        .enumerate()
        .filter(|(t, _)| new.texels.have_changed[*t])
        .for_each(|(t, (luma, chroma))| {
            let side = new.texels.sides[t];
            let old_triangle = record.triangle_matches.get(t).copied().unwrap_or(INVALID_INDEX);

            match old.filter(|_| old_triangle != INVALID_INDEX) {
                Some(old) => {
                    let ot = old_triangle as usize;
                    let old_side = old.texels.sides[ot];
                    let planes = planes_for(storage, old.atlas.size_classes[ot]);
                    let slot = old.atlas.slot_ids[ot];
                    let winding = record.match_windings[t];

                    for (i, (column, row)) in texel_coordinates(side).enumerate() {
                        let weights = rotate_barycentric(texel_barycentric(side, column, row), winding);
                        let (oc, or) = texel_at_barycentric(old_side, weights);
                        let (l, c) = read_texel(planes, slot, oc, or);
                        luma[i] = l;
                        chroma[i] = c;
                    }
                }
                None => {
                    let color = record.inherited_colors.get(t).copied().unwrap_or(0);
                    if has_color(color) {
                        let (l, c) = unpack_color(color);
                        luma.fill(l);
                        chroma.fill(c);
                    }
                }
            }
        });

    ColorStaging { luma, chroma }
}

/// Scatter phase: write staged texels of changed triangles into their slots
pub fn scatter_color_data(storage: &mut AtlasStorage, staging: &ColorStaging, new: TransferSide<'_>) -> u32 {
    let mut written = 0;
    for t in 0..new.texels.sides.len() {
        if !new.texels.have_changed[t] {
            continue;
        }
        let side = new.texels.sides[t];
        let base = new.texels.texel_offsets[t] as usize;
        let slot = new.atlas.slot_ids[t];
        let planes = planes_for_mut(storage, new.atlas.size_classes[t]);

        for (i, (column, row)) in texel_coordinates(side).enumerate() {
            write_texel(planes, slot, column, row, staging.luma[base + i], staging.chroma[base + i]);
            written += 1;
        }
    }
    written
}

/// Move captured colour from the stable generation's slots into the pending
/// generation's slots. Runs at handoff, before the swap.
pub fn transfer_color_data(
    storage: &mut AtlasStorage,
    old: Option<TransferSide<'_>>,
    new: TransferSide<'_>,
    record: &MatchRecord,
) -> TransferStats {
    ensure_atlas_capacity(storage, new.atlas);
    let staging = gather_color_data(storage, old, new, record);
    let texels_written = scatter_color_data(storage, &staging, new);

    let mut stats = TransferStats {
        texels_written,
        ..Default::default()
    };
    for t in 0..new.texels.sides.len() {
        if !new.texels.have_changed[t] {
            continue;
        }
        if old.is_some() && record.triangle_matches.get(t).map_or(false, |&m| m != INVALID_INDEX) {
            stats.resampled_triangles += 1;
        } else {
            stats.filled_triangles += 1;
        }
    }

    log::debug!(
        "[atlas_operations::transfer_color_data] {} resampled, {} filled, {} texels",
        stats.resampled_triangles,
        stats.filled_triangles,
        stats.texels_written
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::color::pack_color;
    use crate::scene::matcher_operations::create_match_record;
    use std::collections::HashSet;

    fn layout(sides: &[u8], changed: &[bool]) -> TexelLayout {
        let counts: Vec<u32> = sides.iter().map(|&s| texel_count(s)).collect();
        let (offsets, total) = crate::compute::exclusive_scan(&counts);
        let mut have_changed = BitVec::from_elem(sides.len(), false);
        for (t, &c) in changed.iter().enumerate() {
            have_changed.set(t, c);
        }
        TexelLayout {
            sides: sides.to_vec(),
            texel_offsets: offsets,
            texel_total: total,
            have_changed,
        }
    }

    fn assert_exclusive(assignment: &AtlasAssignment) {
        let mut seen = HashSet::new();
        for (slot, class) in assignment.slot_ids.iter().zip(&assignment.size_classes) {
            assert!(seen.insert((*slot, *class)), "slot {} of {:?} claimed twice", slot, class);
        }
    }

    #[test]
    fn test_grow_max_slot_id() {
        assert_eq!(grow_max_slot_id(1024, 10), 1024);
        assert_eq!(grow_max_slot_id(1024, 1024), 1024);
        assert_eq!(grow_max_slot_id(1024, 1025), 1056);
        assert_eq!(grow_max_slot_id(1056, 1000), 1056);
        assert_eq!(grow_max_slot_id(1024, 2000) % 32, 0);
    }

    #[test]
    fn test_first_generation_allocates_ascending() {
        let texels = layout(&[4, 20, 4, 4], &[true; 4]);
        let record = create_match_record(0, 4, 0);
        let assignment = classify_triangle_sizes(&texels, &record, None);

        assert_eq!(assignment.slot_ids, vec![0, 0, 1, 2]);
        assert_eq!(assignment.size_classes[1], SizeClass::Large);
        assert_eq!(assignment.stats.allocated_small, 3);
        assert_eq!(assignment.stats.allocated_large, 1);
        assert_exclusive(&assignment);
    }

    #[test]
    fn test_freed_slot_is_reused_same_cycle() {
        let old_texels = layout(&[4, 4, 4], &[true; 3]);
        let old = classify_triangle_sizes(&old_texels, &create_match_record(0, 3, 0), None);
        assert_eq!(old.slot_ids, vec![0, 1, 2]);

        // Old triangle 0 vanished; old 1 and 2 survive as new 0 and 1; new 2 appears
        let mut record = create_match_record(0, 3, 3);
        record.triangle_matches = vec![1, 2, INVALID_INDEX];
        let new_texels = layout(&[4, 4, 4], &[false, false, true]);
        let new = classify_triangle_sizes(&new_texels, &record, Some(&old));

        assert_eq!(new.slot_ids, vec![1, 2, 0]);
        assert_eq!(new.stats.inherited, 2);
        assert_eq!(new.stats.allocated_small, 1);
        assert_exclusive(&new);
    }

    #[test]
    fn test_class_change_takes_new_slot() {
        let old = classify_triangle_sizes(&layout(&[4, 4], &[true; 2]), &create_match_record(0, 2, 0), None);
        let mut record = create_match_record(0, 2, 2);
        record.triangle_matches = vec![0, 1];
        let new = classify_triangle_sizes(&layout(&[4, 16], &[false, true]), &record, Some(&old));

        assert_eq!(new.slot_ids[0], 0);
        assert_eq!(new.size_classes[1], SizeClass::Large);
        assert_eq!(new.stats.allocated_large, 1);
        assert_exclusive(&new);
    }

    #[test]
    fn test_slot_table_grows() {
        let sides = vec![2u8; 1500];
        let assignment = classify_triangle_sizes(
            &layout(&sides, &vec![true; 1500]),
            &create_match_record(0, 1500, 0),
            None,
        );
        assert!(assignment.small.max_slot_id >= 1500);
        assert_eq!(assignment.small.max_slot_id % 32, 0);
        assert_eq!(assignment.large.max_slot_id, INITIAL_SLOT_COUNT);
        assert_exclusive(&assignment);
    }

    #[test]
    fn test_storage_grows_copy_on_grow() {
        let mut storage = create_atlas_storage(256, 64);
        write_texel(&mut storage.small, 5, 1, 2, 42, [10, 20]);
        let before = storage.small.slot_capacity;

        assert!(ensure_plane_capacity(&mut storage.small, before + 1));
        assert!(storage.small.slot_capacity > before);
        assert_eq!(read_texel(&storage.small, 5, 1, 2), (42, [10, 20]));
        assert!(!ensure_plane_capacity(&mut storage.small, before));
    }

    #[test]
    fn test_transfer_resamples_and_fills() {
        let mut storage = create_atlas_storage(256, 64);

        let old_texels = layout(&[4], &[true]);
        let old_atlas = classify_triangle_sizes(&old_texels, &create_match_record(0, 1, 0), None);
        for (column, row) in texel_coordinates(4) {
            write_texel(&mut storage.small, old_atlas.slot_ids[0], column, row, 77, [11, 22]);
        }

        // New 0 is old 0 rotated with a bigger footprint; new 1 is fresh
        let mut record = create_match_record(0, 2, 1);
        record.triangle_matches = vec![0, INVALID_INDEX];
        record.match_windings = vec![1, 0];
        record.inherited_colors = vec![0, pack_color(150, 60, 70)];
        let new_texels = layout(&[6, 3], &[true, true]);
        let new_atlas = classify_triangle_sizes(&new_texels, &record, Some(&old_atlas));

        let stats = transfer_color_data(
            &mut storage,
            Some(TransferSide { texels: &old_texels, atlas: &old_atlas }),
            TransferSide { texels: &new_texels, atlas: &new_atlas },
            &record,
        );
        assert_eq!(stats.resampled_triangles, 1);
        assert_eq!(stats.filled_triangles, 1);
        assert_eq!(stats.texels_written, texel_count(6) + texel_count(3));

        for (column, row) in texel_coordinates(6) {
            assert_eq!(read_texel(&storage.small, new_atlas.slot_ids[0], column, row).0, 77);
        }
        for (column, row) in texel_coordinates(3) {
            assert_eq!(read_texel(&storage.small, new_atlas.slot_ids[1], column, row), (150, [60, 70]));
        }
    }
}
