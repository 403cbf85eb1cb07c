//! Growable Buffer Operations - Pure DOP Functions
//!
//! Capacity only grows, always to the next power of two at or above the
//! requested size. Growth is a fresh allocation and discards contents.

use super::growable_buffer_data::{BufferMemoryStats, GrowableBuffer};

/// Round up to the next power of two (0 and 1 both map to 1)
pub fn round_up_to_power_of_2(value: usize) -> usize {
    value.max(1).next_power_of_two()
}

/// Round up to the next multiple of `multiple` (must be a power of two)
pub fn round_up_to_multiple(value: usize, multiple: usize) -> usize {
    debug_assert!(multiple.is_power_of_two());
    !(multiple - 1) & (value + multiple - 1)
}

/// Create a buffer with the given initial capacity
pub fn create_growable_buffer<T>(label: &'static str, initial_capacity: usize) -> GrowableBuffer<T> {
    let capacity = round_up_to_power_of_2(initial_capacity);
    GrowableBuffer {
        label,
        data: Vec::with_capacity(capacity),
        capacity,
        growth_count: 0,
    }
}

/// Grow to hold `requested` elements. Returns true if a reallocation happened.
///
/// Old contents are not preserved: the buffer comes back empty after growth.
pub fn ensure_capacity<T>(buffer: &mut GrowableBuffer<T>, requested: usize) -> bool {
    if requested <= buffer.capacity {
        return false;
    }

    let new_capacity = round_up_to_power_of_2(requested);
    log::debug!(
        "[growable_buffer::ensure_capacity] {}: {} -> {}",
        buffer.label,
        buffer.capacity,
        new_capacity
    );
    buffer.data = Vec::with_capacity(new_capacity);
    buffer.capacity = new_capacity;
    buffer.growth_count += 1;
    true
}

/// Size the buffer to `len` elements, all set to `fill`
pub fn reset<T: Clone>(buffer: &mut GrowableBuffer<T>, len: usize, fill: T) {
    ensure_capacity(buffer, len);
    buffer.data.clear();
    buffer.data.resize(len, fill);
}

/// Replace contents with `values`
pub fn assign<T: Copy>(buffer: &mut GrowableBuffer<T>, values: &[T]) {
    ensure_capacity(buffer, values.len());
    buffer.data.clear();
    buffer.data.extend_from_slice(values);
}

/// Replace contents with an owned vector, keeping the buffer's capacity policy
pub fn assign_vec<T>(buffer: &mut GrowableBuffer<T>, values: Vec<T>) {
    ensure_capacity(buffer, values.len());
    buffer.data.clear();
    buffer.data.extend(values);
}

/// Drop all live elements, keep the allocation
pub fn clear<T>(buffer: &mut GrowableBuffer<T>) {
    buffer.data.clear();
}

/// Memory use of a single buffer
pub fn memory_stats<T>(buffer: &GrowableBuffer<T>) -> BufferMemoryStats {
    let element = std::mem::size_of::<T>();
    BufferMemoryStats {
        live_bytes: buffer.data.len() * element,
        reserved_bytes: buffer.capacity * element,
        growth_count: buffer.growth_count,
    }
}

/// Sum two stat records
pub fn combine_stats(a: BufferMemoryStats, b: BufferMemoryStats) -> BufferMemoryStats {
    BufferMemoryStats {
        live_bytes: a.live_bytes + b.live_bytes,
        reserved_bytes: a.reserved_bytes + b.reserved_bytes,
        growth_count: a.growth_count + b.growth_count,
    }
}
