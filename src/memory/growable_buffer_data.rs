//! Growable Buffer Data - Pure DOP
//!
//! NO METHODS beyond slice access. Just data.
//! Growth and filling happen in growable_buffer_operations.rs

use std::ops::{Deref, DerefMut};

/// A structure-of-arrays column whose capacity only grows.
///
/// `capacity` is the logical capacity the buffer was sized for (always a
/// power of two once grown). `data.len()` is the number of live elements.
#[derive(Debug, Clone)]
pub struct GrowableBuffer<T> {
    pub label: &'static str,
    pub data: Vec<T>,
    pub capacity: usize,
    /// Number of times this buffer was reallocated
    pub growth_count: u32,
}

impl<T> Deref for GrowableBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<T> DerefMut for GrowableBuffer<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

/// Memory statistics for a set of buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferMemoryStats {
    pub live_bytes: usize,
    pub reserved_bytes: usize,
    pub growth_count: u32,
}

impl std::fmt::Display for BufferMemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Buffers: {:.1} KB live / {:.1} KB reserved, {} growths",
            self.live_bytes as f32 / 1024.0,
            self.reserved_bytes as f32 / 1024.0,
            self.growth_count
        )
    }
}
