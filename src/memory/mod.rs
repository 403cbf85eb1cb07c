//! Memory Module
//!
//! Growable structure-of-arrays buffers shared by every pipeline stage.

pub mod growable_buffer_data;
pub mod growable_buffer_operations;

pub use growable_buffer_data::{BufferMemoryStats, GrowableBuffer};
pub use growable_buffer_operations::{
    assign, assign_vec, clear, combine_stats, create_growable_buffer, ensure_capacity,
    memory_stats, reset, round_up_to_multiple, round_up_to_power_of_2,
};
