//! Math Module
//!
//! Bounding boxes and view frustums in mesh space.

pub mod bounds;
pub mod frustum;

pub use bounds::{
    aabb_contains_point, aabb_corners, aabb_from_center_half_extents, aabb_from_positions,
    create_aabb, AABB,
};
pub use frustum::{
    aabb_inside_frustum, aabb_outside_frustum, extract_frustum_planes, plane_distance,
    project_point, ViewFrustum,
};
