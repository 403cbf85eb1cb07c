//! View frustum planes and conservative box tests

use super::bounds::{aabb_corners, AABB};
use cgmath::{Matrix4, Point3, Vector4};

/// One view volume (an eye, or the capture camera)
#[derive(Debug, Clone, Copy)]
pub struct ViewFrustum {
    pub view_proj: Matrix4<f32>,
    pub position: Point3<f32>,
    pub planes: [Vector4<f32>; 6],
}

impl ViewFrustum {
    pub fn from_matrices(view_proj: Matrix4<f32>, position: Point3<f32>) -> Self {
        Self {
            view_proj,
            position,
            planes: extract_frustum_planes(&view_proj),
        }
    }
}

/// Extract frustum planes from view-projection matrix
pub fn extract_frustum_planes(vp: &Matrix4<f32>) -> [Vector4<f32>; 6] {
    // Gribb-Hartmann, wgpu clip space (0 <= z <= w)
    let m = vp;

    [
        // Left plane
        Vector4::new(m.x.w + m.x.x, m.y.w + m.y.x, m.z.w + m.z.x, m.w.w + m.w.x).normalize_plane(),
        // Right plane
        Vector4::new(m.x.w - m.x.x, m.y.w - m.y.x, m.z.w - m.z.x, m.w.w - m.w.x).normalize_plane(),
        // Top plane
        Vector4::new(m.x.w - m.x.y, m.y.w - m.y.y, m.z.w - m.z.y, m.w.w - m.w.y).normalize_plane(),
        // Bottom plane
        Vector4::new(m.x.w + m.x.y, m.y.w + m.y.y, m.z.w + m.z.y, m.w.w + m.w.y).normalize_plane(),
        // Near plane
        Vector4::new(m.x.z, m.y.z, m.z.z, m.w.z).normalize_plane(),
        // Far plane
        Vector4::new(m.x.w - m.x.z, m.y.w - m.y.z, m.z.w - m.z.z, m.w.w - m.w.z).normalize_plane(),
    ]
}

/// Normalize plane equation
trait NormalizePlane {
    fn normalize_plane(self) -> Self;
}

impl NormalizePlane for Vector4<f32> {
    fn normalize_plane(self) -> Self {
        let length = (self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if length > 0.0 {
            self / length
        } else {
            self
        }
    }
}

/// Signed distance from a plane
pub fn plane_distance(plane: &Vector4<f32>, point: Point3<f32>) -> f32 {
    plane.x * point.x + plane.y * point.y + plane.z * point.z + plane.w
}

/// True when the box lies entirely behind at least one plane.
///
/// Conservative: a box reported as not outside may still be invisible.
pub fn aabb_outside_frustum(frustum: &ViewFrustum, aabb: &AABB) -> bool {
    let corners = aabb_corners(aabb);
    frustum
        .planes
        .iter()
        .any(|plane| corners.iter().all(|&c| plane_distance(plane, c) < 0.0))
}

/// True when every corner is in front of every plane
pub fn aabb_inside_frustum(frustum: &ViewFrustum, aabb: &AABB) -> bool {
    let corners = aabb_corners(aabb);
    frustum
        .planes
        .iter()
        .all(|plane| corners.iter().all(|&c| plane_distance(plane, c) >= 0.0))
}

/// Transform a point to clip space
pub fn project_point(view_proj: &Matrix4<f32>, point: [f32; 3]) -> Vector4<f32> {
    view_proj * Vector4::new(point[0], point[1], point[2], 1.0)
}
