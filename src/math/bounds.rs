/// Data-Oriented Axis-Aligned Bounding Box System
///
/// Pure functions over mesh-space bounds - no methods, just data transformations.

use cgmath::{Point3, Vector3};
use rayon::prelude::*;

/// Axis-Aligned Bounding Box - pure data structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

/// Create new AABB from min/max points
pub fn create_aabb(min: Point3<f32>, max: Point3<f32>) -> AABB {
    AABB { min, max }
}

/// Create AABB from center point and half extents
/// Pure function - sector bounds are stored as centers
pub fn aabb_from_center_half_extents(center: Point3<f32>, half_extents: Vector3<f32>) -> AABB {
    AABB {
        min: center - half_extents,
        max: center + half_extents,
    }
}

/// Smallest AABB enclosing every position, None for an empty slice
/// Pure function - parallel min/max reduction
pub fn aabb_from_positions(positions: &[[f32; 3]]) -> Option<AABB> {
    if positions.is_empty() {
        return None;
    }

    let (min, max) = positions
        .par_iter()
        .fold(
            || ([f32::MAX; 3], [f32::MIN; 3]),
            |(mut min, mut max), p| {
                for axis in 0..3 {
                    min[axis] = min[axis].min(p[axis]);
                    max[axis] = max[axis].max(p[axis]);
                }
                (min, max)
            },
        )
        .reduce(
            || ([f32::MAX; 3], [f32::MIN; 3]),
            |(a_min, a_max), (b_min, b_max)| {
                let mut min = a_min;
                let mut max = a_max;
                for axis in 0..3 {
                    min[axis] = min[axis].min(b_min[axis]);
                    max[axis] = max[axis].max(b_max[axis]);
                }
                (min, max)
            },
        );

    Some(AABB {
        min: Point3::from(min),
        max: Point3::from(max),
    })
}

/// The eight corners of an AABB
pub fn aabb_corners(aabb: &AABB) -> [Point3<f32>; 8] {
    let (a, b) = (aabb.min, aabb.max);
    [
        Point3::new(a.x, a.y, a.z),
        Point3::new(b.x, a.y, a.z),
        Point3::new(a.x, b.y, a.z),
        Point3::new(b.x, b.y, a.z),
        Point3::new(a.x, a.y, b.z),
        Point3::new(b.x, a.y, b.z),
        Point3::new(a.x, b.y, b.z),
        Point3::new(b.x, b.y, b.z),
    ]
}

/// Test if AABB contains a point
pub fn aabb_contains_point(aabb: &AABB, point: Point3<f32>) -> bool {
    point.x >= aabb.min.x && point.x <= aabb.max.x &&
    point.y >= aabb.min.y && point.y <= aabb.max.y &&
    point.z >= aabb.min.z && point.z <= aabb.max.z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aabb_from_positions() {
        let positions = [[0.0, 1.0, -2.0], [3.0, -1.0, 4.0], [1.0, 0.0, 0.0]];
        let aabb = aabb_from_positions(&positions).unwrap();
        assert_eq!(aabb.min, Point3::new(0.0, -1.0, -2.0));
        assert_eq!(aabb.max, Point3::new(3.0, 1.0, 4.0));
        assert!(aabb_from_positions(&[]).is_none());
    }

    #[test]
    fn test_center_half_extents() {
        let aabb = aabb_from_center_half_extents(Point3::new(1.0, 1.0, 1.0), Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(aabb.min, Point3::new(0.0, 0.0, 0.0));
        assert!(aabb_contains_point(&aabb, Point3::new(2.0, 0.5, 1.0)));
        assert!(!aabb_contains_point(&aabb, Point3::new(2.1, 0.5, 1.0)));
        assert_eq!(aabb_corners(&aabb)[7], Point3::new(2.0, 2.0, 2.0));
    }
}
