//! Anchor Data - Pure DOP
//!
//! NO METHODS. Just data.
//! Anchors are owned by the sensing side and shared read-only with the
//! reconstruction job through `Arc`.

use cgmath::Matrix4;
use std::sync::Arc;

/// Stable anchor identity
pub type AnchorId = u64;

/// A sensor-supplied micro-mesh fragment
#[derive(Debug, Clone)]
pub struct Anchor {
    pub id: AnchorId,
    /// Bumped by the sensor every time the anchor's geometry changes
    pub revision: u64,
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
    /// Anchor space to world space
    pub transform: Matrix4<f32>,
}

/// The live anchor set for one frame
#[derive(Debug, Clone, Default)]
pub struct AnchorSet {
    pub anchors: Vec<Arc<Anchor>>,
}
