/// Scene Error Handling
///
/// Stage-level error types for the reconstruction pipeline.
use crate::error::{EngineError, EngineResult};
use crate::scene::anchor_data::AnchorId;

/// Scene-specific result type
pub type SceneResult<T> = EngineResult<T>;

// SceneError for stage operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SceneError {
    #[error("Anchor {anchor} index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        anchor: AnchorId,
        index: u32,
        vertex_count: usize,
    },

    #[error("Anchor {anchor} has {normals} normals for {vertices} vertices")]
    NormalCountMismatch {
        anchor: AnchorId,
        vertices: usize,
        normals: usize,
    },

    #[error("Anchor {anchor} has a non-finite vertex")]
    NonFiniteVertex { anchor: AnchorId },

    #[error("Reconstruction channel closed")]
    ChannelClosed,

    #[error("Atlas plane {width}x{height} exceeds texture limit {limit}")]
    TextureTooLarge { width: u32, height: u32, limit: u32 },
}

impl From<SceneError> for EngineError {
    fn from(err: SceneError) -> Self {
        match err {
            SceneError::ChannelClosed => EngineError::ChannelClosed {
                name: "reconstruction".to_string(),
            },
            other => EngineError::ValidationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_error_display() {
        let err = SceneError::IndexOutOfRange {
            anchor: 7,
            index: 12,
            vertex_count: 10,
        };
        assert_eq!(err.to_string(), "Anchor 7 index 12 out of range for 10 vertices");
    }

    #[test]
    fn test_scene_errors_lift_into_engine_errors() {
        let engine: EngineError = SceneError::ChannelClosed.into();
        assert!(matches!(engine, EngineError::ChannelClosed { .. }));

        let engine: EngineError = SceneError::NonFiniteVertex { anchor: 3 }.into();
        match engine {
            EngineError::ValidationFailed(message) => assert!(message.contains("Anchor 3")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
