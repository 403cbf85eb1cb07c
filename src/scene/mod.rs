//! Scene Module - Mesh reconstruction pipeline
//!
//! Reducer → sorter → duplicate remover → matcher → texel/atlas manager run
//! on a background job per generation; culler and occlusion tester run
//! every frame against the stable generation.

pub mod anchor_data;
pub mod atlas_data;
pub mod atlas_operations;
pub mod color;
pub mod culler_data;
pub mod culler_operations;
pub mod dedup_operations;
pub mod error;
pub mod matcher_data;
pub mod matcher_operations;
pub mod mesh_data;
pub mod mesh_operations;
pub mod occlusion_data;
pub mod occlusion_operations;
pub mod reconstructor_data;
pub mod reconstructor_operations;
pub mod sorter_data;
pub mod sorter_operations;
pub mod texel_data;
pub mod texel_operations;

// Data re-exports
pub use anchor_data::{Anchor, AnchorId, AnchorSet};
pub use atlas_data::{AtlasAssignment, AtlasPlanes, AtlasStorage, ChromaImage, SlotStats, SlotTable};
pub use culler_data::{
    CullOutput, CullStats, CulledGeometry, DispatchCommand, DrawCommand, DrawIndexedCommand, ViewSet,
};
pub use error::{SceneError, SceneResult};
pub use matcher_data::{ColorSource, MatchRecord, MatchStats};
pub use mesh_data::{ReducedMesh, VertexTriangleMap};
pub use occlusion_data::{CameraFrame, ColorState, OcclusionGrid, ThermalState};
pub use reconstructor_data::{FrameInput, FrameReport, ReconstructionStats, SceneGeneration, SceneReconstructor};
pub use sorter_data::{CullingSectorIds, SectorIdWidth, SectorLayout};
pub use texel_data::{SizeClass, TexelLayout};

// Re-export DOP operations
pub use reconstructor_operations::{
    create_scene_reconstructor, current_generation, last_cull, notify_environment_changed, set_thermal_state, stable_handle,
    update_resources,
};
