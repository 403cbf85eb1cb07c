// Hearth Scene - Data-Oriented Programming (DOP) Architecture
//
// Reconstructs one renderable, textured mesh from the surface anchors an AR
// session reports, and keeps it up to date frame by frame.
//
// - *_data modules hold plain data, *_operations modules transform it
// - CPU kernels stand in for the compute passes; renderer uploads results
// - Pure functions over methods

// Constants module
pub mod constants;

// Core modules
pub mod error;
pub mod memory;

// Pipeline building blocks
pub mod compute;
pub mod math;

// Reconstruction pipeline and GPU upload boundary
pub mod renderer;
pub mod scene;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use error::{EngineError, EngineResult};
pub use scene::{
    create_scene_reconstructor, current_generation, notify_environment_changed, set_thermal_state, stable_handle,
    update_resources, Anchor, AnchorSet, CameraFrame, FrameInput, FrameReport, SceneGeneration, SceneReconstructor,
    ThermalState, ViewSet,
};

// Re-export wgpu for hosts that drive the upload boundary
pub use wgpu;

/// Reconstruction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Vertices closer than this inside one sector are merged (meters)
    pub duplicate_tolerance: f32,
    /// Cross-generation vertex identity tolerance (meters)
    pub vertex_match_tolerance: f32,
    /// Edge length of one texel (meters)
    pub texel_size: f32,
    pub min_frames_between_updates: u32,
    /// Frames after which a reconstruction is forced even without anchor changes
    pub refresh_interval_frames: u32,
    pub initial_vertex_capacity: usize,
    pub initial_triangle_capacity: usize,
    /// Initial slots per atlas size class
    pub initial_slot_capacity: u32,
    /// Atlas plane width in texels, a multiple of 32
    pub atlas_width: u32,
    /// Weight of a new camera sample against the stored colour
    pub color_blend_weight: f32,
    /// Run reconstruction on the calling thread (profiling and tests)
    pub synchronous_reconstruction: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            duplicate_tolerance: 2.4 / 256.0,
            vertex_match_tolerance: 2.4 / 256.0,
            texel_size: 0.01,
            min_frames_between_updates: 6,
            refresh_interval_frames: 120,
            initial_vertex_capacity: constants::capacity::VERTEX_CAPACITY,
            initial_triangle_capacity: constants::capacity::TRIANGLE_CAPACITY,
            initial_slot_capacity: constants::capacity::INITIAL_SLOT_COUNT,
            atlas_width: constants::texel::DEFAULT_ATLAS_WIDTH,
            color_blend_weight: 0.25,
            synchronous_reconstruction: false,
        }
    }
}

impl ReconstructionConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| anyhow::anyhow!("ReconstructionConfig: invalid TOML: {}", e))?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("ReconstructionConfig: cannot read {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&source)?;
        config.validate()?;
        log::info!("[ReconstructionConfig] Loaded from {}", path.display());
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        let nano = constants::sector::NANO_SECTOR_SIZE;

        for (name, value) in [
            ("duplicate_tolerance", self.duplicate_tolerance),
            ("vertex_match_tolerance", self.vertex_match_tolerance),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(anyhow::anyhow!("ReconstructionConfig: {} must be positive, got {}", name, value));
            }
            // Tolerances must stay inside one nano sector
            if value >= nano {
                return Err(anyhow::anyhow!(
                    "ReconstructionConfig: {} {} must be below the nano sector size {}",
                    name,
                    value,
                    nano
                ));
            }
        }

        if self.texel_size.is_nan() || self.texel_size <= 0.0 {
            return Err(anyhow::anyhow!(
                "ReconstructionConfig: texel_size must be positive, got {}",
                self.texel_size
            ));
        }

        if self.min_frames_between_updates == 0 {
            return Err(anyhow::anyhow!("ReconstructionConfig: min_frames_between_updates cannot be 0"));
        }

        if self.refresh_interval_frames < self.min_frames_between_updates {
            return Err(anyhow::anyhow!(
                "ReconstructionConfig: refresh_interval_frames {} is shorter than min_frames_between_updates {}",
                self.refresh_interval_frames,
                self.min_frames_between_updates
            ));
        }

        let slot_alignment = constants::capacity::SLOT_ALIGNMENT;
        if self.atlas_width == 0 || self.atlas_width % slot_alignment != 0 {
            return Err(anyhow::anyhow!(
                "ReconstructionConfig: atlas_width {} must be a non-zero multiple of {}",
                self.atlas_width,
                slot_alignment
            ));
        }

        if self.atlas_width > constants::texel::DEFAULT_ATLAS_WIDTH {
            return Err(anyhow::anyhow!(
                "ReconstructionConfig: atlas_width {} exceeds maximum of {}",
                self.atlas_width,
                constants::texel::DEFAULT_ATLAS_WIDTH
            ));
        }

        if !(0.0..=1.0).contains(&self.color_blend_weight) {
            return Err(anyhow::anyhow!(
                "ReconstructionConfig: color_blend_weight {} outside [0, 1]",
                self.color_blend_weight
            ));
        }

        log::info!(
            "[ReconstructionConfig] Validation: tolerance={}/{}, texel_size={}, throttle={}/{} frames, atlas_width={}",
            self.duplicate_tolerance,
            self.vertex_match_tolerance,
            self.texel_size,
            self.min_frames_between_updates,
            self.refresh_interval_frames,
            self.atlas_width
        );
        log::info!("[ReconstructionConfig] Configuration validated successfully");
        Ok(())
    }
}

/// Install env_logger for hosts without a logger. Safe to call repeatedly.
pub fn init_logging() {
    if env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .is_ok()
    {
        log::debug!("[init_logging] env_logger installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReconstructionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_vertex_capacity, 32768);
        assert_eq!(config.initial_triangle_capacity, 65536);
        assert_eq!(config.atlas_width, 16384);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            ReconstructionConfig {
                duplicate_tolerance: 0.0,
                ..Default::default()
            },
            ReconstructionConfig {
                vertex_match_tolerance: 0.05,
                ..Default::default()
            },
            ReconstructionConfig {
                texel_size: f32::NAN,
                ..Default::default()
            },
            ReconstructionConfig {
                atlas_width: 1000,
                ..Default::default()
            },
            ReconstructionConfig {
                atlas_width: 32768,
                ..Default::default()
            },
            ReconstructionConfig {
                min_frames_between_updates: 0,
                ..Default::default()
            },
            ReconstructionConfig {
                color_blend_weight: 1.5,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "accepted {:?}", config);
        }
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ReconstructionConfig::from_toml_str(
            "texel_size = 0.02\nsynchronous_reconstruction = true\n",
        )
        .expect("valid toml");
        assert_eq!(config.texel_size, 0.02);
        assert!(config.synchronous_reconstruction);
        assert_eq!(config.min_frames_between_updates, 6);

        assert!(ReconstructionConfig::from_toml_str("texel_size = \"wide\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        init_logging();
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("scene.toml");

        let written = ReconstructionConfig {
            atlas_width: 4096,
            color_blend_weight: 0.5,
            ..Default::default()
        };
        let mut file = std::fs::File::create(&path).expect("create file");
        file.write_all(toml::to_string(&written).expect("serialize").as_bytes())
            .expect("write file");

        let loaded = ReconstructionConfig::load(&path).expect("load config");
        assert_eq!(loaded, written);

        std::fs::write(&path, "atlas_width = 100\n").expect("overwrite file");
        assert!(ReconstructionConfig::load(&path).is_err());
        assert!(ReconstructionConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
