//! Reconstruction Coordinator Operations - Pure DOP Functions
//!
//! Runs the reconstruction pipeline on a background job and drives the
//! per-frame render side: generation handoff, culling, occlusion testing
//! and colour capture.
//!
//! The stable generation is only ever replaced as a whole. A job matches
//! against the generation that was stable when it launched; its result is
//! handed off only if that generation is still stable and no environment
//! change happened in between.

use super::anchor_data::AnchorSet;
use super::atlas_operations::{
    classify_triangle_sizes, create_atlas_storage, create_empty_assignment, transfer_color_data, TransferSide,
    TransferStats,
};
use super::culler_data::CullOutput;
use super::culler_operations::cull_scene;
use super::dedup_operations::{build_vertex_map, remove_duplicate_vertices};
use super::error::{SceneError, SceneResult};
use super::matcher_data::{MatchStats, PreviousGeneration};
use super::matcher_operations::{
    create_match_record, match_meshes, match_micro_sector_colors, match_nano_sector_colors,
};
use super::mesh_operations::{
    create_mesh_update_throttle, create_reduced_mesh, create_reducer_workspace, mesh_memory_stats,
    prepare_optimized_culling, reduce_meshes, should_update_mesh,
};
use super::occlusion_data::{ColorState, ThermalState};
use super::occlusion_operations::{create_occlusion_grid, do_occlusion_test, should_sample_colors, update_colors};
use super::reconstructor_data::{
    FrameInput, FrameReport, PendingGeneration, ReconstructionJob, ReconstructionStats, SceneGeneration,
    SceneReconstructor,
};
use super::sorter_data::{CullingSectorIds, SectorLayout, SortStats};
use super::sorter_operations::do_scene_sort;
use super::texel_operations::rasterize_texels;
use crate::constants::thermal::CRITICAL_SAMPLING_RATE;
use crate::error::{EngineError, EngineResult};
use crate::memory::assign;
use crate::ReconstructionConfig;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Generation with no geometry, stable before the first handoff
pub fn create_empty_generation(config: &ReconstructionConfig) -> SceneGeneration {
    SceneGeneration {
        id: 0,
        mesh: create_reduced_mesh(config.initial_vertex_capacity, config.initial_triangle_capacity),
        layout: SectorLayout::default(),
        vertex_map: Default::default(),
        texels: Default::default(),
        atlas: create_empty_assignment(),
        sector_ids: CullingSectorIds::default(),
    }
}

/// Validate `config` and set up an empty scene
pub fn create_scene_reconstructor(config: ReconstructionConfig) -> EngineResult<SceneReconstructor> {
    config.validate().map_err(|e| EngineError::InvalidConfig {
        field: "ReconstructionConfig".to_string(),
        value: format!("{:?}", config),
        reason: e.to_string(),
    })?;

    let (result_sender, result_receiver) = flume::unbounded();
    let stable = Arc::new(RwLock::new(Arc::new(create_empty_generation(&config))));

    log::info!(
        "[reconstructor_operations::create_scene_reconstructor] Scene ready ({} reconstruction)",
        if config.synchronous_reconstruction { "synchronous" } else { "background" }
    );

    Ok(SceneReconstructor {
        atlas_storage: create_atlas_storage(config.atlas_width, config.initial_slot_capacity),
        colors: ColorState::default(),
        throttle: create_mesh_update_throttle(config.min_frames_between_updates, config.refresh_interval_frames),
        grid: create_occlusion_grid(),
        last_cull: Default::default(),
        epoch: 0,
        in_flight: false,
        result_sender,
        result_receiver,
        next_generation_id: 1,
        frame_index: 0,
        stable,
        config,
    })
}

/// The generation currently rendered
pub fn current_generation(reconstructor: &SceneReconstructor) -> Arc<SceneGeneration> {
    reconstructor.stable.read().clone()
}

/// Culler output of the most recent frame, empty when nothing was drawn
pub fn last_cull(reconstructor: &SceneReconstructor) -> &CullOutput {
    &reconstructor.last_cull
}

/// Shared handle for render threads that read the stable generation
pub fn stable_handle(reconstructor: &SceneReconstructor) -> Arc<RwLock<Arc<SceneGeneration>>> {
    Arc::clone(&reconstructor.stable)
}

pub fn set_thermal_state(reconstructor: &mut SceneReconstructor, state: ThermalState) {
    if reconstructor.colors.thermal_state != state {
        log::debug!(
            "[reconstructor_operations::set_thermal_state] {:?} -> {:?}",
            reconstructor.colors.thermal_state,
            state
        );
    }
    reconstructor.colors.thermal_state = state;
}

/// The environment transform changed: whatever is in flight is stale and
/// the next frame reconstructs.
pub fn notify_environment_changed(reconstructor: &mut SceneReconstructor) {
    reconstructor.epoch += 1;
    reconstructor.in_flight = false;
    reconstructor.throttle.force_next = true;
    log::info!(
        "[reconstructor_operations::notify_environment_changed] Environment changed, epoch {}",
        reconstructor.epoch
    );
}

/// The full reconstruction pipeline for one generation
pub fn reconstruct(job: ReconstructionJob) -> PendingGeneration {
    let started = Instant::now();
    let config = &job.config;
    let previous = &job.previous;

    let mut mesh = create_reduced_mesh(config.initial_vertex_capacity, config.initial_triangle_capacity);
    let mut workspace = create_reducer_workspace(config.initial_vertex_capacity);
    let reduction = reduce_meshes(&job.anchors, &mut mesh, &mut workspace);

    let mut layout = SectorLayout::default();
    let sort = if mesh.indices.is_empty() {
        SortStats::default()
    } else {
        do_scene_sort(&mut mesh, &mut layout)
    };
    let dedup = remove_duplicate_vertices(&mut mesh, &mut layout, config.duplicate_tolerance);
    let vertex_map = build_vertex_map(&mesh.indices, mesh.positions.len());

    let previous_view = PreviousGeneration {
        mesh: &previous.mesh,
        layout: &previous.layout,
        vertex_map: &previous.vertex_map,
        colors: &job.previous_colors,
    };
    let old = (!previous.mesh.indices.is_empty()).then_some(&previous_view);

    let mut record = create_match_record(mesh.positions.len(), mesh.indices.len(), previous.mesh.indices.len());
    let mut matching = MatchStats::default();
    let worklist = match_meshes(old, &mesh, &layout, config.vertex_match_tolerance, &mut record, &mut matching);
    let texels = rasterize_texels(&mesh, &record, &previous.texels.sides, config.texel_size);
    let worklist = match_nano_sector_colors(old, &mesh, &layout, &mut record, worklist, &mut matching);
    let atlas = classify_triangle_sizes(&texels, &record, Some(&previous.atlas));
    match_micro_sector_colors(old, &mesh, &layout, &mut record, worklist, &mut matching);

    assign(&mut mesh.colors, &record.inherited_colors);
    let sector_ids = prepare_optimized_culling(&mesh, &layout);

    let stats = ReconstructionStats {
        reduction,
        sort,
        dedup,
        matching,
        slots: atlas.stats,
        memory: mesh_memory_stats(&mesh),
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    };
    log::debug!("[reconstructor_operations::reconstruct] Generation {}: {}", job.generation_id, stats);

    PendingGeneration {
        generation: SceneGeneration {
            id: job.generation_id,
            mesh,
            layout,
            vertex_map,
            texels,
            atlas,
            sector_ids,
        },
        record,
        based_on: previous.id,
        epoch: job.epoch,
        stats,
    }
}

/// Start a reconstruction of `anchors` against the current stable generation
pub fn launch_reconstruction(reconstructor: &mut SceneReconstructor, anchors: &AnchorSet) -> SceneResult<()> {
    let job = ReconstructionJob {
        anchors: anchors.clone(),
        previous: current_generation(reconstructor),
        previous_colors: Arc::clone(&reconstructor.colors.triangle_colors),
        config: reconstructor.config.clone(),
        epoch: reconstructor.epoch,
        generation_id: reconstructor.next_generation_id,
    };
    reconstructor.next_generation_id += 1;
    reconstructor.in_flight = true;

    log::debug!(
        "[reconstructor_operations::launch_reconstruction] Generation {} from {} anchors",
        job.generation_id,
        anchors.anchors.len()
    );

    if reconstructor.config.synchronous_reconstruction {
        let pending = reconstruct(job);
        return reconstructor
            .result_sender
            .send(pending)
            .map_err(|_| SceneError::ChannelClosed.into());
    }

    let sender = reconstructor.result_sender.clone();
    rayon::spawn(move || {
        let pending = reconstruct(job);
        if sender.send(pending).is_err() {
            log::warn!("[reconstructor_operations::launch_reconstruction] Result channel closed, dropping generation");
        }
    });
    Ok(())
}

/// Next finished generation that is still valid, if any
pub fn poll_pending(reconstructor: &mut SceneReconstructor) -> Option<PendingGeneration> {
    let stable_id = reconstructor.stable.read().id;
    while let Ok(pending) = reconstructor.result_receiver.try_recv() {
        if pending.epoch != reconstructor.epoch || pending.based_on != stable_id {
            log::warn!(
                "[reconstructor_operations::poll_pending] Dropping stale generation {} (epoch {}, based on {})",
                pending.generation.id,
                pending.epoch,
                pending.based_on
            );
            continue;
        }
        reconstructor.in_flight = false;
        return Some(pending);
    }
    None
}

/// Publish a finished generation: move colours into its slots, then swap
pub fn hand_off(reconstructor: &mut SceneReconstructor, pending: PendingGeneration) -> TransferStats {
    let previous = current_generation(reconstructor);
    let generation = pending.generation;

    let transfer = transfer_color_data(
        &mut reconstructor.atlas_storage,
        Some(TransferSide {
            texels: &previous.texels,
            atlas: &previous.atlas,
        }),
        TransferSide {
            texels: &generation.texels,
            atlas: &generation.atlas,
        },
        &pending.record,
    );

    reconstructor.colors.triangle_colors = Arc::new(generation.mesh.colors.to_vec());
    reconstructor.colors.sample_counter = CRITICAL_SAMPLING_RATE;

    log::info!(
        "[reconstructor_operations::hand_off] Frame {}: generation {} -> {}: {} vertices, {} triangles",
        reconstructor.frame_index,
        previous.id,
        generation.id,
        generation.mesh.positions.len(),
        generation.mesh.indices.len()
    );
    *reconstructor.stable.write() = Arc::new(generation);
    transfer
}

/// Enough geometry to be worth culling and drawing
pub fn doing_rendering(generation: &SceneGeneration) -> bool {
    let vertices = generation.mesh.positions.len();
    let triangles = generation.mesh.indices.len();
    vertices > 0 && triangles > 0 && triangles >= vertices
}

/// Per-frame entry point
pub fn update_resources(reconstructor: &mut SceneReconstructor, input: FrameInput<'_>) -> FrameReport {
    reconstructor.frame_index += 1;
    reconstructor.colors.sample_counter = reconstructor.colors.sample_counter.saturating_add(1);
    let mut report = FrameReport {
        frame_index: reconstructor.frame_index,
        ..Default::default()
    };

    if let Some(pending) = poll_pending(reconstructor) {
        report.reconstruction = Some(pending.stats);
        report.transfer = Some(hand_off(reconstructor, pending));
        report.handed_off = true;
    } else if !reconstructor.in_flight && should_update_mesh(&mut reconstructor.throttle, input.anchors) {
        match launch_reconstruction(reconstructor, input.anchors) {
            Ok(()) => report.launched = true,
            Err(e) => {
                log::warn!("[reconstructor_operations::update_resources] Reconstruction not started: {}", e);
                reconstructor.in_flight = false;
            }
        }
    }

    let generation = current_generation(reconstructor);
    report.doing_rendering = doing_rendering(&generation);
    if !report.doing_rendering {
        reconstructor.last_cull = Default::default();
        return report;
    }

    let cull = cull_scene(
        &generation.mesh,
        &generation.layout,
        &generation.sector_ids,
        &generation.vertex_map,
        input.views,
    );
    report.cull = cull.stats;

    let camera = input.views.camera.view_proj * generation.mesh.mesh_to_world;
    let segmentation = input.frame.and_then(|frame| frame.segmentation.as_ref());
    report.occlusion = Some(do_occlusion_test(
        &mut reconstructor.grid,
        &cull.occlusion,
        &camera,
        segmentation,
    ));

    let colors_allowed = !report.launched && should_sample_colors(&reconstructor.colors);
    if let (true, Some(frame)) = (colors_allowed, input.frame) {
        report.colors = Some(update_colors(
            &reconstructor.grid,
            &cull.occlusion,
            &generation.mesh,
            &generation.texels,
            &generation.atlas,
            &mut reconstructor.atlas_storage,
            &mut reconstructor.colors,
            frame,
            reconstructor.config.color_blend_weight,
        ));
        reconstructor.colors.sample_counter = 0;
    }

    reconstructor.last_cull = cull;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::ViewFrustum;
    use crate::scene::anchor_data::Anchor;
    use crate::scene::atlas_data::ChromaImage;
    use crate::scene::culler_data::ViewSet;
    use crate::scene::occlusion_data::CameraFrame;
    use cgmath::{perspective, Deg, Matrix4, Point3, SquareMatrix, Vector3};
    use image::{GrayImage, Luma, LumaA};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn config() -> ReconstructionConfig {
        ReconstructionConfig {
            synchronous_reconstruction: true,
            min_frames_between_updates: 1,
            refresh_interval_frames: 4,
            initial_vertex_capacity: 64,
            initial_triangle_capacity: 64,
            initial_slot_capacity: 64,
            atlas_width: 256,
            ..Default::default()
        }
    }

    /// A 6x6 vertex grid facing +z, in front of a camera at the origin
    fn patch_anchor(id: u64, revision: u64) -> Arc<Anchor> {
        let mut vertices = Vec::new();
        for y in 0..6 {
            for x in 0..6 {
                vertices.push([0.1 + 0.1 * x as f32, 0.1 + 0.1 * y as f32, -1.5]);
            }
        }
        let mut indices = Vec::new();
        for y in 0..5u32 {
            for x in 0..5u32 {
                let i = y * 6 + x;
                indices.push([i, i + 1, i + 7]);
                indices.push([i, i + 7, i + 6]);
            }
        }
        Arc::new(Anchor {
            id,
            revision,
            normals: vec![[0.0, 0.0, 1.0]; vertices.len()],
            vertices,
            indices,
            transform: Matrix4::identity(),
        })
    }

    fn views() -> ViewSet {
        let proj = perspective(Deg(90.0), 4.0 / 3.0, 0.1, 100.0);
        let eye = Point3::new(0.0, 0.0, 0.0);
        let view = Matrix4::look_at_rh(eye, Point3::new(0.0, 0.0, -1.0), Vector3::unit_y());
        let frustum = ViewFrustum::from_matrices(proj * view, eye);
        ViewSet {
            views: vec![frustum],
            camera: frustum,
        }
    }

    fn frame(views: &ViewSet) -> CameraFrame {
        CameraFrame {
            luma: GrayImage::from_pixel(64, 48, Luma([180])),
            chroma: ChromaImage::from_pixel(32, 24, LumaA([100, 140])),
            segmentation: None,
            view_proj: views.camera.view_proj,
            position: views.camera.position,
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ReconstructionConfig {
            texel_size: 0.0,
            ..Default::default()
        };
        assert!(create_scene_reconstructor(config).is_err());
    }

    #[test]
    fn test_empty_scene_skips_rendering() {
        init();
        let mut reconstructor = create_scene_reconstructor(config()).expect("valid config");
        let anchors = AnchorSet::default();
        let views = views();
        let report = update_resources(
            &mut reconstructor,
            FrameInput {
                anchors: &anchors,
                views: &views,
                frame: None,
            },
        );
        assert!(!report.doing_rendering);
        assert!(report.occlusion.is_none());
        assert!(last_cull(&reconstructor).render.indices.is_empty());
        assert!(!report.atlas_dirty());
        assert_eq!(current_generation(&reconstructor).id, 0);
    }

    #[test]
    fn test_first_generation_is_handed_off_next_frame() {
        init();
        let mut reconstructor = create_scene_reconstructor(config()).expect("valid config");
        let anchors = AnchorSet {
            anchors: vec![patch_anchor(1, 0)],
        };
        let views = views();
        let input = FrameInput {
            anchors: &anchors,
            views: &views,
            frame: None,
        };

        let first = update_resources(&mut reconstructor, input);
        assert!(first.launched);
        assert!(!first.handed_off);
        assert_eq!(current_generation(&reconstructor).id, 0);

        let second = update_resources(&mut reconstructor, input);
        assert!(second.handed_off);
        let generation = current_generation(&reconstructor);
        assert_eq!(generation.id, 1);
        assert_eq!(generation.mesh.positions.len(), 36);
        assert_eq!(generation.mesh.indices.len(), 50);
        assert!(second.doing_rendering);
        assert_eq!(second.cull.render_triangles, 50);
        let transfer = second.transfer.expect("transfer ran");
        assert_eq!(transfer.filled_triangles, 50);

        assert_eq!(second.frame_index, 2);
        assert!(second.atlas_dirty());
        assert_eq!(last_cull(&reconstructor).render.triangle_ids.len(), 50);
        assert_eq!(last_cull(&reconstructor).render_draw.index_count, 150);

        let stats = second.reconstruction.expect("handoff carries stats");
        assert!(stats.memory.live_bytes >= 36 * 12 + 50 * 12);
        assert!(stats.memory.reserved_bytes >= stats.memory.live_bytes);
    }

    #[test]
    fn test_unchanged_scene_matches_fully_without_churn() {
        init();
        let mut reconstructor = create_scene_reconstructor(config()).expect("valid config");
        let anchors = AnchorSet {
            anchors: vec![patch_anchor(1, 0)],
        };
        let views = views();
        let frame = frame(&views);
        let input = FrameInput {
            anchors: &anchors,
            views: &views,
            frame: Some(&frame),
        };

        let mut reports = Vec::new();
        for _ in 0..12 {
            reports.push(update_resources(&mut reconstructor, input));
        }

        let handoffs: Vec<&FrameReport> = reports.iter().filter(|r| r.handed_off).collect();
        assert!(handoffs.len() >= 2, "refresh interval should rebuild the scene");

        for report in &handoffs[1..] {
            let stats = report.reconstruction.expect("handoff carries stats");
            assert_eq!(stats.matching.matched_triangles, 50);
            assert_eq!(stats.slots.inherited, 50);
            assert_eq!(stats.slots.allocated_small + stats.slots.allocated_large, 0);
            let transfer = report.transfer.expect("transfer ran");
            assert_eq!(transfer.texels_written, 0);
        }

        // Colour capture never runs on a launching frame, and never twice
        // within one sampling interval
        let sampled: Vec<usize> = reports
            .iter()
            .enumerate()
            .filter(|(_, r)| r.colors.is_some())
            .map(|(i, _)| i)
            .collect();
        assert!(!sampled.is_empty());
        for &i in &sampled {
            assert!(!reports[i].launched);
        }
        for pair in sampled.windows(2) {
            let handoff_between = reports[pair[0] + 1..=pair[1]].iter().any(|r| r.handed_off);
            assert!(handoff_between || pair[1] - pair[0] >= 6);
        }
    }

    #[test]
    fn test_environment_change_drops_in_flight_result() {
        init();
        let mut reconstructor = create_scene_reconstructor(config()).expect("valid config");
        let anchors = AnchorSet {
            anchors: vec![patch_anchor(1, 0)],
        };
        let views = views();
        let input = FrameInput {
            anchors: &anchors,
            views: &views,
            frame: None,
        };

        assert!(update_resources(&mut reconstructor, input).launched);
        notify_environment_changed(&mut reconstructor);

        // The stale result is dropped and a fresh reconstruction starts
        let report = update_resources(&mut reconstructor, input);
        assert!(!report.handed_off);
        assert!(report.launched);
        assert_eq!(current_generation(&reconstructor).id, 0);

        let report = update_resources(&mut reconstructor, input);
        assert!(report.handed_off);
        assert_eq!(current_generation(&reconstructor).id, 2);
    }

    #[test]
    fn test_critical_thermal_state_stops_sampling() {
        init();
        let mut reconstructor = create_scene_reconstructor(config()).expect("valid config");
        set_thermal_state(&mut reconstructor, ThermalState::Critical);
        let anchors = AnchorSet {
            anchors: vec![patch_anchor(1, 0)],
        };
        let views = views();
        let frame = frame(&views);
        let input = FrameInput {
            anchors: &anchors,
            views: &views,
            frame: Some(&frame),
        };

        update_resources(&mut reconstructor, input);
        let handoff = update_resources(&mut reconstructor, input);
        assert!(handoff.handed_off);
        // The counter is saturated by the handoff, so one capture may follow
        let mut captures = 0;
        for _ in 0..6 {
            if update_resources(&mut reconstructor, input).colors.is_some() {
                captures += 1;
            }
        }
        assert!(captures <= 1);
    }
}
