//! Scene GPU Buffers Operations - Pure DOP Functions
//!
//! Upload boundary between the CPU pipeline and wgpu. Buffers grow in powers
//! of two and are reallocated fresh; contents are rewritten every frame.

use super::scene_buffers_data::{AtlasTextures, SceneBuffer, SceneBuffers, SceneVertex, UploadStats};
use crate::memory::round_up_to_power_of_2;
use crate::scene::atlas_data::{AtlasPlanes, AtlasStorage};
use crate::scene::culler_data::{CullOutput, DispatchCommand, DrawCommand, DrawIndexedCommand};
use crate::scene::error::{SceneError, SceneResult};
use crate::scene::texel_data::SizeClass;
use bytemuck::Pod;
use wgpu::{Device, Queue};

/// Smallest allocation of any scene buffer
pub const MIN_BUFFER_BYTES: u64 = 256;

/// Capacity to allocate for `needed` bytes, or None when `current` suffices
pub fn buffer_growth_target(current: u64, needed: u64) -> Option<u64> {
    if needed <= current {
        return None;
    }
    Some((round_up_to_power_of_2(needed as usize) as u64).max(MIN_BUFFER_BYTES))
}

fn allocate_buffer(device: &Device, label: &'static str, usage: wgpu::BufferUsages, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub fn create_scene_buffer(
    device: &Device,
    label: &'static str,
    usage: wgpu::BufferUsages,
    initial_bytes: u64,
) -> SceneBuffer {
    let capacity = (round_up_to_power_of_2(initial_bytes as usize) as u64).max(MIN_BUFFER_BYTES);
    SceneBuffer {
        label,
        buffer: allocate_buffer(device, label, usage, capacity),
        usage,
        capacity,
        len: 0,
        growth_count: 0,
    }
}

/// Reallocate when `needed` exceeds capacity. Old contents are discarded.
pub fn ensure_buffer_capacity(device: &Device, buffer: &mut SceneBuffer, needed: u64) -> bool {
    let Some(capacity) = buffer_growth_target(buffer.capacity, needed) else {
        return false;
    };

    log::debug!(
        "[scene_buffers_operations::ensure_buffer_capacity] {} grows {} -> {} bytes",
        buffer.label,
        buffer.capacity,
        capacity
    );
    buffer.buffer = allocate_buffer(device, buffer.label, buffer.usage, capacity);
    buffer.capacity = capacity;
    buffer.growth_count += 1;
    true
}

/// Write `data` at offset zero, growing first if needed
pub fn upload_slice<T: Pod>(device: &Device, queue: &Queue, buffer: &mut SceneBuffer, data: &[T]) -> UploadStats {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let grew = ensure_buffer_capacity(device, buffer, bytes.len() as u64);
    if !bytes.is_empty() {
        queue.write_buffer(&buffer.buffer, 0, bytes);
    }
    buffer.len = bytes.len() as u64;

    UploadStats {
        buffer_bytes: bytes.len() as u64,
        texture_bytes: 0,
        reallocations: grew as u32,
    }
}

/// Interleave the render lane with its camera coordinates
pub fn interleave_vertices(cull: &CullOutput) -> Vec<SceneVertex> {
    let render = &cull.render;
    render
        .positions
        .iter()
        .zip(&render.normals)
        .enumerate()
        .map(|(i, (&position, &normal))| SceneVertex {
            position,
            normal,
            camera_coordinate: cull.camera_coordinates.get(i).copied().unwrap_or([-1.0, -1.0]),
        })
        .collect()
}

pub fn vertex_buffer_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<SceneVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

/// Reject planes the device cannot hold as one texture
pub fn check_texture_size(width: u32, height: u32, limit: u32) -> SceneResult<()> {
    if width > limit || height > limit {
        return Err(SceneError::TextureTooLarge { width, height, limit }.into());
    }
    Ok(())
}

fn create_plane_texture(
    device: &Device,
    label: &'static str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

/// Create the luma (R8) and chroma (RG8) textures for one size class
pub fn create_atlas_textures(device: &Device, planes: &AtlasPlanes) -> SceneResult<AtlasTextures> {
    let (width, height) = planes.luma.dimensions();
    check_texture_size(width, height, device.limits().max_texture_dimension_2d)?;

    let (luma_label, chroma_label) = match planes.class {
        SizeClass::Small => ("Small Atlas Luma", "Small Atlas Chroma"),
        SizeClass::Large => ("Large Atlas Luma", "Large Atlas Chroma"),
    };
    let luma = create_plane_texture(device, luma_label, width, height, wgpu::TextureFormat::R8Unorm);
    let (chroma_width, chroma_height) = planes.chroma.dimensions();
    let chroma = create_plane_texture(
        device,
        chroma_label,
        chroma_width.max(1),
        chroma_height.max(1),
        wgpu::TextureFormat::Rg8Unorm,
    );

    Ok(AtlasTextures {
        luma_view: luma.create_view(&wgpu::TextureViewDescriptor::default()),
        chroma_view: chroma.create_view(&wgpu::TextureViewDescriptor::default()),
        luma,
        chroma,
        width,
        height,
    })
}

fn write_plane(queue: &Queue, texture: &wgpu::Texture, bytes: &[u8], width: u32, height: u32, texel_bytes: u32) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(texel_bytes * width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// Upload both planes of one class, recreating the textures if the planes grew
pub fn upload_atlas_planes(
    device: &Device,
    queue: &Queue,
    textures: &mut AtlasTextures,
    planes: &AtlasPlanes,
) -> SceneResult<UploadStats> {
    let mut stats = UploadStats::default();
    let (width, height) = planes.luma.dimensions();
    if (width, height) != (textures.width, textures.height) {
        *textures = create_atlas_textures(device, planes)?;
        stats.reallocations += 1;
    }

    write_plane(queue, &textures.luma, planes.luma.as_raw(), width, height, 1);
    let (chroma_width, chroma_height) = planes.chroma.dimensions();
    if chroma_width > 0 && chroma_height > 0 {
        write_plane(queue, &textures.chroma, planes.chroma.as_raw(), chroma_width, chroma_height, 2);
    }

    stats.texture_bytes = (planes.luma.as_raw().len() + planes.chroma.as_raw().len()) as u64;
    Ok(stats)
}

/// Allocate every buffer and texture the scene renderer binds
pub fn create_scene_buffers(device: &Device, storage: &AtlasStorage) -> SceneResult<SceneBuffers> {
    let vertex = wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::STORAGE;
    let index = wgpu::BufferUsages::INDEX | wgpu::BufferUsages::STORAGE;
    let indirect = wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE;

    Ok(SceneBuffers {
        vertices: create_scene_buffer(device, "Scene Vertices", vertex, 0),
        indices: create_scene_buffer(device, "Scene Indices", index, 0),
        triangle_ids: create_scene_buffer(device, "Scene Triangle IDs", wgpu::BufferUsages::STORAGE, 0),
        occlusion_positions: create_scene_buffer(device, "Occlusion Positions", vertex, 0),
        occlusion_indices: create_scene_buffer(device, "Occlusion Indices", index, 0),
        occlusion_triangle_ids: create_scene_buffer(device, "Occlusion Triangle IDs", wgpu::BufferUsages::STORAGE, 0),
        render_indirect: create_scene_buffer(
            device,
            "Render Indirect",
            indirect,
            std::mem::size_of::<DrawIndexedCommand>() as u64,
        ),
        occlusion_indirect: create_scene_buffer(
            device,
            "Occlusion Indirect",
            indirect,
            std::mem::size_of::<DrawCommand>() as u64,
        ),
        dispatch_indirect: create_scene_buffer(
            device,
            "Color Dispatch Indirect",
            indirect,
            std::mem::size_of::<DispatchCommand>() as u64,
        ),
        small_atlas: create_atlas_textures(device, &storage.small)?,
        large_atlas: create_atlas_textures(device, &storage.large)?,
        atlas_sampler: device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Scene Atlas Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }),
    })
}

fn add_stats(total: &mut UploadStats, stats: UploadStats) {
    total.buffer_bytes += stats.buffer_bytes;
    total.texture_bytes += stats.texture_bytes;
    total.reallocations += stats.reallocations;
}

/// Upload one frame's culled geometry and draw arguments.
///
/// Atlas planes only go up when `atlas_dirty` is set; they are the largest
/// upload by far.
pub fn upload_frame(
    device: &Device,
    queue: &Queue,
    buffers: &mut SceneBuffers,
    cull: &CullOutput,
    storage: &AtlasStorage,
    atlas_dirty: bool,
) -> SceneResult<UploadStats> {
    let mut total = UploadStats::default();

    let vertices = interleave_vertices(cull);
    add_stats(&mut total, upload_slice(device, queue, &mut buffers.vertices, &vertices));
    add_stats(&mut total, upload_slice(device, queue, &mut buffers.indices, &cull.render.indices));
    add_stats(
        &mut total,
        upload_slice(device, queue, &mut buffers.triangle_ids, &cull.render.triangle_ids),
    );
    add_stats(
        &mut total,
        upload_slice(device, queue, &mut buffers.occlusion_positions, &cull.occlusion.positions),
    );
    add_stats(
        &mut total,
        upload_slice(device, queue, &mut buffers.occlusion_indices, &cull.occlusion.indices),
    );
    add_stats(
        &mut total,
        upload_slice(device, queue, &mut buffers.occlusion_triangle_ids, &cull.occlusion.triangle_ids),
    );
    add_stats(
        &mut total,
        upload_slice(device, queue, &mut buffers.render_indirect, std::slice::from_ref(&cull.render_draw)),
    );
    add_stats(
        &mut total,
        upload_slice(device, queue, &mut buffers.occlusion_indirect, std::slice::from_ref(&cull.occlusion_draw)),
    );
    add_stats(
        &mut total,
        upload_slice(device, queue, &mut buffers.dispatch_indirect, std::slice::from_ref(&cull.color_dispatch)),
    );

    if atlas_dirty {
        add_stats(
            &mut total,
            upload_atlas_planes(device, queue, &mut buffers.small_atlas, &storage.small)?,
        );
        add_stats(
            &mut total,
            upload_atlas_planes(device, queue, &mut buffers.large_atlas, &storage.large)?,
        );
    }

    if total.reallocations > 0 {
        log::info!(
            "[scene_buffers_operations::upload_frame] {} reallocations, {} buffer bytes, {} texture bytes",
            total.reallocations,
            total.buffer_bytes,
            total.texture_bytes
        );
    }
    Ok(total)
}
