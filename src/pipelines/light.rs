//! Frame uniforms: camera, lights and shadow lookups.
//!
//! The WGSL side declares arrays sized by the light caps, so the packed light
//! uniform is a byte buffer whose length depends on the caps it was packed for.

use bytemuck::Zeroable;
use cgmath::Matrix4;
use wgpu::util::DeviceExt;

use crate::{
    config::LightCaps,
    data_structures::light::LightType,
    render::{LightEntry, LightSet},
    shader::ShadowCounts,
};

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    // vec4 for the 16 byte uniform alignment
    position: [f32; 4],
}

impl CameraUniform {
    pub fn new(view_proj: Matrix4<f32>, view: Matrix4<f32>, position: cgmath::Vector3<f32>) -> Self {
        Self {
            view_proj: view_proj.into(),
            view: view.into(),
            position: position.extend(1.0).into(),
        }
    }
}

/// One light as read by the `Light` WGSL struct.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightRaw {
    /// `w` is the range, `0` for unlimited.
    position: [f32; 4],
    /// `w` is the intensity.
    direction: [f32; 4],
    color: [f32; 4],
    /// Spot cone `(scale, offset)`.
    cone: [f32; 4],
    /// `x` is the shadow slot within the light kind, `-1` without shadows.
    shadow: [i32; 4],
}

impl LightRaw {
    pub fn new(entry: &LightEntry) -> Self {
        let light = &entry.light;
        let (scale, offset) = light.cone_uniforms();
        let [r, g, b] = light.color;
        Self {
            position: entry.position().extend(light.range().unwrap_or(0.0)).into(),
            direction: entry.direction().extend(light.intensity).into(),
            color: [r, g, b, 1.0],
            cone: [scale, offset, 0.0, 0.0],
            shadow: [entry.shadow.map_or(-1, i32::from), 0, 0, 0],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct LightsHeader {
    /// `w` carries the shadow depth bias.
    ambient: [f32; 4],
    counts: [u32; 4],
}

/**
 * Packs the light uniform for the array sizes of `caps`.
 *
 * Each kind occupies `max(cap, 1)` slots; lights past a cap are dropped and
 * unused slots are zeroed. The counts tell the shader how many slots are live.
 */
pub fn pack_lights(lights: &LightSet, caps: &LightCaps, ambient: [f32; 3], shadow_bias: f32) -> Vec<u8> {
    let kinds = [LightType::Directional, LightType::Spot, LightType::Point];
    let counts = kinds.map(|ty| lights.get(ty).len().min(caps.get(ty)) as u32);
    let [ar, ag, ab] = ambient;
    let header = LightsHeader {
        ambient: [ar, ag, ab, shadow_bias],
        counts: [counts[0], counts[1], counts[2], 0],
    };

    let mut out = bytemuck::bytes_of(&header).to_vec();
    for ty in kinds {
        let slots = caps.get(ty).max(1);
        let mut raw: Vec<LightRaw> = lights.get(ty).iter().take(caps.get(ty)).map(LightRaw::new).collect();
        raw.resize(slots, LightRaw::zeroed());
        out.extend_from_slice(bytemuck::cast_slice(&raw));
    }
    out
}

pub fn mk_buffer(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout of the frame group: the camera, plus the lights for lit variants.
pub fn mk_frame_layout(device: &wgpu::Device, lit: bool) -> wgpu::BindGroupLayout {
    let mut entries = vec![uniform_entry(
        0,
        wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
    )];
    if lit {
        entries.push(uniform_entry(1, wgpu::ShaderStages::FRAGMENT));
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &entries,
        label: Some("frame_bind_group_layout"),
    })
}

pub fn mk_frame_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    camera: &wgpu::Buffer,
    lights: Option<&wgpu::Buffer>,
) -> wgpu::BindGroup {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: camera.as_entire_binding(),
    }];
    if let Some(lights) = lights {
        entries.push(wgpu::BindGroupEntry {
            binding: 1,
            resource: lights.as_entire_binding(),
        });
    }
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &entries,
        label: Some("frame_bind_group"),
    })
}

/**
 * Layout of the shadow group.
 *
 * Binding 0 is the comparison sampler, binding 1 the light-space matrices.
 * Depth maps follow from binding 2: directional, then spot, then the layered
 * point maps.
 */
pub fn mk_shadow_layout(device: &wgpu::Device, counts: &ShadowCounts) -> wgpu::BindGroupLayout {
    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
            count: None,
        },
        uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
    ];
    let planar = counts.directional as usize + counts.spot as usize;
    let maps = (0..planar)
        .map(|_| wgpu::TextureViewDimension::D2)
        .chain((0..counts.point).map(|_| wgpu::TextureViewDimension::D2Array));
    for (i, view_dimension) in maps.enumerate() {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 + i as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension,
                sample_type: wgpu::TextureSampleType::Depth,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &entries,
        label: Some("shadow_bind_group_layout"),
    })
}

/// Binds the shadow sampler, matrices and maps; `maps` must follow the layout order.
pub fn mk_shadow_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    matrices: &wgpu::Buffer,
    maps: &[&wgpu::TextureView],
) -> wgpu::BindGroup {
    let mut entries = vec![
        wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Sampler(sampler),
        },
        wgpu::BindGroupEntry {
            binding: 1,
            resource: matrices.as_entire_binding(),
        },
    ];
    for (i, view) in maps.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: 2 + i as u32,
            resource: wgpu::BindingResource::TextureView(view),
        });
    }
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &entries,
        label: Some("shadow_bind_group"),
    })
}
