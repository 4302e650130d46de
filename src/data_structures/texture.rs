//! GPU textures and texture creation utilities.
//!
//! This module provides [`Texture`], a wrapper around wgpu texture resources,
//! and helpers creating the attachments used by the render passes (colour,
//! depth, layered shadow depth and pick ids) as well as sampled material
//! textures uploaded from decoded images.

use crate::data_structures::model::SamplerDesc;

/// A GPU texture with a view and optional sampler.
///
/// Attachments are created with [`create_depth_texture`](Self::create_depth_texture),
/// [`create_color_target`](Self::create_color_target) and friends; material
/// textures come from [`from_image`](Self::from_image).
#[derive(Clone, Debug)]
pub struct Texture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: Option<wgpu::Sampler>,
}

impl Texture {
    /// Standard depth buffer texture format (32-bit float).
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
    /// Colour output format. Shaders write gamma encoded values themselves.
    pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
    /// Pick id output format.
    pub const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

    fn extent(size: [u32; 2], layers: u32) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: size[0].max(1),
            height: size[1].max(1),
            depth_or_array_layers: layers,
        }
    }

    /// Create a depth texture for depth-testing during rendering.
    ///
    /// The texture can be used as a `RENDER_ATTACHMENT`, sampled (shadow maps) and
    /// copied out (depth readback).
    ///
    /// # Arguments
    ///
    /// * `size` is [width, height] of the texture in pixels
    /// * `label` is used as a debug label for the GPU resource
    pub fn create_depth_texture(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: Self::extent(size, 1),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[Self::DEPTH_FORMAT],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            sampler: None,
        }
    }

    /**
     * Create a six layer depth texture for omnidirectional shadows.
     *
     * Returns the texture with a `D2Array` view used for sampling and one `D2`
     * view per layer used as the attachment of the face's shadow pass.
     */
    pub fn create_depth_layers(
        device: &wgpu::Device,
        size: u32,
        label: &str,
    ) -> (Self, Vec<wgpu::TextureView>) {
        const FACES: u32 = 6;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: Self::extent([size, size], FACES),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[Self::DEPTH_FORMAT],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            array_layer_count: Some(FACES),
            ..Default::default()
        });
        let faces = (0..FACES)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(label),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        (
            Self {
                texture,
                view,
                sampler: None,
            },
            faces,
        )
    }

    /// Create a colour attachment that can be copied back to the CPU.
    pub fn create_color_target(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        Self::create_target(device, size, Self::COLOR_FORMAT, label)
    }

    /// Create an id attachment for the picking pass.
    pub fn create_pick_target(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        Self::create_target(device, size, Self::PICK_FORMAT, label)
    }

    fn create_target(
        device: &wgpu::Device,
        size: [u32; 2],
        format: wgpu::TextureFormat,
        label: &str,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: Self::extent(size, 1),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            sampler: None,
        }
    }

    /// Upload a decoded material image.
    ///
    /// # Arguments
    ///
    /// * `img` is the RGBA8 image data
    /// * `sampler` describes wrapping and filtering
    /// * `srgb` toggles between sRGB (colour data) and linear (normals, roughness, occlusion)
    pub fn from_image(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        img: &image::RgbaImage,
        sampler: &SamplerDesc,
        srgb: bool,
        label: Option<&str>,
    ) -> Self {
        let dimensions = img.dimensions();
        let size = Self::extent([dimensions.0, dimensions.1], 1);
        let format = if srgb {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if dimensions.0 > 0 && dimensions.1 > 0 {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                img.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * dimensions.0),
                    rows_per_image: Some(dimensions.1),
                },
                size,
            );
        } else {
            log::warn!("material texture {label:?} is empty, sampling will return zeros");
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = Some(create_sampler(device, sampler));

        Self {
            texture,
            view,
            sampler,
        }
    }
}

pub fn create_sampler(device: &wgpu::Device, desc: &SamplerDesc) -> wgpu::Sampler {
    let filter = |linear: bool| {
        if linear {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        }
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: desc.wrap_s.into(),
        address_mode_v: desc.wrap_t.into(),
        address_mode_w: wgpu::AddressMode::Repeat,
        mag_filter: filter(desc.linear_mag),
        min_filter: filter(desc.linear_min),
        ..Default::default()
    })
}

/// Comparison sampler used for hardware shadow map lookups.
pub fn create_shadow_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("shadow sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        compare: Some(wgpu::CompareFunction::LessEqual),
        ..Default::default()
    })
}
