use std::{collections::HashMap, sync::Arc};

use wgpu::util::DeviceExt;

use crate::{
    data_structures::{
        model::{Material, MaterialModel, MaterialTexture, TextureId},
        texture::Texture,
    },
    shader::{TextureFlags, source::texture_slots},
};

/**
 * Scalar material factors as laid out by the `MaterialUniform` WGSL struct.
 *
 * `emissive.w` carries the alpha cutoff, `params` packs metallic, roughness
 * and glossiness.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    base_color: [f32; 4],
    emissive: [f32; 4],
    params: [f32; 4],
    specular: [f32; 4],
}

impl MaterialUniform {
    pub fn new(material: &Material) -> Self {
        let [er, eg, eb] = material.emissive_factor;
        let emissive = [er, eg, eb, material.alpha_cutoff];
        match &material.model {
            MaterialModel::MetallicRoughness {
                base_color_factor,
                metallic_factor,
                roughness_factor,
                ..
            } => Self {
                base_color: *base_color_factor,
                emissive,
                params: [*metallic_factor, *roughness_factor, 0.0, 0.0],
                specular: [0.0; 4],
            },
            MaterialModel::SpecularGlossiness {
                diffuse_factor,
                specular_factor,
                glossiness_factor,
                ..
            } => {
                let [sr, sg, sb] = *specular_factor;
                Self {
                    base_color: *diffuse_factor,
                    emissive,
                    params: [0.0, 0.0, *glossiness_factor, 0.0],
                    specular: [sr, sg, sb, 0.0],
                }
            }
        }
    }
}

/// The texture a material provides for `slot`.
pub fn material_texture(material: &Material, slot: TextureFlags) -> Option<&Arc<MaterialTexture>> {
    let (base, detail) = match &material.model {
        MaterialModel::MetallicRoughness {
            base_color_texture,
            metallic_roughness_texture,
            ..
        } => (
            (TextureFlags::BASE_COLOR, base_color_texture),
            (TextureFlags::METALLIC_ROUGHNESS, metallic_roughness_texture),
        ),
        MaterialModel::SpecularGlossiness {
            diffuse_texture,
            specular_glossiness_texture,
            ..
        } => (
            (TextureFlags::DIFFUSE, diffuse_texture),
            (TextureFlags::SPECULAR_GLOSSINESS, specular_glossiness_texture),
        ),
    };
    [
        base,
        detail,
        (TextureFlags::NORMAL, &material.normal_texture),
        (TextureFlags::OCCLUSION, &material.occlusion_texture),
        (TextureFlags::EMISSIVE, &material.emissive_texture),
    ]
    .into_iter()
    .find(|(flag, _)| *flag == slot)
    .and_then(|(_, texture)| texture.as_ref())
}

/// Layout of the material group: the factor uniform followed by a texture and sampler per slot.
pub fn material_layout(device: &wgpu::Device, textures: TextureFlags) -> wgpu::BindGroupLayout {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for (k, _) in texture_slots(textures).enumerate() {
        let binding = 1 + 2 * k as u32;
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: binding + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &entries,
        label: Some("material_bind_group_layout"),
    })
}

/// Uploaded material textures, keyed by texture identity and colour space.
///
/// The same image may be sampled as colour data by one slot and as linear data
/// by another, so both variants can coexist.
#[derive(Debug, Default)]
pub struct TextureCache {
    textures: HashMap<(TextureId, bool), Texture>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &MaterialTexture,
        srgb: bool,
    ) -> &Texture {
        self.textures.entry((texture.id(), srgb)).or_insert_with(|| {
            log::debug!("uploading material texture {:?} (srgb: {srgb})", texture.id());
            Texture::from_image(
                device,
                queue,
                &texture.image,
                &texture.sampler,
                srgb,
                Some(&format!("{:?}", texture.id())),
            )
        })
    }

    /// Drops uploads whose texture is no longer referenced.
    pub fn retain(&mut self, mut keep: impl FnMut(TextureId) -> bool) {
        self.textures.retain(|(id, _), _| keep(*id));
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn clear(&mut self) {
        self.textures.clear();
    }
}

/**
 * Creates the material group of a draw.
 *
 * # Arguments
 *
 * * `layout` is the program's material layout, created for the same `textures`
 * * `textures` are the slots the program samples; every slot must be provided by `material`
 * * `cache` uploads each texture on first use
 */
pub fn material_bind_group(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    material: &Material,
    textures: TextureFlags,
    cache: &mut TextureCache,
) -> wgpu::BindGroup {
    let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Material Buffer"),
        contents: bytemuck::cast_slice(&[MaterialUniform::new(material)]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    });

    let mut bound: Vec<(wgpu::TextureView, wgpu::Sampler)> = Vec::new();
    for (slot, name, srgb) in texture_slots(textures) {
        let texture = material_texture(material, slot).map(|t| cache.get_or_upload(device, queue, t, srgb));
        match texture {
            Some(Texture {
                view,
                sampler: Some(sampler),
                ..
            }) => bound.push((view.clone(), sampler.clone())),
            _ => {
                // The signature only lists slots the material fills, so this is a mismatch upstream.
                log::warn!("material lacks its {name} texture, binding a blank one");
                let blank = Texture::from_image(
                    device,
                    queue,
                    &image::RgbaImage::from_pixel(1, 1, image::Rgba([255; 4])),
                    &Default::default(),
                    srgb,
                    Some("blank texture"),
                );
                let sampler = blank
                    .sampler
                    .clone()
                    .unwrap_or_else(|| crate::data_structures::texture::create_sampler(device, &Default::default()));
                bound.push((blank.view, sampler));
            }
        }
    }

    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: uniform.as_entire_binding(),
    }];
    for (k, (view, sampler)) in bound.iter().enumerate() {
        let binding = 1 + 2 * k as u32;
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: binding + 1,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
    }
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &entries,
        label: material.name.as_deref(),
    })
}
