use crate::{
    data_structures::{
        instance::{InstanceColorRaw, InstanceRaw},
        model::Vertex,
        texture::Texture,
    },
    resources::mesh::{position_layout, surface_layout},
    shader::{OutputMode, ShaderSignature, VertexFlags},
};

/**
 * Vertex buffer layouts of a variant, in binding slot order:
 *
 * 1. positions
 * 2. the interleaved surface streams (shaded and masked depth variants with optional streams only)
 * 3. instance transforms
 * 4. instance colours (shaded variants with instance colours only)
 */
pub struct VertexLayouts {
    surface: Option<(wgpu::BufferAddress, Vec<wgpu::VertexAttribute>)>,
    instance_colors: bool,
}

impl VertexLayouts {
    pub fn new(signature: &ShaderSignature) -> Self {
        if !signature.output.is_shaded() && !signature.cuts_out_depth() {
            return Self {
                surface: None,
                instance_colors: false,
            };
        }
        Self {
            surface: surface_layout(signature.vertex),
            instance_colors: signature.vertex.contains(VertexFlags::INSTANCE_COLOR),
        }
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn has_instance_colors(&self) -> bool {
        self.instance_colors
    }

    pub fn buffers(&self) -> Vec<wgpu::VertexBufferLayout<'_>> {
        let mut buffers = vec![position_layout()];
        if let Some((stride, attributes)) = &self.surface {
            buffers.push(wgpu::VertexBufferLayout {
                array_stride: *stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            });
        }
        buffers.push(InstanceRaw::desc());
        if self.instance_colors {
            buffers.push(InstanceColorRaw::desc());
        }
        buffers
    }
}

/// Attachment format the fragment stage writes for `output`; `None` for depth only.
pub fn color_format(output: OutputMode) -> Option<wgpu::TextureFormat> {
    match output {
        OutputMode::Color | OutputMode::Flat | OutputMode::Segmentation => Some(Texture::COLOR_FORMAT),
        OutputMode::Pick => Some(Texture::PICK_FORMAT),
        OutputMode::Depth => None,
    }
}

/// Primitive assembly and rasterisation of a variant.
///
/// # Arguments
///
/// * `line_mode` tells whether the device supports line polygon mode; wireframe falls back to fill without it
pub fn primitive_state(signature: &ShaderSignature, line_mode: bool) -> wgpu::PrimitiveState {
    let raster = signature.raster;
    let topology = raster.topology.to_wgpu();
    let polygon_mode = if raster.wireframe && line_mode {
        wgpu::PolygonMode::Line
    } else {
        wgpu::PolygonMode::Fill
    };
    wgpu::PrimitiveState {
        topology,
        // Strips are drawn from a u32 index list without restarts
        strip_index_format: topology.is_strip().then_some(wgpu::IndexFormat::Uint32),
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: raster.cull.then_some(wgpu::Face::Back),
        // Setting this to anything other than Fill requires Features::POLYGON_MODE_LINE
        polygon_mode,
        // Requires Features::DEPTH_CLIP_CONTROL
        unclipped_depth: false,
        // Requires Features::CONSERVATIVE_RASTERIZATION
        conservative: false,
    }
}

fn blend_state(signature: &ShaderSignature) -> Option<wgpu::BlendState> {
    if signature.raster.blend {
        Some(wgpu::BlendState::ALPHA_BLENDING)
    } else if signature.output == OutputMode::Pick {
        // integer targets cannot blend
        None
    } else {
        Some(wgpu::BlendState::REPLACE)
    }
}

/**
 * Creates the render pipeline of a variant.
 *
 * # Arguments
 *
 * * `layout` holds the bind group layouts of the variant
 * * `signature` decides topology, culling, polygon mode, blending and depth writes
 * * `vertex_layouts` must match the vertex inputs generated for `signature`
 * * `shader` is the compiled variant; opaque depth-only variants have no fragment stage
 */
pub fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    signature: &ShaderSignature,
    vertex_layouts: &[wgpu::VertexBufferLayout],
    shader: &wgpu::ShaderModule,
    line_mode: bool,
) -> wgpu::RenderPipeline {
    let targets = [color_format(signature.output).map(|format| wgpu::ColorTargetState {
        format,
        blend: blend_state(signature),
        write_mask: wgpu::ColorWrites::ALL,
    })];
    // masked depth variants run a fragment stage without colour targets
    let target_count = usize::from(targets[0].is_some());
    let fragment = signature.has_fragment_stage().then(|| wgpu::FragmentState {
        module: shader,
        entry_point: Some("fs_main"),
        targets: &targets[..target_count],
        compilation_options: Default::default(),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some(&format!("{:?} Pipeline", signature.output)),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: vertex_layouts,
            compilation_options: Default::default(),
        },
        fragment,
        primitive: primitive_state(signature, line_mode),
        depth_stencil: Some(wgpu::DepthStencilState {
            format: Texture::DEPTH_FORMAT,
            depth_write_enabled: Some(signature.writes_depth()),
            depth_compare: Some(wgpu::CompareFunction::Less),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::RenderConfig,
        data_structures::model::{AlphaMode, Material, Primitive, Topology},
        shader::ShadowCounts,
    };

    fn signature(prim: &Primitive, output: OutputMode) -> ShaderSignature {
        ShaderSignature::for_draw(prim, &RenderConfig::default(), output, ShadowCounts::default())
    }

    fn triangle() -> Primitive {
        Primitive::new(vec![[0.0; 3]; 3], Arc::new(Material::default()))
    }

    #[test]
    fn slots_follow_the_signature() {
        let prim = triangle()
            .with_normals(vec![[0.0, 0.0, 1.0]; 3])
            .with_instance_colors(vec![[1.0; 4]]);
        let shaded = VertexLayouts::new(&signature(&prim, OutputMode::Color));
        let locations: Vec<Vec<u32>> = shaded
            .buffers()
            .iter()
            .map(|b| b.attributes.iter().map(|a| a.shader_location).collect())
            .collect();
        assert_eq!(
            locations,
            vec![vec![0], vec![1], (8..15).collect(), vec![15]]
        );

        let pick = VertexLayouts::new(&signature(&prim, OutputMode::Pick));
        assert_eq!(pick.buffers().len(), 2);
        assert!(!pick.has_surface());
        assert!(!pick.has_instance_colors());
    }

    #[test]
    fn masked_depth_reads_the_surface_stream() {
        let mut material = Material::default();
        material.alpha_mode = AlphaMode::Mask;
        let prim = Primitive::new(vec![[0.0; 3]; 3], Arc::new(material))
            .with_normals(vec![[0.0, 0.0, 1.0]; 3])
            .with_texcoords(vec![[0.0; 2]; 3])
            .with_instance_colors(vec![[1.0; 4]]);
        let depth = VertexLayouts::new(&signature(&prim, OutputMode::Depth));
        assert!(depth.has_surface());
        assert!(!depth.has_instance_colors());
        let locations: Vec<u32> = depth.buffers()[1].attributes.iter().map(|a| a.shader_location).collect();
        assert_eq!(locations, vec![1, 3]);

        // opaque geometry keeps the position-only depth layout
        let opaque = triangle().with_texcoords(vec![[0.0; 2]; 3]);
        assert!(!VertexLayouts::new(&signature(&opaque, OutputMode::Depth)).has_surface());
    }

    #[test]
    fn raster_state_from_signature() {
        let mut material = Material::default();
        material.wireframe = true;
        let prim = Primitive::new(vec![[0.0; 3]; 3], Arc::new(material));
        let sig = signature(&prim, OutputMode::Color);
        assert_eq!(primitive_state(&sig, true).polygon_mode, wgpu::PolygonMode::Line);
        assert_eq!(primitive_state(&sig, false).polygon_mode, wgpu::PolygonMode::Fill);
        assert_eq!(primitive_state(&sig, true).cull_mode, Some(wgpu::Face::Back));

        let strip = triangle().with_mode(Topology::LineStrip);
        let state = primitive_state(&signature(&strip, OutputMode::Color), true);
        assert_eq!(state.topology, wgpu::PrimitiveTopology::LineStrip);
        assert_eq!(state.strip_index_format, Some(wgpu::IndexFormat::Uint32));
        assert_eq!(state.cull_mode, None);
    }

    #[test]
    fn output_formats() {
        assert_eq!(color_format(OutputMode::Depth), None);
        assert_eq!(color_format(OutputMode::Pick), Some(wgpu::TextureFormat::R32Uint));
        assert_eq!(color_format(OutputMode::Flat), Some(wgpu::TextureFormat::Rgba8Unorm));
        let sig = signature(&triangle(), OutputMode::Pick);
        assert_eq!(blend_state(&sig), None);
    }
}
