//! GPU compilation of shader variants.

use crate::{
    error::ShaderCompileError,
    pipelines::{basic, light, pick},
    resources::texture::material_layout,
    shader::{OutputMode, ProgramCompiler, ShaderSignature, compose, validate},
};

/// A compiled variant: module, bind group layouts and pipeline.
#[derive(Debug)]
pub struct Program {
    pub signature: ShaderSignature,
    pub module: wgpu::ShaderModule,
    /// Group 0: camera, plus lights for lit variants.
    pub frame_layout: wgpu::BindGroupLayout,
    /// Group 1: the material for shaded and masked depth variants, the draw uniform for pick and segmentation.
    pub draw_layout: Option<wgpu::BindGroupLayout>,
    /// Group 2: shadow sampler, matrices and maps.
    pub shadow_layout: Option<wgpu::BindGroupLayout>,
    pub pipeline: wgpu::RenderPipeline,
    /// Whether slot 1 takes the interleaved surface stream.
    pub has_surface: bool,
    pub has_instance_colors: bool,
}

/**
 * Compiles variants on the device.
 *
 * The WGSL is parsed and validated with naga before wgpu sees it, so broken
 * variants surface as [`ShaderCompileError`] naming the offending fragment
 * instead of a device error.
 */
pub struct WgpuCompiler {
    device: wgpu::Device,
    line_mode: bool,
}

impl WgpuCompiler {
    pub fn new(device: wgpu::Device) -> Self {
        let line_mode = device.features().contains(wgpu::Features::POLYGON_MODE_LINE);
        if !line_mode {
            log::warn!("device lacks POLYGON_MODE_LINE, wireframe materials are drawn filled");
        }
        Self { device, line_mode }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }
}

impl ProgramCompiler for WgpuCompiler {
    type Program = Program;

    fn compile(&mut self, signature: &ShaderSignature) -> Result<Program, ShaderCompileError> {
        let composed = compose(signature);
        validate(&composed)?;

        let device = &self.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{:?} Shader", signature.output)),
            source: wgpu::ShaderSource::Wgsl(composed.source.into()),
        });

        let frame_layout = light::mk_frame_layout(device, signature.output == OutputMode::Color);
        let draw_layout = match signature.output {
            OutputMode::Color | OutputMode::Flat => Some(material_layout(device, signature.textures)),
            OutputMode::Pick | OutputMode::Segmentation => Some(pick::mk_draw_layout(device)),
            OutputMode::Depth if signature.cuts_out_depth() => {
                Some(material_layout(device, signature.textures))
            }
            OutputMode::Depth => None,
        };
        let shadow_layout = (!signature.shadows.is_empty())
            .then(|| light::mk_shadow_layout(device, &signature.shadows));

        let mut bind_group_layouts = vec![Some(&frame_layout)];
        if let Some(layout) = &draw_layout {
            bind_group_layouts.push(Some(layout));
        }
        if let Some(layout) = &shadow_layout {
            bind_group_layouts.push(Some(layout));
        }
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Variant Pipeline Layout"),
            bind_group_layouts: &bind_group_layouts,
            immediate_size: 0,
        });

        let vertex_layouts = basic::VertexLayouts::new(signature);
        let pipeline = basic::mk_render_pipeline(
            device,
            &layout,
            signature,
            &vertex_layouts.buffers(),
            &module,
            self.line_mode,
        );

        Ok(Program {
            signature: *signature,
            module,
            frame_layout,
            draw_layout,
            shadow_layout,
            pipeline,
            has_surface: vertex_layouts.has_surface(),
            has_instance_colors: vertex_layouts.has_instance_colors(),
        })
    }
}
