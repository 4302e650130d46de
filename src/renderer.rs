//! Frame execution.
//!
//! The [`Renderer`] owns every GPU side cache: compiled shader variants,
//! managed render targets and uploaded meshes and textures. A frame goes
//! through these steps:
//! 1. Snapshot the scene into a [`RenderQueue`]; a shared scene is locked only for this step
//! 2. Render one depth map per shadow casting light (colour output only)
//! 3. Render the main pass of the requested output, or the picking pass
//! 4. Submit, read the targets back and decode them into a [`RenderOutput`]
//!
//! Progress is tracked by a [`FrameState`] machine. Any failure returns it to
//! [`FrameState::Idle`], so the next frame starts cleanly.

use std::{collections::HashMap, sync::Arc};

use wgpu::util::DeviceExt;

use crate::{
    config::{RenderConfig, RenderFlags},
    context::Context,
    data_structures::{
        camera::view_matrix,
        instance::{InstanceColorRaw, InstanceRaw},
        light::LightType,
        model::PrimitiveId,
        scene_graph::{NodeHandle, Scene, SharedScene},
        texture::create_shadow_sampler,
    },
    error::RenderError,
    pass::{self, Pass},
    pick::{DepthImage, NodeIdBuffer, Readback, color_image},
    pipelines::{
        compiler::{Program, WgpuCompiler},
        light::{self, CameraUniform},
        pick::DrawUniform,
    },
    render::{DrawItem, LightSet, RenderQueue},
    resources::{GpuResources, pick::draw_bind_group, texture::material_bind_group},
    shader::{OutputMode, ShaderCache, ShaderSignature, ShadowCounts},
    targets::{GpuTarget, GpuTargetAllocator, ManagedTarget, RenderTargetManager, TargetId, TargetKind},
};

/// Progress of the frame in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    FrameBegun,
    ShadowPasses,
    ColorPass,
    PickingPass,
    FrameEnded,
}

impl FrameState {
    /// Whether a frame may move from `self` to `to`.
    pub fn can_transition(self, to: FrameState) -> bool {
        use FrameState::*;
        matches!(
            (self, to),
            (Idle, FrameBegun)
                | (FrameBegun, ShadowPasses | ColorPass | PickingPass)
                | (ShadowPasses, ShadowPasses | ColorPass)
                | (ColorPass, PickingPass | FrameEnded)
                | (PickingPass, FrameEnded)
                | (FrameEnded, Idle)
        )
    }
}

/// Enforces the legal order of frame steps.
#[derive(Debug, Default)]
pub struct FrameMachine {
    state: FrameState,
}

impl FrameMachine {
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Moves to `to`. An illegal step fails and leaves the machine idle.
    pub fn advance(&mut self, to: FrameState) -> Result<(), RenderError> {
        if !self.state.can_transition(to) {
            let from = self.state;
            self.reset();
            return Err(RenderError::InvalidState { from, to });
        }
        log::trace!("frame state {:?} -> {to:?}", self.state);
        self.state = to;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.state = FrameState::Idle;
    }
}

/// What a frame produces.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderMode {
    /// Shaded colour. Honors the `FLAT`, `RGBA` and `DEPTH` render flags.
    Color,
    /// Linear depth only.
    Depth,
    /// Node ids for picking.
    Pick,
    /// Flat colour per listed node on a black background; unlisted nodes are skipped.
    Segmentation(HashMap<NodeHandle, [u8; 3]>),
}

impl RenderMode {
    /// The shader output the main pass of this mode runs with.
    pub fn output(&self, flags: RenderFlags) -> OutputMode {
        match self {
            RenderMode::Color if flags.contains(RenderFlags::FLAT) => OutputMode::Flat,
            RenderMode::Color => OutputMode::Color,
            RenderMode::Depth => OutputMode::Depth,
            RenderMode::Pick => OutputMode::Pick,
            RenderMode::Segmentation(_) => OutputMode::Segmentation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutput {
    Color(image::DynamicImage),
    ColorDepth(image::DynamicImage, DepthImage),
    Depth(DepthImage),
    NodeIds(NodeIdBuffer),
    Segmentation(image::DynamicImage),
}

/// Builds the frame snapshot of a shared scene, holding its lock only while copying.
pub fn snapshot(scene: &SharedScene, viewport: (u32, u32), output: OutputMode, config: &RenderConfig) -> RenderQueue {
    let scene = scene.lock();
    RenderQueue::build(&scene, viewport, output, config)
}

/// Per-instance buffers of one draw item, shared by every pass of a frame.
struct ItemBuffers {
    primitive: PrimitiveId,
    instances: wgpu::Buffer,
    instance_colors: Option<wgpu::Buffer>,
    count: u32,
}

/// A draw with its program and bind groups resolved for one pass.
struct PreparedDraw {
    item: usize,
    program: Arc<Program>,
    frame_group: wgpu::BindGroup,
    draw_group: Option<wgpu::BindGroup>,
    shadow_group: Option<wgpu::BindGroup>,
}

/// Uniforms shared by all draws of a pass.
struct PassUniforms<'a> {
    camera: &'a wgpu::Buffer,
    lights: Option<&'a wgpu::Buffer>,
    shadow_matrices: Option<&'a wgpu::Buffer>,
}

struct Readbacks {
    color: Option<Readback>,
    depth: Option<Readback>,
}

pub struct Renderer {
    context: Context,
    config: RenderConfig,
    shaders: ShaderCache<WgpuCompiler>,
    targets: RenderTargetManager<GpuTargetAllocator>,
    /// Target reused by the main pass of each target kind.
    main_targets: HashMap<TargetKind, TargetId>,
    resources: GpuResources,
    shadow_sampler: wgpu::Sampler,
    frame: FrameMachine,
    torn_down: bool,
}

impl Renderer {
    pub fn new(context: Context, config: RenderConfig) -> Self {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        }
        let device = context.device.clone();
        Self {
            shaders: ShaderCache::new(WgpuCompiler::new(device.clone())),
            targets: RenderTargetManager::new(GpuTargetAllocator::new(device.clone())),
            main_targets: HashMap::new(),
            resources: GpuResources::new(),
            shadow_sampler: create_shadow_sampler(&device),
            frame: FrameMachine::default(),
            torn_down: false,
            context,
            config,
        }
    }

    /// Creates a renderer on a fresh device without a surface.
    pub fn headless(config: RenderConfig) -> anyhow::Result<Self> {
        Ok(Self::new(Context::headless()?, config))
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Replaces the config. Compiled variants are dropped when the light caps change.
    pub fn set_config(&mut self, config: RenderConfig) {
        if config.max_lights != self.config.max_lights {
            log::debug!("light caps changed, dropping {} shader variants", self.shaders.len());
            self.shaders.clear();
        }
        self.config = config;
    }

    pub fn state(&self) -> FrameState {
        self.frame.state()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    /// Render targets currently allocated, shadow maps included.
    pub fn live_targets(&self) -> usize {
        self.targets.live_count()
    }

    /// Frees every target and cached upload. Later frames fail with [`RenderError::TornDown`].
    pub fn teardown(&mut self) {
        self.targets.release_all();
        self.main_targets.clear();
        self.shaders.clear();
        self.resources.clear();
        self.frame.reset();
        self.torn_down = true;
        log::info!("renderer torn down");
    }

    /**
     * Renders one frame of `scene`.
     *
     * # Arguments
     *
     * * `scene` is read while building the frame snapshot only
     * * `viewport` is the output size in pixels; zero sizes fail with a target allocation error
     * * `mode` selects the output
     */
    pub fn render(&mut self, scene: &Scene, viewport: (u32, u32), mode: RenderMode) -> Result<RenderOutput, RenderError> {
        self.check_alive()?;
        let queue = RenderQueue::build(scene, viewport, mode.output(self.config.flags), &self.config);
        self.render_queue(&queue, &mode)
    }

    /// Like [`Renderer::render`], releasing the scene lock before any GPU work starts.
    pub fn render_shared(
        &mut self,
        scene: &SharedScene,
        viewport: (u32, u32),
        mode: RenderMode,
    ) -> Result<RenderOutput, RenderError> {
        self.check_alive()?;
        let queue = snapshot(scene, viewport, mode.output(self.config.flags), &self.config);
        self.render_queue(&queue, &mode)
    }

    fn check_alive(&self) -> Result<(), RenderError> {
        if self.torn_down {
            return Err(RenderError::TornDown);
        }
        Ok(())
    }

    /// Executes a prepared snapshot.
    pub fn render_queue(&mut self, queue: &RenderQueue, mode: &RenderMode) -> Result<RenderOutput, RenderError> {
        self.check_alive()?;
        let result = self.execute(queue, mode);
        match result {
            Ok(output) => {
                self.frame.advance(FrameState::FrameEnded)?;
                self.frame.advance(FrameState::Idle)?;
                Ok(output)
            }
            Err(e) => {
                log::error!("frame aborted: {e}");
                self.frame.reset();
                Err(e)
            }
        }
    }

    fn execute(&mut self, queue: &RenderQueue, mode: &RenderMode) -> Result<RenderOutput, RenderError> {
        self.frame.advance(FrameState::FrameBegun)?;
        self.targets.begin_frame();
        let device = self.context.device.clone();

        if queue.output == OutputMode::Color {
            let lights = &queue.lights;
            self.targets
                .retain_shadows(|node, ty| lights.shadowed().any(|e| e.node == node && e.light.ty() == ty));
        }

        let items = self.upload_items(queue);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });

        let mut readbacks = None;
        for step in pass::plan(queue) {
            match step {
                Pass::Shadow { light, ty } => {
                    self.frame.advance(FrameState::ShadowPasses)?;
                    self.shadow_pass(&mut encoder, queue, &items, light, ty)?;
                }
                Pass::Main(output) => {
                    self.frame.advance(FrameState::ColorPass)?;
                    readbacks = Some(self.main_pass(&mut encoder, queue, &items, output, mode)?);
                }
                Pass::Pick => {
                    self.frame.advance(FrameState::PickingPass)?;
                    readbacks = Some(self.main_pass(&mut encoder, queue, &items, OutputMode::Pick, mode)?);
                }
            }
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let readbacks = readbacks.ok_or_else(|| RenderError::Device("frame recorded no output pass".into()))?;
        let output = decode(&device, queue, mode, self.config.flags, readbacks)?;
        self.resources.retain(queue.items.iter().map(|item| &*item.primitive));
        Ok(output)
    }

    fn upload_items(&mut self, queue: &RenderQueue) -> Vec<ItemBuffers> {
        let device = &self.context.device;
        queue
            .items
            .iter()
            .map(|item| {
                self.resources.mesh(device, &item.primitive);
                let raw: Vec<InstanceRaw> = item.instances.iter().map(InstanceRaw::from_matrix).collect();
                let instances = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Instance Buffer"),
                    contents: bytemuck::cast_slice(&raw),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let instance_colors = item.instance_colors.as_ref().map(|colors| {
                    let raw: Vec<InstanceColorRaw> =
                        colors.iter().map(|color| InstanceColorRaw { color: *color }).collect();
                    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Instance Colour Buffer"),
                        contents: bytemuck::cast_slice(&raw),
                        usage: wgpu::BufferUsages::VERTEX,
                    })
                });
                ItemBuffers {
                    primitive: item.primitive.id(),
                    instances,
                    instance_colors,
                    count: item.instances.len() as u32,
                }
            })
            .collect()
    }

    /**
     * Resolves programs and bind groups of the items drawn by a pass.
     *
     * # Arguments
     *
     * * `output` is the variant to draw with; items are re-keyed when it differs from the queue's output
     * * `include` filters the items of the queue
     * * `segmentation` provides the per-node colours of a segmentation pass
     */
    fn prepare_draws(
        &mut self,
        queue: &RenderQueue,
        output: OutputMode,
        uniforms: &PassUniforms<'_>,
        include: impl Fn(&DrawItem) -> bool,
        segmentation: Option<&HashMap<NodeHandle, [u8; 3]>>,
    ) -> Result<Vec<PreparedDraw>, RenderError> {
        let Self {
            context,
            config,
            shaders,
            targets,
            resources,
            shadow_sampler,
            ..
        } = self;
        let device = &context.device;
        let views = match uniforms.shadow_matrices {
            Some(_) => shadow_views(targets, &queue.lights)?,
            None => Vec::new(),
        };

        let mut draws = Vec::new();
        for (index, item) in queue.items.iter().enumerate() {
            if !include(item) {
                continue;
            }
            let color = match segmentation {
                Some(colors) => match colors.get(&item.node) {
                    Some(color) => *color,
                    None => continue,
                },
                None => [0; 3],
            };
            let signature = if output == queue.output {
                item.signature
            } else {
                ShaderSignature::for_draw(&item.primitive, config, output, ShadowCounts::default())
            };
            let program = shaders.get_or_compile(&signature)?;

            let frame_group =
                light::mk_frame_bind_group(device, &program.frame_layout, uniforms.camera, uniforms.lights);
            let draw_group = program.draw_layout.as_ref().map(|layout| match output {
                OutputMode::Pick => draw_bind_group(device, layout, DrawUniform::pick(item.pick_id)),
                OutputMode::Segmentation => draw_bind_group(device, layout, DrawUniform::segmentation(color)),
                _ => material_bind_group(
                    device,
                    &context.queue,
                    layout,
                    &item.primitive.material,
                    signature.textures,
                    &mut resources.textures,
                ),
            });
            let shadow_group = match (&program.shadow_layout, uniforms.shadow_matrices) {
                (Some(layout), Some(matrices)) => Some(light::mk_shadow_bind_group(
                    device,
                    layout,
                    shadow_sampler,
                    matrices,
                    &views,
                )),
                (Some(_), None) => {
                    return Err(RenderError::Device(format!(
                        "variant {signature:?} samples shadow maps that were not rendered"
                    )));
                }
                (None, _) => None,
            };
            draws.push(PreparedDraw {
                item: index,
                program,
                frame_group,
                draw_group,
                shadow_group,
            });
        }
        Ok(draws)
    }

    /// Renders the depth map of one light, six faces for point lights.
    fn shadow_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &RenderQueue,
        items: &[ItemBuffers],
        light: NodeHandle,
        ty: LightType,
    ) -> Result<(), RenderError> {
        let Some(entry) = queue.lights.get(ty).iter().find(|e| e.node == light) else {
            log::warn!("shadow pass for unknown light {light:?}");
            return Ok(());
        };
        let device = self.context.device.clone();
        let id = self.targets.acquire_shadow(light, ty, self.config.shadow_map_size)?;

        for (face, shadow_camera) in pass::shadow_cameras(entry, queue.scene_centroid, queue.scene_scale)
            .iter()
            .enumerate()
        {
            let uniform = CameraUniform::new(
                shadow_camera.view_proj(),
                view_matrix(&shadow_camera.pose),
                shadow_camera.pose.w.truncate(),
            );
            let camera = light::mk_buffer(&device, "Shadow Camera Buffer", bytemuck::cast_slice(&[uniform]));
            let uniforms = PassUniforms {
                camera: &camera,
                lights: None,
                shadow_matrices: None,
            };
            let draws = self.prepare_draws(queue, OutputMode::Depth, &uniforms, |item| !item.blend, None)?;

            let target = managed(&self.targets, id)?;
            let view = match ty {
                LightType::Point => target
                    .target
                    .faces
                    .get(face)
                    .ok_or_else(|| RenderError::Device(format!("cube target lacks face {face}")))?,
                LightType::Directional | LightType::Spot => &target.target.depth.view,
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });
            record_draws(&mut render_pass, &draws, items, &self.resources);
        }
        Ok(())
    }

    /// Returns the main target of `kind`, resized to the viewport.
    fn main_target(&mut self, kind: TargetKind, width: u32, height: u32) -> Result<TargetId, RenderError> {
        if let Some(&id) = self.main_targets.get(&kind) {
            match self.targets.resize(id, width, height) {
                Ok(()) => return Ok(id),
                Err(RenderError::UnknownTarget(_)) => {
                    self.main_targets.remove(&kind);
                }
                Err(e) => return Err(e),
            }
        }
        let id = self.targets.acquire(kind, width, height)?;
        self.main_targets.insert(kind, id);
        Ok(id)
    }

    /// Records the output pass and the copies of its results.
    fn main_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &RenderQueue,
        items: &[ItemBuffers],
        output: OutputMode,
        mode: &RenderMode,
    ) -> Result<Readbacks, RenderError> {
        let device = self.context.device.clone();
        let (width, height) = queue.viewport;
        let kind = match output {
            OutputMode::Depth => TargetKind::DepthOnly,
            OutputMode::Pick => TargetKind::Pick,
            OutputMode::Color | OutputMode::Flat | OutputMode::Segmentation => TargetKind::ColorDepth,
        };
        let id = self.main_target(kind, width, height)?;

        let camera = CameraUniform::new(queue.camera.view_proj, queue.camera.view, queue.camera.position());
        let camera = light::mk_buffer(&device, "Camera Buffer", bytemuck::cast_slice(&[camera]));
        let lit = output == OutputMode::Color;
        let lights = lit.then(|| {
            let packed = light::pack_lights(
                &queue.lights,
                &self.config.max_lights,
                queue.ambient_light,
                self.config.shadow_bias,
            );
            light::mk_buffer(&device, "Lights Buffer", &packed)
        });
        let shadow_matrices = (lit && !queue.lights.shadow_counts().is_empty()).then(|| {
            let raw: Vec<[[f32; 4]; 4]> =
                pass::frame_shadow_matrices(&queue.lights, queue.scene_centroid, queue.scene_scale)
                    .into_iter()
                    .map(Into::into)
                    .collect();
            light::mk_buffer(&device, "Shadow Matrices Buffer", bytemuck::cast_slice(&raw))
        });
        let uniforms = PassUniforms {
            camera: &camera,
            lights: lights.as_ref(),
            shadow_matrices: shadow_matrices.as_ref(),
        };
        let segmentation = match mode {
            RenderMode::Segmentation(colors) => Some(colors),
            _ => None,
        };
        let draws = self.prepare_draws(queue, output, &uniforms, |_| true, segmentation)?;

        let target = &managed(&self.targets, id)?.target;
        let clear = clear_color(output, queue.bg_color, self.config.flags);
        {
            let color_attachment = target.color.as_ref().map(|color| wgpu::RenderPassColorAttachment {
                view: &color.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            });
            let attachments = [color_attachment];
            let color_attachments: &[Option<wgpu::RenderPassColorAttachment<'_>>] =
                if target.color.is_some() { &attachments } else { &[] };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(match output {
                    OutputMode::Pick => "Picking Pass",
                    _ => "Main Pass",
                }),
                color_attachments,
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });
            record_draws(&mut render_pass, &draws, items, &self.resources);
        }

        let wants_depth = match mode {
            RenderMode::Depth => true,
            RenderMode::Color => self.config.flags.contains(RenderFlags::DEPTH),
            RenderMode::Pick | RenderMode::Segmentation(_) => false,
        };
        let color = target
            .color
            .as_ref()
            .map(|color| Readback::record(&device, encoder, &color.texture, wgpu::TextureAspect::All, (width, height), 4));
        let depth = wants_depth.then(|| {
            Readback::record(
                &device,
                encoder,
                &target.depth.texture,
                wgpu::TextureAspect::DepthOnly,
                (width, height),
                4,
            )
        });
        Ok(Readbacks { color, depth })
    }
}

fn managed(
    targets: &RenderTargetManager<GpuTargetAllocator>,
    id: TargetId,
) -> Result<&ManagedTarget<GpuTarget>, RenderError> {
    targets.get(id).ok_or(RenderError::UnknownTarget(id))
}

/// Shadow map views in the binding order of the shadow group.
fn shadow_views<'a>(
    targets: &'a RenderTargetManager<GpuTargetAllocator>,
    lights: &LightSet,
) -> Result<Vec<&'a wgpu::TextureView>, RenderError> {
    let mut views = Vec::new();
    for ty in [LightType::Directional, LightType::Spot, LightType::Point] {
        let mut shadowed: Vec<_> = lights.get(ty).iter().filter(|e| e.shadow.is_some()).collect();
        shadowed.sort_by_key(|e| e.shadow);
        for entry in shadowed {
            let id = targets
                .shadow_target(entry.node, ty)
                .ok_or_else(|| RenderError::Device(format!("no shadow map rendered for {:?}", entry.node)))?;
            views.push(&managed(targets, id)?.target.depth.view);
        }
    }
    Ok(views)
}

fn clear_color(output: OutputMode, bg_color: [f32; 4], flags: RenderFlags) -> wgpu::Color {
    match output {
        OutputMode::Color | OutputMode::Flat => wgpu::Color {
            r: bg_color[0] as f64,
            g: bg_color[1] as f64,
            b: bg_color[2] as f64,
            a: if flags.contains(RenderFlags::RGBA) {
                0.0
            } else {
                bg_color[3] as f64
            },
        },
        OutputMode::Segmentation => wgpu::Color::BLACK,
        OutputMode::Depth | OutputMode::Pick => wgpu::Color::TRANSPARENT,
    }
}

fn record_draws(
    render_pass: &mut wgpu::RenderPass<'_>,
    draws: &[PreparedDraw],
    items: &[ItemBuffers],
    resources: &GpuResources,
) {
    for draw in draws {
        let Some(buffers) = items.get(draw.item) else {
            continue;
        };
        let Some(mesh) = resources.get_mesh(buffers.primitive) else {
            log::warn!("primitive {:?} was not uploaded", buffers.primitive);
            continue;
        };
        if mesh.num_elements == 0 || buffers.count == 0 {
            continue;
        }
        let surface = match (&mesh.surface, draw.program.has_surface) {
            (Some(surface), true) => Some(surface),
            (None, true) => {
                log::warn!("primitive {:?} lacks the vertex streams of its variant", buffers.primitive);
                continue;
            }
            (_, false) => None,
        };

        render_pass.set_pipeline(&draw.program.pipeline);
        render_pass.set_bind_group(0, &draw.frame_group, &[]);
        let mut group = 1;
        if let Some(draw_group) = &draw.draw_group {
            render_pass.set_bind_group(group, draw_group, &[]);
            group += 1;
        }
        if let Some(shadow_group) = &draw.shadow_group {
            render_pass.set_bind_group(group, shadow_group, &[]);
        }

        let mut slot = 0;
        render_pass.set_vertex_buffer(slot, mesh.positions.slice(..));
        slot += 1;
        if let Some(surface) = surface {
            render_pass.set_vertex_buffer(slot, surface.slice(..));
            slot += 1;
        }
        render_pass.set_vertex_buffer(slot, buffers.instances.slice(..));
        slot += 1;
        if draw.program.has_instance_colors {
            let Some(colors) = &buffers.instance_colors else {
                log::warn!("primitive {:?} lacks instance colours", buffers.primitive);
                continue;
            };
            render_pass.set_vertex_buffer(slot, colors.slice(..));
        }
        render_pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed(0..mesh.num_elements, 0, 0..buffers.count);
    }
}

/// Maps the read back targets and decodes them into the output of `mode`.
fn decode(
    device: &wgpu::Device,
    queue: &RenderQueue,
    mode: &RenderMode,
    flags: RenderFlags,
    readbacks: Readbacks,
) -> Result<RenderOutput, RenderError> {
    let (width, height) = queue.viewport;
    let missing = |what: &str| RenderError::Readback(format!("frame produced no {what} buffer"));
    let depth = |readback: Option<Readback>| -> Result<DepthImage, RenderError> {
        let bytes = readback.ok_or_else(|| missing("depth"))?.read(device)?;
        Ok(if flags.contains(RenderFlags::RAW_DEPTH) {
            DepthImage::from_stored_bytes(width, height, &bytes)
        } else {
            DepthImage::from_bytes(width, height, &bytes, &queue.camera.camera)
        })
    };
    let color = readbacks.color;
    Ok(match mode {
        RenderMode::Color => {
            let rgba = color.ok_or_else(|| missing("colour"))?.read(device)?;
            let image = color_image(width, height, rgba, flags.contains(RenderFlags::RGBA))?;
            if flags.contains(RenderFlags::DEPTH) {
                RenderOutput::ColorDepth(image, depth(readbacks.depth)?)
            } else {
                RenderOutput::Color(image)
            }
        }
        RenderMode::Depth => RenderOutput::Depth(depth(readbacks.depth)?),
        RenderMode::Pick => {
            let bytes = color.ok_or_else(|| missing("id"))?.read(device)?;
            RenderOutput::NodeIds(NodeIdBuffer::from_bytes(width, height, &bytes, queue.node_table.clone()))
        }
        RenderMode::Segmentation(_) => {
            let rgba = color.ok_or_else(|| missing("segmentation"))?.read(device)?;
            RenderOutput::Segmentation(color_image(width, height, rgba, false)?)
        }
    })
}
