//! Render target ownership.
//!
//! The [`RenderTargetManager`] hands out [`TargetId`]s for offscreen
//! attachments, reuses them between frames and keeps one shadow target per
//! shadow casting light. Allocation is delegated to a [`TargetAllocator`] so the
//! bookkeeping can be exercised without a GPU.

use std::collections::HashMap;

use slotmap::{SlotMap, new_key_type};

use crate::{
    data_structures::{light::LightType, scene_graph::NodeHandle, texture::Texture},
    error::RenderError,
};

new_key_type! {
    /// Handle of a managed target. Stale after release.
    pub struct TargetId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Colour attachment with a depth buffer.
    ColorDepth,
    /// Single depth texture; directional and spot shadows, depth output.
    DepthOnly,
    /// Six layer depth texture; point light shadows.
    DepthCube,
    /// Integer id attachment with a depth buffer.
    Pick,
}

impl TargetKind {
    pub fn for_shadow(ty: LightType) -> Self {
        match ty {
            LightType::Point => TargetKind::DepthCube,
            LightType::Directional | LightType::Spot => TargetKind::DepthOnly,
        }
    }
}

/// Creates and frees the backing resources of a target.
pub trait TargetAllocator {
    type Target;

    fn allocate(&mut self, kind: TargetKind, width: u32, height: u32) -> Result<Self::Target, String>;

    /// Called exactly once for every allocated target.
    fn free(&mut self, target: Self::Target) {
        drop(target);
    }
}

#[derive(Debug)]
pub struct ManagedTarget<T> {
    pub kind: TargetKind,
    pub width: u32,
    pub height: u32,
    pub target: T,
    last_used: u64,
    shadow: bool,
}

pub struct RenderTargetManager<A: TargetAllocator> {
    allocator: A,
    targets: SlotMap<TargetId, ManagedTarget<A::Target>>,
    shadows: HashMap<(NodeHandle, LightType), TargetId>,
    frame: u64,
    live: usize,
}

impl<A: TargetAllocator> RenderTargetManager<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            targets: SlotMap::with_key(),
            shadows: HashMap::new(),
            frame: 0,
            live: 0,
        }
    }

    /// Starts a new frame; targets acquired in earlier frames become reusable.
    pub fn begin_frame(&mut self) {
        self.frame += 1;
    }

    fn allocate(&mut self, kind: TargetKind, width: u32, height: u32) -> Result<A::Target, RenderError> {
        let failure = |reason: String| RenderError::TargetAllocation {
            kind,
            width,
            height,
            reason,
        };
        if width == 0 || height == 0 {
            return Err(failure("zero sized target".into()));
        }
        let target = self.allocator.allocate(kind, width, height).map_err(failure)?;
        self.live += 1;
        log::debug!("allocated {kind:?} target {width}x{height}");
        Ok(target)
    }

    fn free(&mut self, target: A::Target) {
        self.allocator.free(target);
        self.live -= 1;
    }

    /**
     * Returns a target of the given kind and size for the current frame.
     *
     * A target of the same kind and size that was not used yet in this frame
     * is reused; otherwise a new one is allocated.
     */
    pub fn acquire(&mut self, kind: TargetKind, width: u32, height: u32) -> Result<TargetId, RenderError> {
        let frame = self.frame;
        let reusable = self.targets.iter_mut().find(|(_, t)| {
            !t.shadow && t.kind == kind && t.width == width && t.height == height && t.last_used < frame
        });
        if let Some((id, target)) = reusable {
            target.last_used = frame;
            return Ok(id);
        }
        let target = self.allocate(kind, width, height)?;
        Ok(self.targets.insert(ManagedTarget {
            kind,
            width,
            height,
            target,
            last_used: frame,
            shadow: false,
        }))
    }

    /// Reallocates `id` at a new size. Contents are lost; unchanged sizes are a no-op.
    ///
    /// The old attachments stay valid when the new allocation fails.
    pub fn resize(&mut self, id: TargetId, width: u32, height: u32) -> Result<(), RenderError> {
        let (kind, same) = match self.targets.get(id) {
            Some(t) => (t.kind, t.width == width && t.height == height),
            None => return Err(RenderError::UnknownTarget(id)),
        };
        if same {
            return Ok(());
        }
        let fresh = self.allocate(kind, width, height)?;
        let Some(slot) = self.targets.get_mut(id) else {
            return Err(RenderError::UnknownTarget(id));
        };
        let old = std::mem::replace(&mut slot.target, fresh);
        slot.width = width;
        slot.height = height;
        self.free(old);
        Ok(())
    }

    /// Frees a target. Releasing the same id twice fails.
    pub fn release(&mut self, id: TargetId) -> Result<(), RenderError> {
        let target = self.targets.remove(id).ok_or(RenderError::DoubleRelease(id))?;
        if target.shadow {
            self.shadows.retain(|_, v| *v != id);
        }
        self.free(target.target);
        Ok(())
    }

    /// The shadow target of `light`, resized to `size` when the configured size changed.
    pub fn acquire_shadow(&mut self, light: NodeHandle, ty: LightType, size: u32) -> Result<TargetId, RenderError> {
        let frame = self.frame;
        if let Some(&id) = self.shadows.get(&(light, ty)) {
            self.resize(id, size, size)?;
            if let Some(target) = self.targets.get_mut(id) {
                target.last_used = frame;
            }
            return Ok(id);
        }
        let kind = TargetKind::for_shadow(ty);
        let target = self.allocate(kind, size, size)?;
        let id = self.targets.insert(ManagedTarget {
            kind,
            width: size,
            height: size,
            target,
            last_used: frame,
            shadow: true,
        });
        self.shadows.insert((light, ty), id);
        Ok(id)
    }

    pub fn shadow_target(&self, light: NodeHandle, ty: LightType) -> Option<TargetId> {
        self.shadows.get(&(light, ty)).copied()
    }

    /// Releases the shadow targets of lights for which `keep` returns false.
    pub fn retain_shadows(&mut self, mut keep: impl FnMut(NodeHandle, LightType) -> bool) {
        let stale: Vec<TargetId> = self
            .shadows
            .iter()
            .filter(|((light, ty), _)| !keep(*light, *ty))
            .map(|(_, id)| *id)
            .collect();
        for id in stale {
            if let Err(e) = self.release(id) {
                log::warn!("dropping shadow target: {e}");
            }
        }
    }

    pub fn get(&self, id: TargetId) -> Option<&ManagedTarget<A::Target>> {
        self.targets.get(id)
    }

    /// Allocations that have not been freed yet.
    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn release_all(&mut self) {
        self.shadows.clear();
        let ids: Vec<TargetId> = self.targets.keys().collect();
        for id in ids {
            if let Some(target) = self.targets.remove(id) {
                self.free(target.target);
            }
        }
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

/// GPU resources of one target.
#[derive(Debug)]
pub struct GpuTarget {
    /// Colour or id attachment; `None` for depth-only kinds.
    pub color: Option<Texture>,
    pub depth: Texture,
    /// Per-face attachment views of a [`TargetKind::DepthCube`].
    pub faces: Vec<wgpu::TextureView>,
}

/// Allocates wgpu textures for the managed targets.
pub struct GpuTargetAllocator {
    device: wgpu::Device,
}

impl GpuTargetAllocator {
    pub fn new(device: wgpu::Device) -> Self {
        Self { device }
    }
}

impl TargetAllocator for GpuTargetAllocator {
    type Target = GpuTarget;

    fn allocate(&mut self, kind: TargetKind, width: u32, height: u32) -> Result<GpuTarget, String> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(format!("exceeds the device limit of {max}"));
        }
        let device = &self.device;
        Ok(match kind {
            TargetKind::ColorDepth => GpuTarget {
                color: Some(Texture::create_color_target(device, [width, height], "color target")),
                depth: Texture::create_depth_texture(device, [width, height], "color depth"),
                faces: Vec::new(),
            },
            TargetKind::Pick => GpuTarget {
                color: Some(Texture::create_pick_target(device, [width, height], "pick target")),
                depth: Texture::create_depth_texture(device, [width, height], "pick depth"),
                faces: Vec::new(),
            },
            TargetKind::DepthOnly => GpuTarget {
                color: None,
                depth: Texture::create_depth_texture(device, [width, height], "depth target"),
                faces: Vec::new(),
            },
            TargetKind::DepthCube => {
                let (depth, faces) = Texture::create_depth_layers(device, width, "cube depth target");
                GpuTarget {
                    color: None,
                    depth,
                    faces,
                }
            }
        })
    }
}
