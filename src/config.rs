//! Renderer configuration.
//!
//! [`RenderConfig`] is the whole configuration surface consumed by the pass
//! pipeline. It is plain data: build it with `Default` and overwrite the fields
//! you care about before handing it to the renderer.

use bitflags::bitflags;

use crate::{data_structures::light::LightType, shader::TextureFlags};

/// Default maximum number of lights of each kind bound to the colour pass.
pub const MAX_LIGHTS_PER_KIND: usize = 4;
/// Default edge length (in texels) of a shadow map.
pub const SHADOW_MAP_SIZE: u32 = 1024;
/// Default number of shadow maps bound to the colour pass. Together with the
/// seven material textures this stays within the default sampled texture limit.
pub const MAX_SHADOW_MAPS: usize = 8;
/// Upper bound on `max_shadow_maps`; shadow slots are stored as `u8`.
pub const SHADOW_SLOT_LIMIT: usize = u8::MAX as usize;
/// Default near plane for cameras.
pub const DEFAULT_Z_NEAR: f32 = 0.05;
/// Default far plane for cameras.
pub const DEFAULT_Z_FAR: f32 = 100.0;
/// Scene scale assumed for empty or degenerate scenes.
pub const DEFAULT_SCENE_SCALE: f32 = 2.0;

bitflags! {
    /// Output and debugging toggles of a render call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenderFlags: u32 {
        /// Return RGBA instead of RGB and clear to a transparent background.
        const RGBA = 1 << 0;
        /// Also return the linear depth buffer with the colour image.
        const DEPTH = 1 << 1;
        /// Skip lighting and output the unlit base colour.
        const FLAT = 1 << 2;
        /// Never cull back faces.
        const SKIP_CULL_FACES = 1 << 3;
        /// Return depth as stored in the depth buffer, `[0, 1]` with `1.0` on the background.
        const RAW_DEPTH = 1 << 4;
    }
}

/// Maximum number of lights of each kind considered per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightCaps {
    pub directional: usize,
    pub spot: usize,
    pub point: usize,
}

impl LightCaps {
    pub fn get(&self, ty: LightType) -> usize {
        match ty {
            LightType::Directional => self.directional,
            LightType::Spot => self.spot,
            LightType::Point => self.point,
        }
    }
}

impl Default for LightCaps {
    fn default() -> Self {
        Self {
            directional: MAX_LIGHTS_PER_KIND,
            spot: MAX_LIGHTS_PER_KIND,
            point: MAX_LIGHTS_PER_KIND,
        }
    }
}

/// Which light kinds get shadow passes when a light asks for shadows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShadowToggles {
    pub directional: bool,
    pub spot: bool,
    pub point: bool,
}

impl ShadowToggles {
    pub fn none() -> Self {
        Self {
            directional: false,
            spot: false,
            point: false,
        }
    }

    pub fn enabled(&self, ty: LightType) -> bool {
        match ty {
            LightType::Directional => self.directional,
            LightType::Spot => self.spot,
            LightType::Point => self.point,
        }
    }
}

impl Default for ShadowToggles {
    fn default() -> Self {
        Self {
            directional: true,
            spot: true,
            point: true,
        }
    }
}

/// How the material wireframe flag is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireframeMode {
    /// Use each material's own flag.
    #[default]
    Scene,
    ForceWireframe,
    ForceSolid,
    /// Flip each material's flag.
    Invert,
}

impl WireframeMode {
    pub fn resolve(self, material_wireframe: bool) -> bool {
        match self {
            WireframeMode::Scene => material_wireframe,
            WireframeMode::ForceWireframe => true,
            WireframeMode::ForceSolid => false,
            WireframeMode::Invert => !material_wireframe,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub max_lights: LightCaps,
    pub shadow_map_size: u32,
    pub shadows: ShadowToggles,
    /// Material texture slots that are honored. A disabled slot is treated as
    /// absent even when the material provides a texture.
    pub textures: TextureFlags,
    pub wireframe: WireframeMode,
    pub cull_faces: bool,
    pub flags: RenderFlags,
    /// Depth bias subtracted before the shadow comparison.
    pub shadow_bias: f32,
    /// Shadow maps sampled by the colour pass across all light kinds. Further
    /// shadow casting lights are lit without shadows.
    pub max_shadow_maps: usize,
}

impl RenderConfig {
    /// Whether back faces are culled for a material with the given double sided flag.
    pub fn culls(&self, double_sided: bool) -> bool {
        self.cull_faces && !double_sided && !self.flags.contains(RenderFlags::SKIP_CULL_FACES)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_lights: LightCaps::default(),
            shadow_map_size: SHADOW_MAP_SIZE,
            shadows: ShadowToggles::default(),
            textures: TextureFlags::all(),
            wireframe: WireframeMode::default(),
            cull_faces: true,
            flags: RenderFlags::empty(),
            shadow_bias: 0.005,
            max_shadow_maps: MAX_SHADOW_MAPS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireframe_mode_resolution() {
        assert!(WireframeMode::Scene.resolve(true));
        assert!(!WireframeMode::Scene.resolve(false));
        assert!(WireframeMode::ForceWireframe.resolve(false));
        assert!(!WireframeMode::ForceSolid.resolve(true));
        assert!(WireframeMode::Invert.resolve(false));
        assert!(!WireframeMode::Invert.resolve(true));
    }

    #[test]
    fn culling_respects_all_switches() {
        let mut config = RenderConfig::default();
        assert!(config.culls(false));
        assert!(!config.culls(true));
        config.flags |= RenderFlags::SKIP_CULL_FACES;
        assert!(!config.culls(false));
        config.flags = RenderFlags::empty();
        config.cull_faces = false;
        assert!(!config.culls(false));
    }
}
