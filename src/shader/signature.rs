//! Shader variant keys.
//!
//! A [`ShaderSignature`] captures every input that changes the generated WGSL or
//! the pipeline state of a draw. Two draws with equal signatures share one
//! compiled program.

use bitflags::bitflags;

use crate::{
    config::{LightCaps, RenderConfig},
    data_structures::model::{AlphaMode, MaterialModel, Primitive, Topology},
};

bitflags! {
    /// Optional vertex streams present on a primitive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VertexFlags: u16 {
        const NORMAL = 1 << 0;
        const TANGENT = 1 << 1;
        const TEXCOORD_0 = 1 << 2;
        const TEXCOORD_1 = 1 << 3;
        const COLOR_0 = 1 << 4;
        const JOINTS_0 = 1 << 5;
        const WEIGHTS_0 = 1 << 6;
        const INSTANCE_COLOR = 1 << 7;
    }
}

bitflags! {
    /// Material texture slots bound to a draw.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u16 {
        const BASE_COLOR = 1 << 0;
        const METALLIC_ROUGHNESS = 1 << 1;
        const DIFFUSE = 1 << 2;
        const SPECULAR_GLOSSINESS = 1 << 3;
        const NORMAL = 1 << 4;
        const OCCLUSION = 1 << 5;
        const EMISSIVE = 1 << 6;
    }
}

impl TextureFlags {
    /// Slots in binding order, with their WGSL names and whether they hold colour data.
    pub const SLOTS: [(TextureFlags, &'static str, bool); 7] = [
        (TextureFlags::BASE_COLOR, "base_color", true),
        (TextureFlags::METALLIC_ROUGHNESS, "metallic_roughness", false),
        (TextureFlags::DIFFUSE, "diffuse", true),
        (TextureFlags::SPECULAR_GLOSSINESS, "specular_glossiness", true),
        (TextureFlags::NORMAL, "normal", false),
        (TextureFlags::OCCLUSION, "occlusion", false),
        (TextureFlags::EMISSIVE, "emissive", true),
    ];
}

impl VertexFlags {
    pub fn of(primitive: &Primitive) -> Self {
        let mut flags = VertexFlags::empty();
        flags.set(VertexFlags::NORMAL, primitive.normals.is_some());
        flags.set(VertexFlags::TANGENT, primitive.tangents.is_some());
        flags.set(VertexFlags::TEXCOORD_0, primitive.texcoord_0.is_some());
        flags.set(VertexFlags::TEXCOORD_1, primitive.texcoord_1.is_some());
        flags.set(VertexFlags::COLOR_0, primitive.color_0.is_some());
        flags.set(VertexFlags::JOINTS_0, primitive.joints_0.is_some());
        flags.set(VertexFlags::WEIGHTS_0, primitive.weights_0.is_some());
        flags.set(VertexFlags::INSTANCE_COLOR, primitive.instance_colors.is_some());
        flags
    }
}

/// What the fragment stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// Lit, physically based shading.
    Color,
    /// Unlit base colour.
    Flat,
    /// Depth only; used by shadow passes and depth output.
    Depth,
    /// Node ids into an integer target.
    Pick,
    /// A fixed colour per node.
    Segmentation,
}

impl OutputMode {
    pub fn is_shaded(self) -> bool {
        matches!(self, OutputMode::Color | OutputMode::Flat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialKind {
    #[default]
    MetallicRoughness,
    SpecularGlossiness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaKind {
    #[default]
    Opaque,
    Mask,
    Blend,
}

impl From<AlphaMode> for AlphaKind {
    fn from(mode: AlphaMode) -> Self {
        match mode {
            AlphaMode::Opaque => AlphaKind::Opaque,
            AlphaMode::Mask => AlphaKind::Mask,
            AlphaMode::Blend => AlphaKind::Blend,
        }
    }
}

/// Number of shadow maps of each light kind sampled by the colour pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShadowCounts {
    pub directional: u8,
    pub spot: u8,
    pub point: u8,
}

impl ShadowCounts {
    pub fn is_empty(&self) -> bool {
        self.directional == 0 && self.spot == 0 && self.point == 0
    }

    /// Light-space matrices needed: one per directional or spot map and six per point map.
    pub fn matrix_count(&self) -> usize {
        self.directional as usize + self.spot as usize + 6 * self.point as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub topology: Topology,
    pub cull: bool,
    pub wireframe: bool,
    pub blend: bool,
}

const NO_LIGHTS: LightCaps = LightCaps {
    directional: 0,
    spot: 0,
    point: 0,
};

/// Immutable key of a compiled shader program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderSignature {
    pub output: OutputMode,
    pub vertex: VertexFlags,
    pub textures: TextureFlags,
    pub material: MaterialKind,
    pub alpha: AlphaKind,
    pub shadows: ShadowCounts,
    /// Sizes of the light uniform arrays; zero for unlit output.
    pub lights: LightCaps,
    pub raster: RasterState,
}

impl ShaderSignature {
    /**
     * Derives the signature a primitive needs for `output`.
     *
     * Only inputs that influence the program are kept: pick, segmentation and
     * opaque depth variants ignore materials and optional vertex streams, and
     * shadow counts only matter to lit colour output. Depth variants of masked
     * materials keep the base colour inputs so fragments below the cutoff
     * leave no depth. Texture slots disabled in
     * the config, or lacking the texture coordinates (and normals, for normal
     * maps) to sample them, are treated as absent.
     */
    pub fn for_draw(
        primitive: &Primitive,
        config: &RenderConfig,
        output: OutputMode,
        shadows: ShadowCounts,
    ) -> Self {
        let material = &primitive.material;
        let triangles = primitive.mode.is_triangles();
        let raster = RasterState {
            topology: primitive.mode,
            cull: triangles && config.culls(material.double_sided),
            wireframe: triangles && config.wireframe.resolve(material.wireframe),
            blend: output.is_shaded() && blends(primitive),
        };

        let cutout = output == OutputMode::Depth && material.alpha_mode == AlphaMode::Mask;
        if !output.is_shaded() && !cutout {
            return Self {
                output,
                vertex: VertexFlags::empty(),
                textures: TextureFlags::empty(),
                material: MaterialKind::default(),
                alpha: AlphaKind::Opaque,
                shadows: ShadowCounts::default(),
                lights: NO_LIGHTS,
                raster: RasterState {
                    blend: false,
                    ..raster
                },
            };
        }

        let mut vertex = VertexFlags::of(primitive);
        if cutout {
            vertex.remove(VertexFlags::INSTANCE_COLOR);
        }
        let mut textures = TextureFlags::empty();
        textures.set(TextureFlags::EMISSIVE, material.emissive_texture.is_some());
        if material.normal_texture.is_some() && vertex.contains(VertexFlags::NORMAL) {
            textures |= TextureFlags::NORMAL;
        }
        textures.set(TextureFlags::OCCLUSION, material.occlusion_texture.is_some());
        let kind = match &material.model {
            MaterialModel::MetallicRoughness {
                base_color_texture,
                metallic_roughness_texture,
                ..
            } => {
                textures.set(TextureFlags::BASE_COLOR, base_color_texture.is_some());
                textures.set(
                    TextureFlags::METALLIC_ROUGHNESS,
                    metallic_roughness_texture.is_some(),
                );
                MaterialKind::MetallicRoughness
            }
            MaterialModel::SpecularGlossiness {
                diffuse_texture,
                specular_glossiness_texture,
                ..
            } => {
                textures.set(TextureFlags::DIFFUSE, diffuse_texture.is_some());
                textures.set(
                    TextureFlags::SPECULAR_GLOSSINESS,
                    specular_glossiness_texture.is_some(),
                );
                MaterialKind::SpecularGlossiness
            }
        };
        textures &= config.textures;
        if !vertex.contains(VertexFlags::TEXCOORD_0) {
            textures = TextureFlags::empty();
        }
        if matches!(output, OutputMode::Flat | OutputMode::Depth) {
            textures &= TextureFlags::BASE_COLOR | TextureFlags::DIFFUSE;
        }

        Self {
            output,
            vertex,
            textures,
            material: kind,
            alpha: material.alpha_mode.into(),
            shadows: if output == OutputMode::Color {
                shadows
            } else {
                ShadowCounts::default()
            },
            lights: if output == OutputMode::Color {
                config.max_lights
            } else {
                NO_LIGHTS
            },
            raster,
        }
    }

    /// Whether a depth-only variant discards fragments below the alpha cutoff.
    pub fn cuts_out_depth(&self) -> bool {
        self.output == OutputMode::Depth && self.alpha == AlphaKind::Mask
    }

    /// Whether the program has a fragment stage.
    pub fn has_fragment_stage(&self) -> bool {
        self.output != OutputMode::Depth || self.cuts_out_depth()
    }

    /// Whether the program writes depth.
    pub fn writes_depth(&self) -> bool {
        !self.raster.blend
    }
}

/// Whether a primitive is drawn in the blended part of the queue.
///
/// Masked materials cut fragments out instead of blending them.
pub fn blends(primitive: &Primitive) -> bool {
    primitive.material.alpha_mode != AlphaMode::Mask && primitive.is_transparent()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cgmath::{Matrix4, SquareMatrix, Vector3};

    use super::*;
    use crate::{
        config::{RenderFlags, WireframeMode},
        data_structures::model::{Material, MaterialTexture},
    };

    fn triangle(material: Material) -> Primitive {
        Primitive::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            Arc::new(material),
        )
    }

    fn texture() -> Arc<MaterialTexture> {
        Arc::new(MaterialTexture::new(image::RgbaImage::new(1, 1)))
    }

    #[test]
    fn equal_inputs_give_equal_signatures() {
        let config = RenderConfig::default();
        let a = triangle(Material::default()).with_normals(vec![[0.0, 0.0, 1.0]; 3]);
        let b = triangle(Material::with_base_color([0.2, 0.3, 0.4, 1.0]))
            .with_normals(vec![[0.0, 0.0, 1.0]; 3]);
        let sa = ShaderSignature::for_draw(&a, &config, OutputMode::Color, ShadowCounts::default());
        let sb = ShaderSignature::for_draw(&b, &config, OutputMode::Color, ShadowCounts::default());
        assert_eq!(sa, sb);

        let c = triangle(Material::default());
        let sc = ShaderSignature::for_draw(&c, &config, OutputMode::Color, ShadowCounts::default());
        assert_ne!(sa, sc);
        // depth variants do not care about normals
        assert_eq!(
            ShaderSignature::for_draw(&a, &config, OutputMode::Depth, ShadowCounts::default()),
            ShaderSignature::for_draw(&c, &config, OutputMode::Depth, ShadowCounts::default()),
        );
    }

    #[test]
    fn textures_need_coordinates_and_enabled_slots() {
        let mut material = Material::default();
        material.model = MaterialModel::MetallicRoughness {
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            base_color_texture: Some(texture()),
            metallic_roughness_texture: None,
        };
        material.normal_texture = Some(texture());
        let without_uv = triangle(material.clone());
        let mut config = RenderConfig::default();
        let sig = ShaderSignature::for_draw(&without_uv, &config, OutputMode::Color, ShadowCounts::default());
        assert!(sig.textures.is_empty());

        let with_uv = triangle(material).with_texcoords(vec![[0.0; 2]; 3]);
        let sig = ShaderSignature::for_draw(&with_uv, &config, OutputMode::Color, ShadowCounts::default());
        // the normal map needs vertex normals
        assert_eq!(sig.textures, TextureFlags::BASE_COLOR);

        config.textures.remove(TextureFlags::BASE_COLOR);
        let sig = ShaderSignature::for_draw(&with_uv, &config, OutputMode::Color, ShadowCounts::default());
        assert!(sig.textures.is_empty());
    }

    #[test]
    fn raster_state_follows_config() {
        let mut material = Material::with_base_color([1.0, 1.0, 1.0, 0.5]);
        material.alpha_mode = AlphaMode::Blend;
        material.wireframe = true;
        let prim = triangle(material);
        let mut config = RenderConfig::default();
        let sig = ShaderSignature::for_draw(&prim, &config, OutputMode::Color, ShadowCounts::default());
        assert!(sig.raster.blend && sig.raster.cull && sig.raster.wireframe);
        assert!(!sig.writes_depth());

        config.wireframe = WireframeMode::Invert;
        config.flags |= RenderFlags::SKIP_CULL_FACES;
        let sig = ShaderSignature::for_draw(&prim, &config, OutputMode::Color, ShadowCounts::default());
        assert!(!sig.raster.wireframe && !sig.raster.cull);

        let pick = ShaderSignature::for_draw(&prim, &config, OutputMode::Pick, ShadowCounts::default());
        assert!(!pick.raster.blend);
    }

    #[test]
    fn poses_do_not_split_variants() {
        let config = RenderConfig::default();
        let single = triangle(Material::default()).with_normals(vec![[0.0, 0.0, 1.0]; 3]);
        let posed = triangle(Material::default())
            .with_normals(vec![[0.0, 0.0, 1.0]; 3])
            .with_poses(vec![Matrix4::identity(), Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0))]);
        for output in [OutputMode::Color, OutputMode::Depth, OutputMode::Pick] {
            assert_eq!(
                ShaderSignature::for_draw(&single, &config, output, ShadowCounts::default()),
                ShaderSignature::for_draw(&posed, &config, output, ShadowCounts::default()),
            );
        }
    }

    #[test]
    fn masked_depth_keeps_base_color_inputs() {
        let mut material = Material::default();
        material.model = MaterialModel::MetallicRoughness {
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            base_color_texture: Some(texture()),
            metallic_roughness_texture: Some(texture()),
        };
        material.alpha_mode = AlphaMode::Mask;
        let prim = triangle(material.clone())
            .with_texcoords(vec![[0.0; 2]; 3])
            .with_instance_colors(vec![[1.0; 4]]);
        let config = RenderConfig::default();

        let depth = ShaderSignature::for_draw(&prim, &config, OutputMode::Depth, ShadowCounts::default());
        assert!(depth.cuts_out_depth() && depth.has_fragment_stage());
        assert_eq!(depth.textures, TextureFlags::BASE_COLOR);
        assert_eq!(depth.vertex, VertexFlags::TEXCOORD_0);
        assert!(depth.lights.directional == 0 && depth.shadows.is_empty());

        let pick = ShaderSignature::for_draw(&prim, &config, OutputMode::Pick, ShadowCounts::default());
        assert!(!pick.cuts_out_depth());
        assert!(pick.vertex.is_empty() && pick.textures.is_empty());

        material.alpha_mode = AlphaMode::Opaque;
        let opaque = triangle(material).with_texcoords(vec![[0.0; 2]; 3]);
        let depth = ShaderSignature::for_draw(&opaque, &config, OutputMode::Depth, ShadowCounts::default());
        assert!(!depth.has_fragment_stage());
        assert!(depth.vertex.is_empty());
    }

    #[test]
    fn shadows_only_reach_lit_output() {
        let prim = triangle(Material::default());
        let shadows = ShadowCounts {
            directional: 1,
            spot: 0,
            point: 2,
        };
        assert_eq!(shadows.matrix_count(), 13);
        let config = RenderConfig::default();
        let lit = ShaderSignature::for_draw(&prim, &config, OutputMode::Color, shadows);
        assert_eq!(lit.shadows, shadows);
        let flat = ShaderSignature::for_draw(&prim, &config, OutputMode::Flat, shadows);
        assert!(flat.shadows.is_empty());
    }
}
