//! Geometry and material payloads.
//!
//! A [`Mesh`] is a named list of [`Primitive`]s. Each primitive owns its vertex
//! attributes, an optional index list, a [`Material`] and optional instance
//! poses. Everything here is plain CPU data: GPU buffers are created lazily by
//! [`resources`](crate::resources) and keyed by the process-unique ids handed out
//! on construction.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use cgmath::{Matrix4, SquareMatrix, Vector3, Vector4};

/// Describes how the bytes of a vertex buffer map to shader locations.
pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

static NEXT_PRIMITIVE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a primitive, used to key uploaded GPU buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveId(u64);

impl PrimitiveId {
    fn next() -> Self {
        Self(NEXT_PRIMITIVE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Process-unique identity of a material texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        Self(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Axis-aligned box as `[min, max]`.
pub type Bounds = [[f32; 3]; 2];

/// Grows `acc` to contain `other`.
pub(crate) fn merge_bounds(acc: Option<Bounds>, other: Bounds) -> Option<Bounds> {
    Some(match acc {
        None => other,
        Some([min, max]) => [
            [
                min[0].min(other[0][0]),
                min[1].min(other[0][1]),
                min[2].min(other[0][2]),
            ],
            [
                max[0].max(other[1][0]),
                max[1].max(other[1][1]),
                max[2].max(other[1][2]),
            ],
        ],
    })
}

/// Transforms the eight corners of `bounds` and returns their bounding box.
pub(crate) fn transform_bounds(bounds: &Bounds, matrix: &Matrix4<f32>) -> Bounds {
    let [min, max] = bounds;
    let mut out: Option<Bounds> = None;
    for i in 0..8 {
        let corner = Vector4::new(
            if i & 1 == 0 { min[0] } else { max[0] },
            if i & 2 == 0 { min[1] } else { max[1] },
            if i & 4 == 0 { min[2] } else { max[2] },
            1.0,
        );
        let p = matrix * corner;
        out = merge_bounds(out, [[p.x, p.y, p.z], [p.x, p.y, p.z]]);
    }
    out.unwrap_or(*bounds)
}

/// Primitive assembly mode of a vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Topology {
    /// The wgpu topology used to draw this mode after index conversion.
    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            Topology::Points => wgpu::PrimitiveTopology::PointList,
            Topology::Lines => wgpu::PrimitiveTopology::LineList,
            Topology::LineLoop | Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Topology::Triangles | Topology::TriangleFan => wgpu::PrimitiveTopology::TriangleList,
            Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }

    pub fn is_triangles(self) -> bool {
        matches!(
            self,
            Topology::Triangles | Topology::TriangleStrip | Topology::TriangleFan
        )
    }

    /**
     * Rewrites an index list so it can be drawn with [`to_wgpu`](Self::to_wgpu).
     *
     * A line loop becomes a strip that returns to its first vertex, a triangle
     * fan becomes a list of triangles sharing the first vertex. Other modes are
     * returned unchanged.
     */
    pub fn convert_indices(self, indices: Vec<u32>) -> Vec<u32> {
        match self {
            Topology::LineLoop => {
                let mut indices = indices;
                if let Some(&first) = indices.first() {
                    indices.push(first);
                }
                indices
            }
            Topology::TriangleFan => {
                if indices.len() < 3 {
                    return Vec::new();
                }
                let first = indices[0];
                indices
                    .windows(2)
                    .skip(1)
                    .flat_map(|w| [first, w[0], w[1]])
                    .collect()
            }
            _ => indices,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaMode {
    #[default]
    Opaque,
    /// Fragments below the cutoff are discarded.
    Mask,
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

impl From<WrapMode> for wgpu::AddressMode {
    fn from(mode: WrapMode) -> Self {
        match mode {
            WrapMode::Repeat => wgpu::AddressMode::Repeat,
            WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    /// Linear when true, nearest otherwise.
    pub linear_mag: bool,
    pub linear_min: bool,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            linear_mag: true,
            linear_min: true,
        }
    }
}

/// Decoded texture data supplied by the model ingestion side.
#[derive(Debug)]
pub struct MaterialTexture {
    id: TextureId,
    pub image: image::RgbaImage,
    pub sampler: SamplerDesc,
}

impl MaterialTexture {
    pub fn new(image: image::RgbaImage) -> Self {
        Self {
            id: TextureId::next(),
            image,
            sampler: SamplerDesc::default(),
        }
    }

    pub fn with_sampler(mut self, sampler: SamplerDesc) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    /// True when any texel's alpha falls below `cutoff` (in `[0, 1]`).
    pub fn is_transparent(&self, cutoff: f32) -> bool {
        self.image
            .pixels()
            .any(|p| (p.0[3] as f32 / 255.0) < cutoff)
    }
}

#[derive(Debug, Clone)]
pub enum MaterialModel {
    MetallicRoughness {
        base_color_factor: [f32; 4],
        metallic_factor: f32,
        roughness_factor: f32,
        base_color_texture: Option<Arc<MaterialTexture>>,
        metallic_roughness_texture: Option<Arc<MaterialTexture>>,
    },
    SpecularGlossiness {
        diffuse_factor: [f32; 4],
        specular_factor: [f32; 3],
        glossiness_factor: f32,
        diffuse_texture: Option<Arc<MaterialTexture>>,
        specular_glossiness_texture: Option<Arc<MaterialTexture>>,
    },
}

impl MaterialModel {
    pub fn metallic_roughness() -> Self {
        MaterialModel::MetallicRoughness {
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            base_color_texture: None,
            metallic_roughness_texture: None,
        }
    }

    pub fn specular_glossiness() -> Self {
        MaterialModel::SpecularGlossiness {
            diffuse_factor: [1.0; 4],
            specular_factor: [1.0; 3],
            glossiness_factor: 1.0,
            diffuse_texture: None,
            specular_glossiness_texture: None,
        }
    }

    /// Base colour (or diffuse) factor and texture.
    pub fn base(&self) -> ([f32; 4], Option<&Arc<MaterialTexture>>) {
        match self {
            MaterialModel::MetallicRoughness {
                base_color_factor,
                base_color_texture,
                ..
            } => (*base_color_factor, base_color_texture.as_ref()),
            MaterialModel::SpecularGlossiness {
                diffuse_factor,
                diffuse_texture,
                ..
            } => (*diffuse_factor, diffuse_texture.as_ref()),
        }
    }
}

/// Surface description shared by primitives.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: Option<String>,
    pub model: MaterialModel,
    pub emissive_factor: [f32; 3],
    pub emissive_texture: Option<Arc<MaterialTexture>>,
    pub normal_texture: Option<Arc<MaterialTexture>>,
    pub occlusion_texture: Option<Arc<MaterialTexture>>,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,
    pub wireframe: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: None,
            model: MaterialModel::metallic_roughness(),
            emissive_factor: [0.0; 3],
            emissive_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            wireframe: false,
        }
    }
}

impl Material {
    /// Flat metallic-roughness material of the given base colour.
    pub fn with_base_color(color: [f32; 4]) -> Self {
        Self {
            model: MaterialModel::MetallicRoughness {
                base_color_factor: color,
                metallic_factor: 0.0,
                roughness_factor: 1.0,
                base_color_texture: None,
                metallic_roughness_texture: None,
            },
            ..Default::default()
        }
    }

    pub fn alpha_mode(mut self, mode: AlphaMode) -> Self {
        self.alpha_mode = mode;
        self
    }

    /**
     * Whether the material lets the background show through.
     *
     * Opaque materials never do. For blended materials any alpha below one
     * counts, masked materials only count values below their cutoff.
     */
    pub fn is_transparent(&self) -> bool {
        let cutoff = match self.alpha_mode {
            AlphaMode::Opaque => return false,
            AlphaMode::Blend => 1.0,
            AlphaMode::Mask => self.alpha_cutoff,
        };
        let (factor, texture) = self.model.base();
        factor[3] < cutoff || texture.is_some_and(|t| t.is_transparent(cutoff))
    }
}

/// A single drawable vertex stream with its material.
///
/// Cloning hands out a fresh [`PrimitiveId`] so a modified copy never aliases
/// the GPU buffers of its source.
#[derive(Debug)]
pub struct Primitive {
    id: PrimitiveId,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    /// `w` is the bitangent sign.
    pub tangents: Option<Vec<[f32; 4]>>,
    pub texcoord_0: Option<Vec<[f32; 2]>>,
    pub texcoord_1: Option<Vec<[f32; 2]>>,
    pub color_0: Option<Vec<[f32; 4]>>,
    pub joints_0: Option<Vec<[u32; 4]>>,
    pub weights_0: Option<Vec<[f32; 4]>>,
    pub indices: Option<Vec<u32>>,
    pub mode: Topology,
    pub material: Arc<Material>,
    /// Instance poses relative to the owning node. `None` draws one instance.
    pub poses: Option<Vec<Matrix4<f32>>>,
    pub instance_colors: Option<Vec<[f32; 4]>>,
}

impl Clone for Primitive {
    fn clone(&self) -> Self {
        Self {
            id: PrimitiveId::next(),
            positions: self.positions.clone(),
            normals: self.normals.clone(),
            tangents: self.tangents.clone(),
            texcoord_0: self.texcoord_0.clone(),
            texcoord_1: self.texcoord_1.clone(),
            color_0: self.color_0.clone(),
            joints_0: self.joints_0.clone(),
            weights_0: self.weights_0.clone(),
            indices: self.indices.clone(),
            mode: self.mode,
            material: self.material.clone(),
            poses: self.poses.clone(),
            instance_colors: self.instance_colors.clone(),
        }
    }
}

impl Primitive {
    pub fn new(positions: Vec<[f32; 3]>, material: Arc<Material>) -> Self {
        Self {
            id: PrimitiveId::next(),
            positions,
            normals: None,
            tangents: None,
            texcoord_0: None,
            texcoord_1: None,
            color_0: None,
            joints_0: None,
            weights_0: None,
            indices: None,
            mode: Topology::Triangles,
            material,
            poses: None,
            instance_colors: None,
        }
    }

    pub fn id(&self) -> PrimitiveId {
        self.id
    }

    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = Some(normals);
        self
    }

    pub fn with_tangents(mut self, tangents: Vec<[f32; 4]>) -> Self {
        self.tangents = Some(tangents);
        self
    }

    pub fn with_texcoords(mut self, uv0: Vec<[f32; 2]>) -> Self {
        self.texcoord_0 = Some(uv0);
        self
    }

    pub fn with_texcoords_1(mut self, uv1: Vec<[f32; 2]>) -> Self {
        self.texcoord_1 = Some(uv1);
        self
    }

    pub fn with_colors(mut self, colors: Vec<[f32; 4]>) -> Self {
        self.color_0 = Some(colors);
        self
    }

    pub fn with_skin(mut self, joints: Vec<[u32; 4]>, weights: Vec<[f32; 4]>) -> Self {
        self.joints_0 = Some(joints);
        self.weights_0 = Some(weights);
        self
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    pub fn with_mode(mut self, mode: Topology) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_poses(mut self, poses: Vec<Matrix4<f32>>) -> Self {
        self.poses = Some(poses);
        self
    }

    pub fn with_instance_colors(mut self, colors: Vec<[f32; 4]>) -> Self {
        self.instance_colors = Some(colors);
        self
    }

    /// Number of instances drawn; at least one.
    pub fn instance_count(&self) -> usize {
        self.poses.as_ref().map_or(1, |p| p.len().max(1))
    }

    /// Pose of instance `i`, identity when no poses are set.
    pub fn pose(&self, i: usize) -> Matrix4<f32> {
        self.poses
            .as_ref()
            .and_then(|p| p.get(i))
            .copied()
            .unwrap_or_else(Matrix4::identity)
    }

    /// Bounds of the vertex positions alone.
    pub fn vertex_bounds(&self) -> Option<Bounds> {
        self.positions
            .iter()
            .fold(None, |acc, p| merge_bounds(acc, [*p, *p]))
    }

    /// Local bounds of the vertex positions, widened by the instance translations.
    pub fn bounds(&self) -> Option<Bounds> {
        let [mut min, mut max] = self.vertex_bounds()?;
        if let Some(poses) = self.poses.as_ref().filter(|p| !p.is_empty()) {
            let mut t_min = Vector3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
            let mut t_max = -t_min;
            for pose in poses {
                let t = pose.w.truncate();
                t_min = Vector3::new(t_min.x.min(t.x), t_min.y.min(t.y), t_min.z.min(t.z));
                t_max = Vector3::new(t_max.x.max(t.x), t_max.y.max(t.y), t_max.z.max(t.z));
            }
            for i in 0..3 {
                min[i] += t_min[i];
                max[i] += t_max[i];
            }
        }
        Some([min, max])
    }

    pub fn is_transparent(&self) -> bool {
        let translucent = |colors: &Option<Vec<[f32; 4]>>| {
            colors
                .as_ref()
                .is_some_and(|c| c.iter().any(|c| c[3] != 1.0))
        };
        self.material.is_transparent()
            || translucent(&self.color_0)
            || translucent(&self.instance_colors)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

/// A named collection of primitives attached to a node.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Arc<Primitive>>,
    pub visible: bool,
}

impl Mesh {
    pub fn new(primitives: Vec<Primitive>) -> Self {
        Self {
            name: None,
            primitives: primitives.into_iter().map(Arc::new).collect(),
            visible: true,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.primitives
            .iter()
            .filter_map(|p| p.bounds())
            .fold(None, merge_bounds)
    }

    pub fn is_transparent(&self) -> bool {
        self.primitives.iter().any(|p| p.is_transparent())
    }

    /// Axis-aligned unit cube centred at the origin with per-face normals.
    pub fn cube(material: Arc<Material>) -> Self {
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ];
        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, u, v) in FACES {
            let base = positions.len() as u32;
            for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                positions.push([
                    n[0] * 0.5 + u[0] * su + v[0] * sv,
                    n[1] * 0.5 + u[1] * su + v[1] * sv,
                    n[2] * 0.5 + u[2] * su + v[2] * sv,
                ]);
                normals.push(n);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Mesh::new(vec![
            Primitive::new(positions, material)
                .with_normals(normals)
                .with_indices(indices),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_and_loop_conversion() {
        assert_eq!(
            Topology::TriangleFan.convert_indices(vec![0, 1, 2, 3]),
            vec![0, 1, 2, 0, 2, 3]
        );
        assert_eq!(
            Topology::LineLoop.convert_indices(vec![4, 5, 6]),
            vec![4, 5, 6, 4]
        );
        assert!(Topology::TriangleFan.convert_indices(vec![0, 1]).is_empty());
        assert_eq!(Topology::Lines.convert_indices(vec![0, 1]), vec![0, 1]);
    }

    #[test]
    fn transparency_rules() {
        let opaque = Material::with_base_color([1.0, 1.0, 1.0, 0.2]);
        assert!(!opaque.is_transparent());

        let blend = Material::with_base_color([1.0, 1.0, 1.0, 0.99]).alpha_mode(AlphaMode::Blend);
        assert!(blend.is_transparent());

        let mut mask = Material::with_base_color([1.0, 1.0, 1.0, 0.6]).alpha_mode(AlphaMode::Mask);
        assert!(!mask.is_transparent());
        mask.alpha_cutoff = 0.7;
        assert!(mask.is_transparent());

        let mut image = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 255, 255, 255]));
        image.put_pixel(1, 1, image::Rgba([255, 255, 255, 10]));
        let textured = Material {
            model: MaterialModel::MetallicRoughness {
                base_color_factor: [1.0; 4],
                metallic_factor: 1.0,
                roughness_factor: 1.0,
                base_color_texture: Some(Arc::new(MaterialTexture::new(image))),
                metallic_roughness_texture: None,
            },
            alpha_mode: AlphaMode::Blend,
            ..Default::default()
        };
        assert!(textured.is_transparent());
    }

    #[test]
    fn vertex_and_instance_colors_make_primitives_transparent() {
        let material = Arc::new(Material::default());
        let tri = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let plain = Primitive::new(tri.clone(), material.clone());
        assert!(!plain.is_transparent());
        let colored = plain.clone().with_colors(vec![[1.0, 1.0, 1.0, 0.5]; 3]);
        assert!(colored.is_transparent());
        let instanced = Primitive::new(tri, material).with_instance_colors(vec![[1.0, 0.0, 0.0, 0.5]]);
        assert!(instanced.is_transparent());
    }

    #[test]
    fn instanced_bounds_include_pose_translations() {
        let prim = Primitive::new(
            vec![[-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]],
            Arc::new(Material::default()),
        )
        .with_poses(vec![
            Matrix4::from_translation(Vector3::new(-2.0, 0.0, 0.0)),
            Matrix4::from_translation(Vector3::new(3.0, 0.0, 0.0)),
        ]);
        assert_eq!(prim.bounds(), Some([[-3.0, -1.0, -1.0], [4.0, 1.0, 1.0]]));
        assert_eq!(prim.instance_count(), 2);
    }

    #[test]
    fn primitives_get_distinct_ids() {
        let material = Arc::new(Material::default());
        let a = Primitive::new(vec![[0.0; 3]], material.clone());
        let b = Primitive::new(vec![[0.0; 3]], material);
        assert_ne!(a.id(), b.id());
        let cube = Mesh::cube(Arc::new(Material::default()));
        assert_eq!(cube.bounds(), Some([[-0.5; 3], [0.5; 3]]));
    }
}
