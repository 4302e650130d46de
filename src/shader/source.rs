//! WGSL generation for shader variants.
//!
//! A variant is assembled from named fragments. The fragment ranges are kept
//! next to the source so naga diagnostics can be attributed to the feature that
//! produced the broken code.

use std::ops::Range;

use crate::{
    config::LightCaps,
    error::ShaderCompileError,
    shader::signature::{
        AlphaKind, MaterialKind, OutputMode, ShaderSignature, ShadowCounts, TextureFlags,
        VertexFlags,
    },
};

const PBR: &str = include_str!("pbr.wgsl");
const SHADOW: &str = include_str!("shadow.wgsl");

/// Bind group of the camera and light uniforms.
pub const FRAME_GROUP: u32 = 0;
/// Bind group of the material or the per-draw pick uniform.
pub const DRAW_GROUP: u32 = 1;
/// Bind group of the shadow sampler, matrices and maps.
pub const SHADOW_GROUP: u32 = 2;

/// Generated WGSL with the byte ranges of its fragments.
#[derive(Debug, Clone)]
pub struct ComposedShader {
    pub source: String,
    fragments: Vec<(&'static str, Range<usize>)>,
    has_fragment_stage: bool,
}

impl ComposedShader {
    /// Name of the fragment containing byte `offset`.
    pub fn fragment_at(&self, offset: usize) -> &'static str {
        self.fragments
            .iter()
            .find(|(_, range)| range.contains(&offset))
            .map_or("unknown", |(name, _)| *name)
    }

    pub fn fragment_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fragments.iter().map(|(name, _)| *name)
    }

    /// Opaque depth-only variants have no `fs_main`.
    pub fn has_fragment_stage(&self) -> bool {
        self.has_fragment_stage
    }
}

#[derive(Default)]
struct Composer {
    source: String,
    fragments: Vec<(&'static str, Range<usize>)>,
}

impl Composer {
    fn push(&mut self, name: &'static str, text: &str) {
        let start = self.source.len();
        self.source.push_str(text);
        self.source.push('\n');
        self.fragments.push((name, start..self.source.len()));
    }

    fn finish(self, has_fragment_stage: bool) -> ComposedShader {
        ComposedShader {
            source: self.source,
            fragments: self.fragments,
            has_fragment_stage,
        }
    }
}

/// Texture slots present in `flags`, in binding order.
pub fn texture_slots(flags: TextureFlags) -> impl Iterator<Item = (TextureFlags, &'static str, bool)> {
    TextureFlags::SLOTS
        .into_iter()
        .filter(move |(slot, _, _)| flags.contains(*slot))
}

/// Builds the WGSL of a variant.
pub fn compose(signature: &ShaderSignature) -> ComposedShader {
    let mut composer = Composer::default();
    composer.push("camera", CAMERA);

    match signature.output {
        OutputMode::Color => {
            composer.push("lights", &lights(&signature.lights));
            composer.push("material", &material(signature.textures));
            if !signature.shadows.is_empty() {
                composer.push("shadows", &shadows(&signature.shadows));
            }
            composer.push("brdf", PBR);
        }
        OutputMode::Flat => composer.push("material", &material(signature.textures)),
        OutputMode::Pick | OutputMode::Segmentation => composer.push("draw", DRAW),
        OutputMode::Depth if signature.cuts_out_depth() => {
            composer.push("material", &material(signature.textures))
        }
        OutputMode::Depth => {}
    }

    if signature.output.is_shaded() {
        composer.push("vertex", &shaded_vertex(signature.vertex));
        composer.push("encoding", ENCODING);
    } else if signature.cuts_out_depth() {
        composer.push("vertex", &shaded_vertex(signature.vertex));
    } else {
        composer.push("vertex", POSITION_VERTEX);
    }

    match signature.output {
        OutputMode::Color | OutputMode::Flat => {
            composer.push("fragment", &shaded_fragment(signature))
        }
        OutputMode::Pick => composer.push("fragment", PICK_FRAGMENT),
        OutputMode::Segmentation => composer.push("fragment", SEGMENTATION_FRAGMENT),
        OutputMode::Depth if signature.cuts_out_depth() => {
            composer.push("fragment", &cutout_fragment(signature.textures))
        }
        OutputMode::Depth => {}
    }

    composer.finish(signature.has_fragment_stage())
}

/// Parses and validates a composed variant on the CPU.
///
/// Diagnostics name the fragment the first error span falls into.
pub fn validate(shader: &ComposedShader) -> Result<naga::Module, ShaderCompileError> {
    let module = naga::front::wgsl::parse_str(&shader.source).map_err(|e| {
        let fragment = e
            .location(&shader.source)
            .map_or("unknown", |loc| shader.fragment_at(loc.offset as usize));
        ShaderCompileError {
            fragment: fragment.to_string(),
            message: e.to_string(),
        }
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator.validate(&module).map_err(|e| {
        let fragment = e
            .spans()
            .find_map(|(span, _)| span.to_range())
            .map_or("unknown", |range| shader.fragment_at(range.start));
        ShaderCompileError {
            fragment: fragment.to_string(),
            message: e.into_inner().to_string(),
        }
    })?;

    Ok(module)
}

const CAMERA: &str = r#"struct CameraUniform {
    view_proj: mat4x4<f32>,
    view: mat4x4<f32>,
    position: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniform;
"#;

const DRAW: &str = r#"struct DrawUniform {
    color: vec4<f32>,
    id: vec4<u32>,
}

@group(1) @binding(0) var<uniform> draw: DrawUniform;
"#;

const ENCODING: &str = r#"fn encode_gamma(color: vec3<f32>) -> vec3<f32> {
    return pow(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), vec3<f32>(1.0 / 2.2));
}
"#;

const POSITION_VERTEX: &str = r#"struct VertexInput {
    @location(0) position: vec3<f32>,
}

struct InstanceInput {
    @location(8) model_0: vec4<f32>,
    @location(9) model_1: vec4<f32>,
    @location(10) model_2: vec4<f32>,
    @location(11) model_3: vec4<f32>,
}

@vertex
fn vs_main(vert: VertexInput, instance: InstanceInput) -> @builtin(position) vec4<f32> {
    let model = mat4x4<f32>(instance.model_0, instance.model_1, instance.model_2, instance.model_3);
    return camera.view_proj * model * vec4<f32>(vert.position, 1.0);
}
"#;

const PICK_FRAGMENT: &str = r#"@fragment
fn fs_main() -> @location(0) u32 {
    return draw.id.x;
}
"#;

const SEGMENTATION_FRAGMENT: &str = r#"@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return draw.color;
}
"#;

fn array_len(cap: usize) -> usize {
    cap.max(1)
}

fn lights(caps: &LightCaps) -> String {
    format!(
        r#"struct Light {{
    position: vec4<f32>,
    direction: vec4<f32>,
    color: vec4<f32>,
    cone: vec4<f32>,
    shadow: vec4<i32>,
}}

struct Lights {{
    ambient: vec4<f32>,
    counts: vec4<u32>,
    directional: array<Light, {}>,
    spot: array<Light, {}>,
    point: array<Light, {}>,
}}

@group(0) @binding(1) var<uniform> lights: Lights;
"#,
        array_len(caps.directional),
        array_len(caps.spot),
        array_len(caps.point),
    )
}

fn material(textures: TextureFlags) -> String {
    let mut out = String::from(
        r#"struct MaterialUniform {
    base_color: vec4<f32>,
    emissive: vec4<f32>,
    params: vec4<f32>,
    specular: vec4<f32>,
}

@group(1) @binding(0) var<uniform> material: MaterialUniform;
"#,
    );
    for (k, (_, name, _)) in texture_slots(textures).enumerate() {
        out.push_str(&format!(
            "@group(1) @binding({}) var {name}_texture: texture_2d<f32>;\n\
             @group(1) @binding({}) var {name}_sampler: sampler;\n",
            1 + 2 * k,
            2 + 2 * k,
        ));
    }
    out
}

/**
 * Shadow bindings and one lookup function per light kind.
 *
 * Matrices are laid out as all directional maps, then all spot maps, then six
 * faces per point map. Map bindings follow the same order starting at binding 2.
 */
fn shadows(counts: &ShadowCounts) -> String {
    let nd = counts.directional as usize;
    let ns = counts.spot as usize;
    let np = counts.point as usize;
    let mut out = format!(
        r#"@group(2) @binding(0) var shadow_sampler: sampler_comparison;

struct ShadowMatrices {{
    m: array<mat4x4<f32>, {}>,
}}

@group(2) @binding(1) var<uniform> shadow_matrices: ShadowMatrices;
"#,
        counts.matrix_count()
    );
    let mut binding = 2;
    for (kind, count, ty) in [
        ("directional", nd, "texture_depth_2d"),
        ("spot", ns, "texture_depth_2d"),
        ("point", np, "texture_depth_2d_array"),
    ] {
        for i in 0..count {
            out.push_str(&format!(
                "@group(2) @binding({binding}) var shadow_{kind}_{i}: {ty};\n"
            ));
            binding += 1;
        }
    }
    out.push('\n');
    out.push_str(SHADOW);

    let planar = |kind: &str, count: usize, first_matrix: usize| {
        let mut cases = String::new();
        for i in 0..count {
            cases.push_str(&format!(
                "        case {i}i: {{ lit = textureSampleCompareLevel(shadow_{kind}_{i}, shadow_sampler, p.xy, depth_ref); }}\n"
            ));
        }
        format!(
            r#"
fn {kind}_shadow(slot: i32, world: vec3<f32>) -> f32 {{
    if slot < 0i || slot >= {count}i {{
        return 1.0;
    }}
    let p = shadow_project(shadow_matrices.m[{first_matrix}i + slot], world);
    if shadow_outside(p) {{
        return 1.0;
    }}
    let depth_ref = p.z - lights.ambient.w;
    var lit = 1.0;
    switch slot {{
{cases}        default: {{}}
    }}
    return lit;
}}
"#
        )
    };
    if nd > 0 {
        out.push_str(&planar("directional", nd, 0));
    }
    if ns > 0 {
        out.push_str(&planar("spot", ns, nd));
    }
    if np > 0 {
        let mut cases = String::new();
        for i in 0..np {
            cases.push_str(&format!(
                "        case {i}i: {{ lit = textureSampleCompareLevel(shadow_point_{i}, shadow_sampler, p.xy, face, depth_ref); }}\n"
            ));
        }
        out.push_str(&format!(
            r#"
fn point_shadow(slot: i32, light_position: vec3<f32>, world: vec3<f32>) -> f32 {{
    if slot < 0i || slot >= {np}i {{
        return 1.0;
    }}
    let face = cube_face(world - light_position);
    let p = shadow_project(shadow_matrices.m[{}i + 6i * slot + face], world);
    if shadow_outside(p) {{
        return 1.0;
    }}
    let depth_ref = p.z - lights.ambient.w;
    var lit = 1.0;
    switch slot {{
{cases}        default: {{}}
    }}
    return lit;
}}
"#,
            nd + ns
        ));
    }
    out
}

fn shaded_vertex(vertex: VertexFlags) -> String {
    let has = |flag| vertex.contains(flag);
    let mut input = String::from("struct VertexInput {\n    @location(0) position: vec3<f32>,\n");
    for (flag, line) in [
        (VertexFlags::NORMAL, "@location(1) normal: vec3<f32>,"),
        (VertexFlags::TANGENT, "@location(2) tangent: vec4<f32>,"),
        (VertexFlags::TEXCOORD_0, "@location(3) uv0: vec2<f32>,"),
        (VertexFlags::TEXCOORD_1, "@location(4) uv1: vec2<f32>,"),
        (VertexFlags::COLOR_0, "@location(5) color0: vec4<f32>,"),
        (VertexFlags::JOINTS_0, "@location(6) joints0: vec4<u32>,"),
        (VertexFlags::WEIGHTS_0, "@location(7) weights0: vec4<f32>,"),
    ] {
        if has(flag) {
            input.push_str("    ");
            input.push_str(line);
            input.push('\n');
        }
    }
    input.push_str("}\n\n");

    input.push_str(
        r#"struct InstanceInput {
    @location(8) model_0: vec4<f32>,
    @location(9) model_1: vec4<f32>,
    @location(10) model_2: vec4<f32>,
    @location(11) model_3: vec4<f32>,
    @location(12) normal_0: vec4<f32>,
    @location(13) normal_1: vec4<f32>,
    @location(14) normal_2: vec4<f32>,
"#,
    );
    if has(VertexFlags::INSTANCE_COLOR) {
        input.push_str("    @location(15) color: vec4<f32>,\n");
    }
    input.push_str("}\n\n");

    let tangent_frame = has(VertexFlags::NORMAL) && has(VertexFlags::TANGENT);
    input.push_str(
        "struct VertexOutput {\n    @builtin(position) clip_position: vec4<f32>,\n    @location(0) world_position: vec3<f32>,\n",
    );
    if has(VertexFlags::NORMAL) {
        input.push_str("    @location(1) normal: vec3<f32>,\n");
    }
    if tangent_frame {
        input.push_str("    @location(2) tangent: vec3<f32>,\n    @location(3) bitangent: vec3<f32>,\n");
    }
    if has(VertexFlags::TEXCOORD_0) {
        input.push_str("    @location(4) uv0: vec2<f32>,\n");
    }
    if has(VertexFlags::TEXCOORD_1) {
        input.push_str("    @location(5) uv1: vec2<f32>,\n");
    }
    input.push_str("    @location(6) color: vec4<f32>,\n}\n\n");

    input.push_str(
        r#"@vertex
fn vs_main(vert: VertexInput, instance: InstanceInput) -> VertexOutput {
    let model = mat4x4<f32>(instance.model_0, instance.model_1, instance.model_2, instance.model_3);
    let world = model * vec4<f32>(vert.position, 1.0);
    var out: VertexOutput;
    out.clip_position = camera.view_proj * world;
    out.world_position = world.xyz;
"#,
    );
    if has(VertexFlags::NORMAL) {
        input.push_str(
            "    let normal_matrix = mat3x3<f32>(instance.normal_0.xyz, instance.normal_1.xyz, instance.normal_2.xyz);\n    out.normal = normalize(normal_matrix * vert.normal);\n",
        );
    }
    if tangent_frame {
        input.push_str(
            "    let tangent = normalize((model * vec4<f32>(vert.tangent.xyz, 0.0)).xyz);\n    out.tangent = tangent;\n    out.bitangent = cross(out.normal, tangent) * vert.tangent.w * instance.normal_0.w;\n",
        );
    }
    if has(VertexFlags::TEXCOORD_0) {
        input.push_str("    out.uv0 = vert.uv0;\n");
    }
    if has(VertexFlags::TEXCOORD_1) {
        input.push_str("    out.uv1 = vert.uv1;\n");
    }
    input.push_str("    var color = vec4<f32>(1.0);\n");
    if has(VertexFlags::COLOR_0) {
        input.push_str("    color = color * vert.color0;\n");
    }
    if has(VertexFlags::INSTANCE_COLOR) {
        input.push_str("    color = color * instance.color;\n");
    }
    input.push_str("    out.color = color;\n    return out;\n}\n");
    input
}

/// `fs_main` of masked depth variants: no colour output, only the alpha test.
fn cutout_fragment(textures: TextureFlags) -> String {
    let mut out = String::from("@fragment\nfn fs_main(in: VertexOutput) {\n");
    for (_, name, _) in texture_slots(textures) {
        out.push_str(&format!(
            "    let {name}_texel = textureSample({name}_texture, {name}_sampler, in.uv0);\n"
        ));
    }
    out.push_str("    var alpha = material.base_color.a * in.color.a;\n");
    for (_, name, _) in texture_slots(textures) {
        out.push_str(&format!("    alpha = alpha * {name}_texel.a;\n"));
    }
    out.push_str("    if alpha < material.emissive.w {\n        discard;\n    }\n}\n");
    out
}

/// `fs_main` of the lit and flat variants.
fn shaded_fragment(signature: &ShaderSignature) -> String {
    let vertex = signature.vertex;
    let textures = signature.textures;
    let lit = signature.output == OutputMode::Color;
    let has_normals = vertex.contains(VertexFlags::NORMAL);
    let normal_map = lit && textures.contains(TextureFlags::NORMAL);
    let tangent_frame = has_normals && vertex.contains(VertexFlags::TANGENT);

    let mut out = String::from(
        "@fragment\nfn fs_main(in: VertexOutput, @builtin(front_facing) front_facing: bool) -> @location(0) vec4<f32> {\n",
    );

    // Implicit derivatives only run in uniform control flow, so sampling comes first.
    for (_, name, _) in texture_slots(textures) {
        out.push_str(&format!(
            "    let {name}_texel = textureSample({name}_texture, {name}_sampler, in.uv0);\n"
        ));
    }
    let needs_dp = lit && (!has_normals || (normal_map && !tangent_frame));
    if needs_dp {
        out.push_str("    let dp_dx = dpdx(in.world_position);\n    let dp_dy = dpdy(in.world_position);\n");
    }
    if normal_map && !tangent_frame {
        out.push_str("    let duv_dx = dpdx(in.uv0);\n    let duv_dy = dpdy(in.uv0);\n");
    }

    out.push_str("    var base = material.base_color * in.color;\n");
    if textures.contains(TextureFlags::BASE_COLOR) {
        out.push_str("    base = base * base_color_texel;\n");
    }
    if textures.contains(TextureFlags::DIFFUSE) {
        out.push_str("    base = base * diffuse_texel;\n");
    }
    if signature.alpha == AlphaKind::Mask {
        out.push_str("    if base.a < material.emissive.w {\n        discard;\n    }\n");
    }

    if !lit {
        out.push_str("    return vec4<f32>(encode_gamma(base.rgb), base.a);\n}\n");
        return out;
    }

    out.push_str("    let view = normalize(camera.position.xyz - in.world_position);\n");
    if has_normals {
        out.push_str("    var n = normalize(in.normal);\n    if !front_facing {\n        n = -n;\n    }\n");
    } else {
        out.push_str("    var n = face_normal(dp_dx, dp_dy, view);\n");
    }
    if normal_map {
        if tangent_frame {
            out.push_str(
                "    let facing = select(-1.0, 1.0, front_facing);\n    let tbn = mat3x3<f32>(normalize(in.tangent) * facing, normalize(in.bitangent) * facing, n);\n",
            );
        } else {
            out.push_str("    let tbn = cotangent_frame(n, dp_dx, dp_dy, duv_dx, duv_dy);\n");
        }
        out.push_str("    n = normalize(tbn * (normal_texel.xyz * 2.0 - vec3<f32>(1.0)));\n");
    }

    out.push_str("    var surface: Surface;\n");
    match signature.material {
        MaterialKind::MetallicRoughness => {
            out.push_str("    var metallic = material.params.x;\n    var roughness = material.params.y;\n");
            if textures.contains(TextureFlags::METALLIC_ROUGHNESS) {
                out.push_str(
                    "    roughness = roughness * metallic_roughness_texel.g;\n    metallic = metallic * metallic_roughness_texel.b;\n",
                );
            }
            out.push_str(
                r#"    metallic = clamp(metallic, 0.0, 1.0);
    roughness = clamp(roughness, 0.04, 1.0);
    surface.f0 = mix(vec3<f32>(0.04), base.rgb, metallic);
    surface.diffuse = base.rgb * 0.96 * (1.0 - metallic);
"#,
            );
        }
        MaterialKind::SpecularGlossiness => {
            out.push_str("    var specular = material.specular.rgb;\n    var glossiness = material.params.z;\n");
            if textures.contains(TextureFlags::SPECULAR_GLOSSINESS) {
                out.push_str(
                    "    specular = specular * specular_glossiness_texel.rgb;\n    glossiness = glossiness * specular_glossiness_texel.a;\n",
                );
            }
            out.push_str(
                r#"    let roughness = clamp(1.0 - glossiness, 0.04, 1.0);
    surface.f0 = specular;
    surface.diffuse = base.rgb * (1.0 - max(max(specular.r, specular.g), specular.b));
"#,
            );
        }
    }
    out.push_str(
        r#"    surface.normal = n;
    surface.view = view;
    surface.alpha_roughness = roughness * roughness;
    var color = vec3<f32>(0.0);
"#,
    );

    let caps = &signature.lights;
    let shadows = &signature.shadows;
    if caps.directional > 0 {
        let visibility = if shadows.directional > 0 {
            "        visibility = directional_shadow(light.shadow.x, in.world_position);\n"
        } else {
            ""
        };
        out.push_str(&format!(
            r#"    for (var i = 0u; i < min(lights.counts.x, {}u); i += 1u) {{
        let light = lights.directional[i];
        let l = -normalize(light.direction.xyz);
        var visibility = 1.0;
{visibility}        color += visibility * shade(surface, l, light.color.rgb * light.direction.w);
    }}
"#,
            caps.directional
        ));
    }
    if caps.spot > 0 {
        let visibility = if shadows.spot > 0 {
            "        visibility = spot_shadow(light.shadow.x, in.world_position);\n"
        } else {
            ""
        };
        out.push_str(&format!(
            r#"    for (var i = 0u; i < min(lights.counts.y, {}u); i += 1u) {{
        let light = lights.spot[i];
        let to_light = light.position.xyz - in.world_position;
        let dist = length(to_light);
        let l = to_light / max(dist, 1e-5);
        var visibility = 1.0;
{visibility}        let attenuation = range_attenuation(light.position.w, dist) * spot_attenuation(light, l);
        color += visibility * attenuation * shade(surface, l, light.color.rgb * light.direction.w);
    }}
"#,
            caps.spot
        ));
    }
    if caps.point > 0 {
        let visibility = if shadows.point > 0 {
            "        visibility = point_shadow(light.shadow.x, light.position.xyz, in.world_position);\n"
        } else {
            ""
        };
        out.push_str(&format!(
            r#"    for (var i = 0u; i < min(lights.counts.z, {}u); i += 1u) {{
        let light = lights.point[i];
        let to_light = light.position.xyz - in.world_position;
        let dist = length(to_light);
        let l = to_light / max(dist, 1e-5);
        var visibility = 1.0;
{visibility}        let attenuation = range_attenuation(light.position.w, dist);
        color += visibility * attenuation * shade(surface, l, light.color.rgb * light.direction.w);
    }}
"#,
            caps.point
        ));
    }

    out.push_str("    color += lights.ambient.rgb * base.rgb;\n");
    if textures.contains(TextureFlags::OCCLUSION) {
        out.push_str("    color = color * occlusion_texel.r;\n");
    }
    out.push_str("    var emissive = material.emissive.rgb;\n");
    if textures.contains(TextureFlags::EMISSIVE) {
        out.push_str("    emissive = emissive * emissive_texel.rgb;\n");
    }
    out.push_str("    color += emissive;\n    return vec4<f32>(encode_gamma(color), base.a);\n}\n");
    out
}
