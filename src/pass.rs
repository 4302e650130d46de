//! Pass planning and light space maths.
//!
//! The renderer executes a frame as a fixed sequence of passes: shadow maps
//! first, then the main pass of the requested output, then the optional picking
//! pass. [`plan`] derives that sequence from a [`RenderQueue`];
//! [`shadow_matrices`] computes the light cameras a shadow pass renders with
//! and the colour pass samples through.

use std::f32::consts::{FRAC_PI_2, PI};

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Vector3, Vector4};

use crate::{
    config::DEFAULT_SCENE_SCALE,
    data_structures::{
        camera::{Camera, Projection, view_matrix},
        light::{LightKind, LightType},
        scene_graph::NodeHandle,
    },
    render::{LightEntry, LightSet, RenderQueue},
    shader::OutputMode,
};

/// One step of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Depth of the opaque items as seen from a shadow casting light.
    Shadow { light: NodeHandle, ty: LightType },
    /// The pass producing the requested output.
    Main(OutputMode),
    /// Node ids into the integer target.
    Pick,
}

/// Passes of a frame in execution order.
pub fn plan(queue: &RenderQueue) -> Vec<Pass> {
    let mut passes = Vec::new();
    if queue.output == OutputMode::Color {
        passes.extend(queue.lights.shadowed().map(|e| Pass::Shadow {
            light: e.node,
            ty: e.light.ty(),
        }));
    }
    match queue.output {
        OutputMode::Pick => passes.push(Pass::Pick),
        output => passes.push(Pass::Main(output)),
    }
    passes
}

/// Camera setup of one shadow map face.
#[derive(Debug, Clone)]
pub struct ShadowCamera {
    pub camera: Camera,
    pub pose: Matrix4<f32>,
}

impl ShadowCamera {
    pub fn view_proj(&self) -> Matrix4<f32> {
        self.camera.wgpu_projection(1, 1) * view_matrix(&self.pose)
    }
}

/// Viewing direction and up vector of the six cube faces: +X, -X, +Y, -Y, +Z, -Z.
const CUBE_FACES: [([f32; 3], [f32; 3]); 6] = [
    ([1.0, 0.0, 0.0], [0.0, -1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, -1.0, 0.0]),
    ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, -1.0, 0.0], [0.0, 0.0, -1.0]),
    ([0.0, 0.0, 1.0], [0.0, -1.0, 0.0]),
    ([0.0, 0.0, -1.0], [0.0, -1.0, 0.0]),
];

/// The light pose with scale removed from its rotation columns.
fn orthonormal(pose: &Matrix4<f32>) -> Matrix4<f32> {
    let axis = |v: Vector4<f32>, fallback: Vector3<f32>| {
        let v = v.truncate();
        if v.magnitude2() == 0.0 {
            fallback
        } else {
            v.normalize()
        }
    };
    Matrix4::from_cols(
        axis(pose.x, Vector3::unit_x()).extend(0.0),
        axis(pose.y, Vector3::unit_y()).extend(0.0),
        axis(pose.z, Vector3::unit_z()).extend(0.0),
        pose.w,
    )
}

fn square_perspective(yfov: f32, znear: f32, zfar: Option<f32>) -> Camera {
    let mut camera = Camera::perspective(yfov).with_clip(znear, zfar);
    if let Projection::Perspective { aspect_ratio, .. } = &mut camera.projection {
        *aspect_ratio = Some(1.0);
    }
    camera
}

/**
 * Cameras rendering the shadow map of a light.
 *
 * # Arguments
 *
 * * `entry` is the shadow casting light with its world pose
 * * `centroid` and `scale` describe the scene bounds; directional shadows
 *   cover a box of `scale` around the centroid
 *
 * Directional and spot lights get one camera, point lights one per cube face.
 */
pub fn shadow_cameras(entry: &LightEntry, centroid: Vector3<f32>, scale: f32) -> Vec<ShadowCamera> {
    let s = if scale > 0.0 { scale } else { DEFAULT_SCENE_SCALE };
    let znear = 0.01 * s;
    let zfar = Some(10.0 * s);
    let pose = orthonormal(&entry.pose);
    match entry.light.kind {
        LightKind::Directional => {
            let mut pose = pose;
            pose.w = (centroid - entry.direction() * s).extend(1.0);
            vec![ShadowCamera {
                camera: Camera::orthographic(s, s).with_clip(znear, zfar),
                pose,
            }]
        }
        LightKind::Spot { outer_cone_angle, .. } => {
            let yfov = (2.0 * outer_cone_angle + PI / 16.0).clamp(0.01, PI - 0.01);
            vec![ShadowCamera {
                camera: square_perspective(yfov, znear, zfar),
                pose,
            }]
        }
        LightKind::Point { .. } => {
            let eye = Point3::from_vec(entry.position());
            CUBE_FACES
                .iter()
                .map(|(dir, up)| {
                    let camera = square_perspective(FRAC_PI_2, znear, zfar);
                    let view = Matrix4::look_to_rh(eye, Vector3::from(*dir), Vector3::from(*up));
                    ShadowCamera {
                        camera,
                        pose: view_matrix(&view),
                    }
                })
                .collect()
        }
    }
}

/// Light space view-projections of one light, in face order for point lights.
pub fn shadow_matrices(entry: &LightEntry, centroid: Vector3<f32>, scale: f32) -> Vec<Matrix4<f32>> {
    shadow_cameras(entry, centroid, scale)
        .iter()
        .map(ShadowCamera::view_proj)
        .collect()
}

/**
 * All shadow matrices of a frame in the layout the colour pass indexes:
 * directional maps by slot, then spot maps by slot, then six faces per point
 * map by slot.
 */
pub fn frame_shadow_matrices(lights: &LightSet, centroid: Vector3<f32>, scale: f32) -> Vec<Matrix4<f32>> {
    let mut out = Vec::new();
    for ty in [LightType::Directional, LightType::Spot, LightType::Point] {
        let mut shadowed: Vec<&LightEntry> = lights.get(ty).iter().filter(|e| e.shadow.is_some()).collect();
        shadowed.sort_by_key(|e| e.shadow);
        for entry in shadowed {
            out.extend(shadow_matrices(entry, centroid, scale));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use cgmath::{Deg, EuclideanSpace, SquareMatrix, Transform};
    use slotmap::SlotMap;

    use super::*;
    use crate::{
        config::RenderConfig,
        data_structures::{
            light::Light,
            model::{Material, Mesh},
            scene_graph::{Node, Scene},
        },
    };

    fn entry(light: Light, pose: Matrix4<f32>) -> LightEntry {
        let mut arena: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        LightEntry {
            node: arena.insert(()),
            light,
            pose,
            shadow: Some(0),
        }
    }

    fn to_ndc(m: &Matrix4<f32>, p: Vector3<f32>) -> Vector3<f32> {
        let clip = m * p.extend(1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn directional_camera_backs_off_from_centroid() {
        let down = Matrix4::from_angle_x(Deg(-90.0));
        let light = entry(Light::directional(), down);
        let centroid = Vector3::new(1.0, 2.0, 3.0);
        let cams = shadow_cameras(&light, centroid, 4.0);
        assert_eq!(cams.len(), 1);
        // the light shines down, so the camera sits above the centroid
        let eye = cams[0].pose.w.truncate();
        assert!((eye - Vector3::new(1.0, 6.0, 3.0)).magnitude() < 1e-4);
        assert_eq!(cams[0].camera.znear, 0.04);
        assert_eq!(cams[0].camera.zfar(), Some(40.0));

        // the centroid projects to the centre of the map
        let ndc = to_ndc(&cams[0].view_proj(), centroid);
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn degenerate_scenes_use_default_scale() {
        let light = entry(Light::directional(), Matrix4::identity());
        let cams = shadow_cameras(&light, Vector3::new(0.0, 0.0, 0.0), 0.0);
        let eye = cams[0].pose.w.truncate();
        assert!((eye - Vector3::new(0.0, 0.0, DEFAULT_SCENE_SCALE)).magnitude() < 1e-5);
    }

    #[test]
    fn spot_field_of_view_covers_the_cone() {
        let light = entry(Light::spot(), Matrix4::from_translation(Vector3::new(0.0, 0.0, 5.0)));
        let cams = shadow_cameras(&light, Vector3::new(0.0, 0.0, 0.0), 2.0);
        match cams[0].camera.projection {
            Projection::Perspective { yfov, aspect_ratio, .. } => {
                assert!((yfov - (std::f32::consts::FRAC_PI_2 + PI / 16.0)).abs() < 1e-5);
                assert_eq!(aspect_ratio, Some(1.0));
            }
            _ => panic!("spot shadows use a perspective camera"),
        }
        // a point on the cone axis lands in the middle of the map
        let ndc = to_ndc(&cams[0].view_proj(), Vector3::new(0.0, 0.0, 1.0));
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
    }

    #[test]
    fn point_faces_look_along_the_axes() {
        let position = Vector3::new(1.0, 1.0, 1.0);
        let light = entry(Light::point(), Matrix4::from_translation(position));
        let matrices = shadow_matrices(&light, Vector3::new(0.0, 0.0, 0.0), 2.0);
        assert_eq!(matrices.len(), 6);
        let probes = [
            Vector3::unit_x(),
            -Vector3::unit_x(),
            Vector3::unit_y(),
            -Vector3::unit_y(),
            Vector3::unit_z(),
            -Vector3::unit_z(),
        ];
        for (face, m) in matrices.iter().enumerate() {
            let ndc = to_ndc(m, position + probes[face]);
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "face {face} misses its axis");
            assert!(ndc.z > 0.0 && ndc.z < 1.0);
        }
        // the camera poses are proper inverses of the face views
        let cams = shadow_cameras(&light, Vector3::new(0.0, 0.0, 0.0), 2.0);
        let eye = cams[2].pose.transform_point(Point3::origin());
        assert!((eye.to_vec() - position).magnitude() < 1e-5);
    }

    #[test]
    fn frame_matrices_follow_slot_layout() {
        let mut scene = Scene::new();
        scene
            .add(Node::mesh(Mesh::cube(std::sync::Arc::new(Material::default()))), None)
            .unwrap();
        scene.add(Node::light(Light::point().with_shadow(true)), None).unwrap();
        scene.add(Node::light(Light::directional().with_shadow(true)), None).unwrap();
        scene.add(Node::light(Light::spot().with_shadow(true)), None).unwrap();
        scene.add(Node::light(Light::spot()), None).unwrap();
        let queue = RenderQueue::build(&scene, (8, 8), OutputMode::Color, &RenderConfig::default());
        let matrices = frame_shadow_matrices(&queue.lights, queue.scene_centroid, queue.scene_scale);
        assert_eq!(matrices.len(), queue.lights.shadow_counts().matrix_count());
        assert_eq!(matrices.len(), 8);
        let dir = shadow_matrices(&queue.lights.directional[0], queue.scene_centroid, queue.scene_scale);
        assert_eq!(matrices[0], dir[0]);

        let passes = plan(&queue);
        assert_eq!(passes.len(), 4);
        assert!(matches!(passes[0], Pass::Shadow { ty: LightType::Directional, .. }));
        assert_eq!(passes[3], Pass::Main(OutputMode::Color));

        let pick = RenderQueue::build(&scene, (8, 8), OutputMode::Pick, &RenderConfig::default());
        assert_eq!(plan(&pick), vec![Pass::Pick]);
    }
}
