use std::sync::Arc;

use pbr_ngin::{
    Camera, Material, Mesh, Node, NodeHandle, RenderConfig, Renderer, Scene,
    cgmath::{Matrix4, Vector3},
    image::DynamicImage,
};

pub const SIZE: u32 = 32;

/// Headless renderer, or `None` on machines without a usable adapter.
pub fn renderer(config: RenderConfig) -> Option<Renderer> {
    match Renderer::headless(config) {
        Ok(renderer) => Some(renderer),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

/// A unit cube at the origin seen from `+Z` at a distance of three units.
pub struct CubeScene {
    pub scene: Scene,
    pub cube: NodeHandle,
    pub camera: NodeHandle,
}

pub fn cube_scene(base_color: [f32; 4]) -> CubeScene {
    cube_scene_with(Material::with_base_color(base_color))
}

pub fn cube_scene_with(material: Material) -> CubeScene {
    let mut scene = Scene::new();
    scene.bg_color = [1.0, 1.0, 1.0, 1.0];
    let camera = scene
        .add(
            Node::camera(Camera::perspective(1.0).with_clip(0.05, Some(100.0)))
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 0.0, 3.0))),
            None,
        )
        .unwrap();
    let cube = scene
        .add(
            Node::mesh(Mesh::cube(Arc::new(material))).named("cube"),
            None,
        )
        .unwrap();
    CubeScene { scene, cube, camera }
}

pub fn rgb(image: &DynamicImage, x: u32, y: u32) -> [u8; 3] {
    image.to_rgb8().get_pixel(x, y).0
}
