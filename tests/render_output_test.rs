#![cfg(feature = "integration-tests")]

mod common;

use std::{collections::HashMap, sync::Arc};

use pbr_ngin::{
    AlphaMode, Camera, FrameState, Material, Mesh, RenderConfig, RenderFlags, RenderMode, RenderOutput, Scene,
    cgmath::{Matrix4, Vector3},
    data_structures::{light::Light, scene_graph::Node},
};

use crate::common::test_utils::{SIZE, cube_scene, cube_scene_with, renderer, rgb};

fn flat_config() -> RenderConfig {
    RenderConfig {
        flags: RenderFlags::FLAT,
        ..Default::default()
    }
}

#[test]
fn empty_scene_renders_the_background() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let mut scene = Scene::new();
    scene.bg_color = [1.0, 1.0, 1.0, 1.0];

    let output = renderer.render(&scene, (SIZE, SIZE), RenderMode::Color).unwrap();
    let RenderOutput::Color(image) = output else {
        panic!("expected a colour image, got {output:?}");
    };
    assert_eq!((image.width(), image.height()), (SIZE, SIZE));
    assert!(image.to_rgb8().pixels().all(|p| p.0 == [255, 255, 255]));
    assert_eq!(renderer.state(), FrameState::Idle);
}

#[test]
fn rgba_flag_clears_to_transparent() {
    let Some(mut renderer) = renderer(RenderConfig {
        flags: RenderFlags::RGBA,
        ..Default::default()
    }) else {
        return;
    };
    let scene = Scene::new();
    let RenderOutput::Color(image) = renderer.render(&scene, (8, 8), RenderMode::Color).unwrap() else {
        panic!("expected a colour image");
    };
    assert!(image.to_rgba8().pixels().all(|p| p.0[3] == 0));
}

#[test]
fn flat_cube_covers_the_centre() {
    let Some(mut renderer) = renderer(flat_config()) else {
        return;
    };
    let cube = cube_scene([1.0, 0.0, 0.0, 1.0]);
    let RenderOutput::Color(image) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Color).unwrap() else {
        panic!("expected a colour image");
    };
    assert_eq!(rgb(&image, SIZE / 2, SIZE / 2), [255, 0, 0]);
    assert_eq!(rgb(&image, 0, 0), [255, 255, 255]);
}

#[test]
fn depth_is_linear_and_zero_on_background() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let cube = cube_scene([1.0; 4]);
    let RenderOutput::Depth(depth) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Depth).unwrap() else {
        panic!("expected a depth image");
    };
    let centre = depth.get(SIZE / 2, SIZE / 2).unwrap();
    assert!((centre - 2.5).abs() < 0.05, "centre depth {centre}");
    assert_eq!(depth.get(0, 0), Some(0.0));
}

#[test]
fn raw_depth_flag_keeps_stored_values() {
    let Some(mut renderer) = renderer(RenderConfig {
        flags: RenderFlags::RAW_DEPTH,
        ..Default::default()
    }) else {
        return;
    };
    let cube = cube_scene([1.0; 4]);
    let RenderOutput::Depth(depth) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Depth).unwrap() else {
        panic!("expected a depth image");
    };
    let centre = depth.get(SIZE / 2, SIZE / 2).unwrap();
    assert!(centre > 0.0 && centre < 1.0, "centre depth {centre}");
    assert_eq!(depth.get(0, 0), Some(1.0));

    // the flag also applies to depth returned next to colour
    renderer.set_config(RenderConfig {
        flags: RenderFlags::FLAT | RenderFlags::DEPTH | RenderFlags::RAW_DEPTH,
        ..Default::default()
    });
    let RenderOutput::ColorDepth(_, depth) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Color).unwrap()
    else {
        panic!("expected colour and depth");
    };
    assert_eq!(depth.get(SIZE / 2, SIZE / 2), Some(centre));
    assert_eq!(depth.get(0, 0), Some(1.0));
}

#[test]
fn masked_fragments_leave_no_depth() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let mut material = Material::with_base_color([1.0, 1.0, 1.0, 0.2]);
    material.alpha_mode = AlphaMode::Mask;
    let cube = cube_scene_with(material);
    let RenderOutput::Depth(depth) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Depth).unwrap() else {
        panic!("expected a depth image");
    };
    assert_eq!(depth.get(SIZE / 2, SIZE / 2), Some(0.0));

    let mut material = Material::with_base_color([1.0, 1.0, 1.0, 0.8]);
    material.alpha_mode = AlphaMode::Mask;
    let cube = cube_scene_with(material);
    let RenderOutput::Depth(depth) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Depth).unwrap() else {
        panic!("expected a depth image");
    };
    assert!(depth.get(SIZE / 2, SIZE / 2).unwrap() > 0.0);
}

/// A lit floor facing the camera, with an optional cube between it and a shadow casting point light.
fn floor_scene(caster: Option<Material>) -> Scene {
    let mut scene = Scene::new();
    scene.bg_color = [1.0, 1.0, 1.0, 1.0];
    scene
        .add(
            Node::camera(Camera::perspective(1.0).with_clip(0.05, Some(100.0)))
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 0.0, 6.0))),
            None,
        )
        .unwrap();
    scene
        .add(
            Node::mesh(Mesh::cube(Arc::new(Material::with_base_color([0.8, 0.8, 0.8, 1.0]))))
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 0.0, -3.0)) * Matrix4::from_scale(4.0)),
            None,
        )
        .unwrap();
    scene
        .add(
            Node::light(Light::point().with_intensity(20.0).with_shadow(true))
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 0.0, 2.0))),
            None,
        )
        .unwrap();
    if let Some(material) = caster {
        scene.add(Node::mesh(Mesh::cube(Arc::new(material))), None).unwrap();
    }
    scene
}

#[test]
fn masked_casters_let_light_through() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let mut centre = |scene: &Scene| {
        let RenderOutput::Color(image) = renderer.render(scene, (SIZE, SIZE), RenderMode::Color).unwrap() else {
            panic!("expected a colour image");
        };
        rgb(&image, SIZE / 2, SIZE / 2)
    };

    let mut material = Material::with_base_color([1.0, 1.0, 1.0, 0.2]);
    material.alpha_mode = AlphaMode::Mask;
    let unshadowed = centre(&floor_scene(None));
    let through = centre(&floor_scene(Some(material)));
    assert_ne!(unshadowed, [255, 255, 255]);
    // the cut out cube is invisible and casts no shadow on the floor behind it
    for (a, b) in through.iter().zip(unshadowed) {
        assert!(a.abs_diff(b) <= 2, "{through:?} vs {unshadowed:?}");
    }
}

#[test]
fn depth_flag_adds_depth_to_colour() {
    let Some(mut renderer) = renderer(RenderConfig {
        flags: RenderFlags::FLAT | RenderFlags::DEPTH,
        ..Default::default()
    }) else {
        return;
    };
    let cube = cube_scene([0.0, 0.0, 1.0, 1.0]);
    let output = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Color).unwrap();
    let RenderOutput::ColorDepth(image, depth) = output else {
        panic!("expected colour and depth, got {output:?}");
    };
    assert_eq!(rgb(&image, SIZE / 2, SIZE / 2), [0, 0, 255]);
    assert!(depth.get(SIZE / 2, SIZE / 2).unwrap() > 0.0);
}

#[test]
fn picking_resolves_nodes() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let cube = cube_scene([1.0; 4]);
    let RenderOutput::NodeIds(ids) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Pick).unwrap() else {
        panic!("expected node ids");
    };
    assert_eq!(ids.get(SIZE / 2, SIZE / 2), Some(cube.cube));
    assert_eq!(ids.get(0, 0), None);
    assert_eq!(ids.id(0, 0), Some(0));
}

#[test]
fn segmentation_paints_listed_nodes_only() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let cube = cube_scene([1.0; 4]);

    let colors = HashMap::from([(cube.cube, [0, 255, 0])]);
    let RenderOutput::Segmentation(image) = renderer
        .render(&cube.scene, (SIZE, SIZE), RenderMode::Segmentation(colors))
        .unwrap()
    else {
        panic!("expected a segmentation image");
    };
    assert_eq!(rgb(&image, SIZE / 2, SIZE / 2), [0, 255, 0]);
    assert_eq!(rgb(&image, 0, 0), [0, 0, 0]);

    let RenderOutput::Segmentation(image) = renderer
        .render(&cube.scene, (SIZE, SIZE), RenderMode::Segmentation(HashMap::new()))
        .unwrap()
    else {
        panic!("expected a segmentation image");
    };
    assert!(image.to_rgb8().pixels().all(|p| p.0 == [0, 0, 0]));
}

#[test]
fn lit_frame_with_more_shadow_casters_than_the_caps() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let mut cube = cube_scene([0.8, 0.8, 0.8, 1.0]);
    for i in 0..6 {
        let angle = i as f32;
        cube.scene
            .add(
                Node::light(Light::point().with_intensity(5.0).with_shadow(true)).with_transform(
                    Matrix4::from_translation(Vector3::new(2.0 * angle.cos(), 1.5, 2.0 * angle.sin() + 1.0)),
                ),
                None,
            )
            .unwrap();
    }
    cube.scene
        .add(Node::light(Light::directional().with_shadow(true)), None)
        .unwrap();

    let RenderOutput::Color(image) = renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Color).unwrap() else {
        panic!("expected a colour image");
    };
    assert_ne!(rgb(&image, SIZE / 2, SIZE / 2), [255, 255, 255]);
    // one colour target plus at most four point maps and one directional map
    assert!(renderer.live_targets() <= 6, "{} live targets", renderer.live_targets());
    assert_eq!(renderer.state(), FrameState::Idle);

    // variants are reused by the next frame
    let compiled = renderer.shader_count();
    renderer.render(&cube.scene, (SIZE, SIZE), RenderMode::Color).unwrap();
    assert_eq!(renderer.shader_count(), compiled);
}

#[test]
fn shared_scenes_are_unlocked_while_rendering() {
    let Some(mut renderer) = renderer(flat_config()) else {
        return;
    };
    let cube = cube_scene([1.0, 0.0, 0.0, 1.0]);
    let handle = cube.cube;
    let shared = cube.scene.into_shared();

    let output = renderer.render_shared(&shared, (SIZE, SIZE), RenderMode::Pick).unwrap();
    assert!(shared.try_lock().is_some());
    let RenderOutput::NodeIds(ids) = output else {
        panic!("expected node ids");
    };
    assert_eq!(ids.get(SIZE / 2, SIZE / 2), Some(handle));
}
