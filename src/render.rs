//! Render queue construction and draw batching.
//!
//! This module turns a [`Scene`] into a [`RenderQueue`]: a fully owned snapshot
//! of everything a frame needs. Once built, the queue no longer references the
//! scene, so the scene lock can be released before any GPU work starts.
//!
//! # Key types
//!
//! - [`DrawItem`] is one primitive of one mesh node with all of its instances
//! - [`LightSet`] holds the capped, per-kind light lists and their shadow slots
//! - [`FrameCamera`] holds the matrices of the camera the frame is rendered from
//!
//! Items are ordered for drawing: opaque items first, in
//! insertion order, then blended items back to front.

use std::{cmp::Ordering, sync::Arc};

use cgmath::{InnerSpace, Matrix4, Vector3, Vector4};

use crate::{
    config::{RenderConfig, SHADOW_SLOT_LIMIT},
    data_structures::{
        camera::{Camera, view_matrix},
        light::{Light, LightType},
        model::{Bounds, Primitive, merge_bounds, transform_bounds},
        scene_graph::{Node, NodeHandle, Scene},
    },
    shader::{OutputMode, ShaderSignature, ShadowCounts, signature::blends},
};

/// One primitive of a mesh node, drawn with GPU instancing.
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub node: NodeHandle,
    /// 1-based index of `node` in the frame's node table; `0` is the background.
    pub pick_id: u32,
    pub primitive: Arc<Primitive>,
    /// World matrix of every instance: the node's world transform times the instance pose.
    pub instances: Vec<Matrix4<f32>>,
    /// One colour per instance when the primitive carries instance colours.
    pub instance_colors: Option<Vec<[f32; 4]>>,
    pub blend: bool,
    /// Position in traversal order.
    pub order: usize,
    /// Distance in front of the camera of the centre of the item's world bounds.
    pub depth: f32,
    pub signature: ShaderSignature,
}

/// A light selected for the frame.
#[derive(Debug, Clone)]
pub struct LightEntry {
    pub node: NodeHandle,
    pub light: Light,
    pub pose: Matrix4<f32>,
    /// Index among the frame's shadow maps of this light kind.
    pub shadow: Option<u8>,
}

impl LightEntry {
    pub fn position(&self) -> Vector3<f32> {
        self.pose.w.truncate()
    }

    /// World space direction the light shines along, the node's `-Z` axis.
    pub fn direction(&self) -> Vector3<f32> {
        let z = self.pose.z.truncate();
        if z.magnitude2() == 0.0 {
            return -Vector3::unit_z();
        }
        -z.normalize()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LightSet {
    pub directional: Vec<LightEntry>,
    pub spot: Vec<LightEntry>,
    pub point: Vec<LightEntry>,
}

impl LightSet {
    pub fn get(&self, ty: LightType) -> &[LightEntry] {
        match ty {
            LightType::Directional => &self.directional,
            LightType::Spot => &self.spot,
            LightType::Point => &self.point,
        }
    }

    fn get_mut(&mut self, ty: LightType) -> &mut Vec<LightEntry> {
        match ty {
            LightType::Directional => &mut self.directional,
            LightType::Spot => &mut self.spot,
            LightType::Point => &mut self.point,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LightEntry> {
        self.directional
            .iter()
            .chain(self.spot.iter())
            .chain(self.point.iter())
    }

    pub fn len(&self) -> usize {
        self.directional.len() + self.spot.len() + self.point.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shadow maps of each kind; slots are dense, so this is the number of shadowed lights.
    pub fn shadow_counts(&self) -> ShadowCounts {
        let count = |entries: &[LightEntry]| {
            let shadowed = entries.iter().filter(|e| e.shadow.is_some()).count();
            u8::try_from(shadowed).unwrap_or(u8::MAX)
        };
        ShadowCounts {
            directional: count(&self.directional),
            spot: count(&self.spot),
            point: count(&self.point),
        }
    }

    /// Lights that render a shadow map this frame.
    pub fn shadowed(&self) -> impl Iterator<Item = &LightEntry> {
        self.iter().filter(|e| e.shadow.is_some())
    }

    /**
     * Collects the lights of `scene` and applies the per-kind caps.
     *
     * Directional lights keep traversal order. Spot and point lights over the
     * cap keep those nearest `centroid`; equally distant lights keep traversal
     * order. Shadow slots are then handed out in the same order until the
     * shadow map budget is exhausted.
     */
    fn collect(scene: &Scene, nodes: &[NodeHandle], centroid: Vector3<f32>, config: &RenderConfig, shadows: bool) -> Self {
        let mut set = LightSet::default();
        for &handle in nodes {
            let Some(light) = scene.get(handle).and_then(Node::get_light) else {
                continue;
            };
            let Ok(pose) = scene.world_transform(handle) else {
                continue;
            };
            set.get_mut(light.ty()).push(LightEntry {
                node: handle,
                light: light.clone(),
                pose,
                shadow: None,
            });
        }

        for ty in [LightType::Directional, LightType::Spot, LightType::Point] {
            let cap = config.max_lights.get(ty);
            let entries = set.get_mut(ty);
            if entries.len() <= cap {
                continue;
            }
            log::debug!("dropping {} {ty:?} lights over the cap of {cap}", entries.len() - cap);
            if ty == LightType::Directional {
                entries.truncate(cap);
                continue;
            }
            let mut ranked: Vec<(usize, f32)> = entries
                .iter()
                .enumerate()
                .map(|(i, e)| (i, (e.position() - centroid).magnitude2()))
                .collect();
            ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
            let mut keep: Vec<usize> = ranked.into_iter().take(cap).map(|(i, _)| i).collect();
            keep.sort_unstable();
            let mut index = 0;
            entries.retain(|_| {
                let kept = keep.binary_search(&index).is_ok();
                index += 1;
                kept
            });
        }

        if shadows {
            let mut budget = config.max_shadow_maps.min(SHADOW_SLOT_LIMIT);
            if budget < config.max_shadow_maps {
                log::warn!("max_shadow_maps of {} clamped to {budget}", config.max_shadow_maps);
            }
            for ty in [LightType::Directional, LightType::Spot, LightType::Point] {
                if !config.shadows.enabled(ty) {
                    continue;
                }
                let mut slot = 0u8;
                for entry in set.get_mut(ty).iter_mut().filter(|e| e.light.casts_shadow) {
                    if budget == 0 {
                        log::warn!("shadow map budget exhausted, {ty:?} light {:?} is lit without shadows", entry.node);
                        continue;
                    }
                    entry.shadow = Some(slot);
                    // the clamped budget keeps slots below u8::MAX
                    slot = slot.saturating_add(1);
                    budget -= 1;
                }
            }
        }
        set
    }
}

/// The camera of a frame with its derived matrices.
#[derive(Debug, Clone)]
pub struct FrameCamera {
    /// `None` for a synthesised default camera.
    pub node: Option<NodeHandle>,
    pub camera: Camera,
    pub pose: Matrix4<f32>,
    pub view: Matrix4<f32>,
    /// Projection remapped to the wgpu clip space.
    pub projection: Matrix4<f32>,
    pub view_proj: Matrix4<f32>,
}

impl FrameCamera {
    fn new(scene: &Scene, viewport: (u32, u32)) -> Self {
        let main = scene.main_camera();
        let view = view_matrix(&main.pose);
        let projection = main.camera.wgpu_projection(viewport.0, viewport.1);
        Self {
            node: main.node,
            camera: main.camera,
            pose: main.pose,
            view,
            projection,
            view_proj: projection * view,
        }
    }

    pub fn position(&self) -> Vector3<f32> {
        self.pose.w.truncate()
    }

    /// Distance of `point` in front of the camera along its viewing axis.
    pub fn depth_of(&self, point: Vector3<f32>) -> f32 {
        -(self.view * point.extend(1.0)).z
    }
}

/// Everything a frame draws, detached from the scene.
#[derive(Debug, Clone)]
pub struct RenderQueue {
    pub items: Vec<DrawItem>,
    pub lights: LightSet,
    pub camera: FrameCamera,
    /// Mesh nodes in traversal order; pick id `i` refers to `node_table[i - 1]`.
    pub node_table: Vec<NodeHandle>,
    pub viewport: (u32, u32),
    pub output: OutputMode,
    pub bg_color: [f32; 4],
    pub ambient_light: [f32; 3],
    pub scene_centroid: Vector3<f32>,
    pub scene_scale: f32,
}

impl RenderQueue {
    /**
     * Builds the queue of a frame.
     *
     * # Arguments
     *
     * * `scene` is traversed depth first, parents before children, skipping invisible subtrees
     * * `viewport` is the output size in pixels, used for the camera aspect ratio
     * * `output` selects the shader variants of the draw items
     * * `config` provides light caps, shadow toggles and texture and raster switches
     */
    pub fn build(scene: &Scene, viewport: (u32, u32), output: OutputMode, config: &RenderConfig) -> Self {
        let nodes = scene.visible_nodes();
        let centroid = scene.centroid();
        let scale = scene.scale();
        let camera = FrameCamera::new(scene, viewport);
        let lights = LightSet::collect(scene, &nodes, centroid, config, output == OutputMode::Color);
        let shadow_counts = lights.shadow_counts();

        let mut items = Vec::new();
        let mut node_table = Vec::new();
        for &handle in &nodes {
            let Some(mesh) = scene.get(handle).and_then(Node::get_mesh) else {
                continue;
            };
            if !mesh.visible || mesh.primitives.is_empty() {
                continue;
            }
            let Ok(world) = scene.world_transform(handle) else {
                continue;
            };
            node_table.push(handle);
            let pick_id = node_table.len() as u32;
            for primitive in &mesh.primitives {
                let instances: Vec<Matrix4<f32>> = (0..primitive.instance_count())
                    .map(|i| world * primitive.pose(i))
                    .collect();
                let instance_colors = primitive.instance_colors.as_ref().map(|colors| {
                    (0..instances.len())
                        .map(|i| colors.get(i).copied().unwrap_or([1.0; 4]))
                        .collect()
                });
                let depth = item_center(primitive, &instances).map_or(0.0, |c| camera.depth_of(c));
                items.push(DrawItem {
                    node: handle,
                    pick_id,
                    primitive: primitive.clone(),
                    instances,
                    instance_colors,
                    blend: blends(primitive),
                    order: items.len(),
                    depth,
                    signature: ShaderSignature::for_draw(primitive, config, output, shadow_counts),
                });
            }
        }
        sort_items(&mut items);
        log::debug!(
            "render queue: {} items, {} lights, {} shadow maps",
            items.len(),
            lights.len(),
            shadow_counts.directional + shadow_counts.spot + shadow_counts.point
        );

        Self {
            items,
            lights,
            camera,
            node_table,
            viewport,
            output,
            bg_color: scene.bg_color,
            ambient_light: scene.ambient_light,
            scene_centroid: centroid,
            scene_scale: scale,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn opaque(&self) -> impl Iterator<Item = &DrawItem> {
        self.items.iter().filter(|i| !i.blend)
    }

    pub fn blended(&self) -> impl Iterator<Item = &DrawItem> {
        self.items.iter().filter(|i| i.blend)
    }

    /// Node behind a pick id read from the id target.
    pub fn node_for_pick_id(&self, id: u32) -> Option<NodeHandle> {
        let index = id.checked_sub(1)? as usize;
        self.node_table.get(index).copied()
    }
}

/// Centre of the world bounds of all instances of a primitive.
fn item_center(primitive: &Primitive, instances: &[Matrix4<f32>]) -> Option<Vector3<f32>> {
    let local = primitive.vertex_bounds()?;
    let world: Bounds = instances
        .iter()
        .map(|m| transform_bounds(&local, m))
        .fold(None, merge_bounds)?;
    let [min, max] = world;
    let center = (Vector4::new(min[0], min[1], min[2], 1.0) + Vector4::new(max[0], max[1], max[2], 1.0)) / 2.0;
    Some(center.truncate())
}

/// Opaque before blended; blended back to front; ties keep insertion order.
fn sort_items(items: &mut [DrawItem]) {
    items.sort_by(|a, b| match (a.blend, b.blend) {
        (false, false) => a.order.cmp(&b.order),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => b.depth.total_cmp(&a.depth).then(a.order.cmp(&b.order)),
    });
}

#[cfg(test)]
mod tests {
    use cgmath::{Matrix4, SquareMatrix, Vector3};

    use super::*;
    use crate::data_structures::{
        camera::Camera,
        light::Light,
        model::{AlphaMode, Material, Mesh},
    };

    fn opaque() -> Arc<Material> {
        Arc::new(Material::default())
    }

    fn translucent() -> Arc<Material> {
        Arc::new(Material::with_base_color([1.0, 1.0, 1.0, 0.5]).alpha_mode(AlphaMode::Blend))
    }

    fn at(x: f32, y: f32, z: f32) -> Matrix4<f32> {
        Matrix4::from_translation(Vector3::new(x, y, z))
    }

    /// A camera at the origin looking down `-Z`.
    fn scene_with_camera() -> Scene {
        let mut scene = Scene::new();
        scene
            .add(Node::camera(Camera::perspective(1.0)), None)
            .unwrap();
        scene
    }

    fn add_cube(scene: &mut Scene, material: Arc<Material>, pose: Matrix4<f32>) -> NodeHandle {
        scene
            .add(Node::mesh(Mesh::cube(material)).with_transform(pose), None)
            .unwrap()
    }

    fn build(scene: &Scene) -> RenderQueue {
        RenderQueue::build(scene, (64, 64), OutputMode::Color, &RenderConfig::default())
    }

    #[test]
    fn empty_scene_gives_empty_queue() {
        let queue = build(&Scene::new());
        assert!(queue.is_empty());
        assert!(queue.lights.is_empty());
        assert!(queue.camera.node.is_none());
        assert_eq!(queue.node_for_pick_id(0), None);
        assert_eq!(queue.node_for_pick_id(1), None);
    }

    #[test]
    fn opaque_items_come_first_in_insertion_order() {
        let mut scene = scene_with_camera();
        let t0 = add_cube(&mut scene, translucent(), at(0.0, 0.0, -5.0));
        let o0 = add_cube(&mut scene, opaque(), at(0.0, 0.0, -2.0));
        let o1 = add_cube(&mut scene, opaque(), at(0.0, 0.0, -9.0));
        let queue = build(&scene);
        let order: Vec<NodeHandle> = queue.items.iter().map(|i| i.node).collect();
        assert_eq!(order, vec![o0, o1, t0]);
        assert_eq!(queue.opaque().count(), 2);
        assert!(queue.items[2].signature.raster.blend);
    }

    #[test]
    fn blended_items_are_sorted_back_to_front() {
        let mut scene = scene_with_camera();
        let near = add_cube(&mut scene, translucent(), at(0.0, 0.0, -2.0));
        let far = add_cube(&mut scene, translucent(), at(0.0, 0.0, -10.0));
        let mid = add_cube(&mut scene, translucent(), at(1.0, 0.0, -5.0));
        let queue = build(&scene);
        let order: Vec<NodeHandle> = queue.items.iter().map(|i| i.node).collect();
        assert_eq!(order, vec![far, mid, near]);
        assert!((queue.items[0].depth - 10.0).abs() < 1e-4);
    }

    #[test]
    fn equal_depth_keeps_insertion_order() {
        let mut scene = scene_with_camera();
        let a = add_cube(&mut scene, translucent(), at(-1.0, 0.0, -4.0));
        let b = add_cube(&mut scene, translucent(), at(1.0, 0.0, -4.0));
        let c = add_cube(&mut scene, translucent(), at(0.0, 1.0, -4.0));
        for _ in 0..3 {
            let queue = build(&scene);
            let order: Vec<NodeHandle> = queue.items.iter().map(|i| i.node).collect();
            assert_eq!(order, vec![a, b, c]);
        }
    }

    #[test]
    fn mixed_alpha_scenes_are_ordered() {
        // small linear congruential generator keeps the scene reproducible
        let mut seed = 0x2545_f491_u32;
        let mut next = move || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (seed >> 8) as f32 / (1u32 << 24) as f32
        };
        let mut scene = scene_with_camera();
        for _ in 0..40 {
            let material = if next() < 0.5 { opaque() } else { translucent() };
            let pose = at(next() * 4.0 - 2.0, next() * 4.0 - 2.0, -1.0 - next() * 20.0);
            add_cube(&mut scene, material, pose);
        }
        let queue = build(&scene);
        assert_eq!(queue.items.len(), 40);
        let first_blend = queue.items.iter().position(|i| i.blend).unwrap_or(queue.items.len());
        assert!(queue.items[first_blend..].iter().all(|i| i.blend));
        for pair in queue.items[..first_blend].windows(2) {
            assert!(pair[0].order < pair[1].order);
        }
        for pair in queue.items[first_blend..].windows(2) {
            assert!(pair[0].depth > pair[1].depth || (pair[0].depth == pair[1].depth && pair[0].order < pair[1].order));
        }
    }

    #[test]
    fn instances_are_flattened_into_world_space() {
        let mut scene = scene_with_camera();
        let parent = scene.add(Node::new().with_transform(at(0.0, 1.0, 0.0)), None).unwrap();
        let prim = Primitive::new(vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], opaque())
            .with_poses(vec![at(1.0, 0.0, 0.0), at(2.0, 0.0, 0.0)])
            .with_instance_colors(vec![[1.0, 0.0, 0.0, 1.0]]);
        let node = scene
            .add(Node::mesh(Mesh::new(vec![prim])).with_transform(at(0.0, 0.0, -3.0)), Some(parent))
            .unwrap();
        let queue = build(&scene);
        let item = &queue.items[0];
        assert_eq!(item.node, node);
        assert_eq!(item.instances.len(), 2);
        assert_eq!(item.instances[1].w.truncate(), Vector3::new(2.0, 1.0, -3.0));
        assert_eq!(item.instance_colors.as_ref().unwrap()[1], [1.0; 4]);
        assert_eq!(queue.node_for_pick_id(item.pick_id), Some(node));
    }

    #[test]
    fn invisible_subtrees_and_meshes_are_skipped() {
        let mut scene = scene_with_camera();
        let hidden = add_cube(&mut scene, opaque(), Matrix4::identity());
        scene
            .add(Node::mesh(Mesh::cube(opaque())), Some(hidden))
            .unwrap();
        scene.set_visible(hidden, false).unwrap();
        let mut mesh = Mesh::cube(opaque());
        mesh.visible = false;
        scene.add(Node::mesh(mesh), None).unwrap();
        let shown = add_cube(&mut scene, opaque(), at(0.0, 0.0, -1.0));

        let queue = build(&scene);
        assert_eq!(queue.items.len(), 1);
        assert_eq!(queue.node_table, vec![shown]);
        assert_eq!(queue.items[0].pick_id, 1);
    }

    #[test]
    fn point_lights_over_cap_keep_nearest_to_centroid() {
        let mut scene = scene_with_camera();
        add_cube(&mut scene, opaque(), Matrix4::identity());
        let distances = [9.0, 1.0, 7.0, 2.0, 3.0, 8.0];
        let handles: Vec<NodeHandle> = distances
            .iter()
            .map(|d| scene.add(Node::light(Light::point()).with_transform(at(*d, 0.0, 0.0)), None).unwrap())
            .collect();
        for _ in 0..5 {
            scene.add(Node::light(Light::directional()), None).unwrap();
        }
        let queue = build(&scene);
        let kept: Vec<NodeHandle> = queue.lights.point.iter().map(|e| e.node).collect();
        assert_eq!(kept, vec![handles[1], handles[2], handles[3], handles[4]]);
        assert_eq!(queue.lights.directional.len(), 4);
        assert!(queue.lights.spot.is_empty());
    }

    #[test]
    fn equally_distant_lights_keep_traversal_order() {
        let mut scene = scene_with_camera();
        let handles: Vec<NodeHandle> = [
            at(0.0, 0.0, 2.0),
            at(2.0, 0.0, 0.0),
            at(0.0, -2.0, 0.0),
            at(-2.0, 0.0, 0.0),
        ]
        .into_iter()
        .map(|pose| scene.add(Node::light(Light::spot()).with_transform(pose), None).unwrap())
        .collect();
        let mut config = RenderConfig::default();
        config.max_lights.spot = 2;
        let queue = RenderQueue::build(&scene, (8, 8), OutputMode::Color, &config);
        let kept: Vec<NodeHandle> = queue.lights.spot.iter().map(|e| e.node).collect();
        assert_eq!(kept, handles[..2].to_vec());
    }

    #[test]
    fn shadow_slots_respect_toggles_and_budget() {
        let mut scene = scene_with_camera();
        for _ in 0..3 {
            scene.add(Node::light(Light::directional().with_shadow(true)), None).unwrap();
        }
        scene.add(Node::light(Light::spot().with_shadow(true)), None).unwrap();
        scene.add(Node::light(Light::point().with_shadow(true)), None).unwrap();
        scene.add(Node::light(Light::point()), None).unwrap();

        let mut config = RenderConfig::default();
        let queue = RenderQueue::build(&scene, (8, 8), OutputMode::Color, &config);
        let counts = queue.lights.shadow_counts();
        assert_eq!((counts.directional, counts.spot, counts.point), (3, 1, 1));
        assert_eq!(queue.lights.point[1].shadow, None);

        config.shadows.spot = false;
        config.max_shadow_maps = 2;
        let queue = RenderQueue::build(&scene, (8, 8), OutputMode::Color, &config);
        let counts = queue.lights.shadow_counts();
        assert_eq!((counts.directional, counts.spot, counts.point), (2, 0, 0));
        assert_eq!(queue.lights.directional[1].shadow, Some(1));

        let depth = RenderQueue::build(&scene, (8, 8), OutputMode::Depth, &RenderConfig::default());
        assert!(depth.lights.shadow_counts().is_empty());
    }

    #[test]
    fn shadow_budget_is_clamped_to_slot_range() {
        let mut scene = scene_with_camera();
        for _ in 0..300 {
            scene.add(Node::light(Light::point().with_shadow(true)), None).unwrap();
        }
        let mut config = RenderConfig::default();
        config.max_lights.point = 300;
        config.max_shadow_maps = 1000;

        let queue = RenderQueue::build(&scene, (8, 8), OutputMode::Color, &config);
        assert_eq!(queue.lights.point.len(), 300);
        assert_eq!(queue.lights.shadow_counts().point, u8::MAX);
        assert_eq!(queue.lights.point[254].shadow, Some(254));
        assert_eq!(queue.lights.point[255].shadow, None);
        assert_eq!(queue.lights.shadowed().count(), SHADOW_SLOT_LIMIT);
    }

    #[test]
    fn light_direction_follows_node_axis() {
        let mut scene = scene_with_camera();
        let rot = Matrix4::from_angle_x(cgmath::Deg(-90.0));
        scene.add(Node::light(Light::directional()).with_transform(rot), None).unwrap();
        let queue = build(&scene);
        let dir = queue.lights.directional[0].direction();
        // -Z rotated by -90 degrees about X points down
        assert!((dir - Vector3::new(0.0, -1.0, 0.0)).magnitude() < 1e-5);
    }
}
