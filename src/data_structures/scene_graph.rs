//! Scene graph and hierarchical scene organization.
//!
//! Nodes live in a generational arena owned by [`Scene`]. Parent/child edges
//! always form a forest: a node has at most one parent, removing a node removes
//! its subtree and attaching below a descendant is rejected. World transforms
//! are the product of the local transforms from the root down to the node and
//! are cached lazily per node; writing a local transform only marks the node and
//! its descendants dirty.

use std::{cell::Cell, sync::Arc};

use cgmath::{InnerSpace, Matrix3, Matrix4, SquareMatrix, Vector3};
use slotmap::{SlotMap, new_key_type};

use crate::{
    config::DEFAULT_SCENE_SCALE,
    data_structures::{
        camera::Camera,
        light::Light,
        model::{Bounds, Mesh, merge_bounds, transform_bounds},
    },
    error::SceneError,
};

new_key_type! {
    /// Stable, generation-checked handle of a node in a [`Scene`].
    pub struct NodeHandle;
}

/// A scene shared between the thread mutating it and the render thread.
pub type SharedScene = Arc<parking_lot::Mutex<Scene>>;

/// What a node contributes to the rendered image, if anything.
#[derive(Debug, Clone)]
pub enum Payload {
    Mesh(Arc<Mesh>),
    Camera(Camera),
    Light(Light),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: Option<String>,
    pub payload: Option<Payload>,
    /// Invisible nodes and their subtrees are skipped when drawing.
    pub visible: bool,
    local: Matrix4<f32>,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    order: u64,
    world: Cell<Matrix4<f32>>,
    dirty: Cell<bool>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Node {
    pub fn new() -> Self {
        Self {
            name: None,
            payload: None,
            visible: true,
            local: Matrix4::identity(),
            parent: None,
            children: Vec::new(),
            order: 0,
            world: Cell::new(Matrix4::identity()),
            dirty: Cell::new(true),
        }
    }

    pub fn with_payload(payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new()
        }
    }

    pub fn mesh(mesh: impl Into<Arc<Mesh>>) -> Self {
        Self::with_payload(Payload::Mesh(mesh.into()))
    }

    pub fn camera(camera: Camera) -> Self {
        Self::with_payload(Payload::Camera(camera))
    }

    pub fn light(light: Light) -> Self {
        Self::with_payload(Payload::Light(light))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_transform(mut self, local: Matrix4<f32>) -> Self {
        self.local = local;
        self
    }

    pub fn local_transform(&self) -> Matrix4<f32> {
        self.local
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    /// Position in the scene's insertion sequence.
    pub fn insertion_order(&self) -> u64 {
        self.order
    }

    pub fn get_mesh(&self) -> Option<&Arc<Mesh>> {
        match &self.payload {
            Some(Payload::Mesh(mesh)) => Some(mesh),
            _ => None,
        }
    }

    pub fn get_camera(&self) -> Option<&Camera> {
        match &self.payload {
            Some(Payload::Camera(camera)) => Some(camera),
            _ => None,
        }
    }

    pub fn get_light(&self) -> Option<&Light> {
        match &self.payload {
            Some(Payload::Light(light)) => Some(light),
            _ => None,
        }
    }
}

/// The camera a frame is rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct MainCamera {
    /// `None` when the camera was synthesised because the scene has none.
    pub node: Option<NodeHandle>,
    pub camera: Camera,
    pub pose: Matrix4<f32>,
}

#[derive(Debug)]
pub struct Scene {
    nodes: SlotMap<NodeHandle, Node>,
    roots: Vec<NodeHandle>,
    main_camera: Option<NodeHandle>,
    next_order: u64,
    /// Clear colour of the colour pass.
    pub bg_color: [f32; 4],
    pub ambient_light: [f32; 3],
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            roots: Vec::new(),
            main_camera: None,
            next_order: 0,
            bg_color: [1.0; 4],
            ambient_light: [0.0; 3],
        }
    }

    pub fn into_shared(self) -> SharedScene {
        Arc::new(parking_lot::Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeHandle) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn get(&self, node: NodeHandle) -> Option<&Node> {
        self.nodes.get(node)
    }

    fn node(&self, node: NodeHandle) -> Result<&Node, SceneError> {
        self.nodes.get(node).ok_or(SceneError::NotFound(node))
    }

    pub fn roots(&self) -> &[NodeHandle] {
        &self.roots
    }

    pub fn children(&self, node: NodeHandle) -> Result<&[NodeHandle], SceneError> {
        Ok(self.node(node)?.children())
    }

    pub fn parent(&self, node: NodeHandle) -> Result<Option<NodeHandle>, SceneError> {
        Ok(self.node(node)?.parent)
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeHandle> {
        self.sorted(|n| n.name.as_deref() == Some(name))
            .into_iter()
            .next()
    }

    pub fn mesh_nodes(&self) -> Vec<NodeHandle> {
        self.sorted(|n| n.get_mesh().is_some())
    }

    pub fn light_nodes(&self) -> Vec<NodeHandle> {
        self.sorted(|n| n.get_light().is_some())
    }

    pub fn camera_nodes(&self) -> Vec<NodeHandle> {
        self.sorted(|n| n.get_camera().is_some())
    }

    /// Handles of matching nodes in insertion order.
    fn sorted(&self, filter: impl Fn(&Node) -> bool) -> Vec<NodeHandle> {
        let mut found: Vec<(u64, NodeHandle)> = self
            .nodes
            .iter()
            .filter(|(_, n)| filter(n))
            .map(|(h, n)| (n.order, h))
            .collect();
        found.sort_unstable_by_key(|(order, _)| *order);
        found.into_iter().map(|(_, h)| h).collect()
    }

    /// Adds `node` as a root or as the last child of `parent`.
    ///
    /// # Arguments
    ///
    /// * `node` is the new node; links it may carry from a previous scene are dropped
    /// * `parent` must already be part of this scene
    pub fn add(&mut self, node: Node, parent: Option<NodeHandle>) -> Result<NodeHandle, SceneError> {
        if let Some(parent) = parent {
            self.node(parent)?;
        }
        let mut node = node;
        node.parent = parent;
        node.children.clear();
        node.order = self.next_order;
        node.dirty.set(true);
        self.next_order += 1;
        let is_camera = node.get_camera().is_some();

        let handle = self.nodes.insert(node);
        self.link(handle, parent);
        if is_camera && self.main_camera.is_none() {
            self.main_camera = Some(handle);
        }
        Ok(handle)
    }

    pub fn add_payload(
        &mut self,
        payload: Payload,
        pose: Matrix4<f32>,
        parent: Option<NodeHandle>,
    ) -> Result<NodeHandle, SceneError> {
        self.add(Node::with_payload(payload).with_transform(pose), parent)
    }

    fn link(&mut self, node: NodeHandle, parent: Option<NodeHandle>) {
        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(p) => p.children.push(node),
            None => self.roots.push(node),
        }
        if let Some(n) = self.nodes.get_mut(node) {
            n.parent = parent;
        }
    }

    fn unlink(&mut self, node: NodeHandle) {
        let parent = self.nodes.get(node).and_then(|n| n.parent);
        let siblings = match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(p) => &mut p.children,
            None => &mut self.roots,
        };
        siblings.retain(|&c| c != node);
    }

    /**
     * Moves `node` (with its subtree) below `new_parent`, or to the roots for `None`.
     *
     * Attaching a node below itself or one of its descendants fails with
     * [`SceneError::Cycle`] and leaves the graph untouched. The check walks the
     * ancestors of `new_parent`, so it costs O(depth).
     */
    pub fn reparent(
        &mut self,
        node: NodeHandle,
        new_parent: Option<NodeHandle>,
    ) -> Result<(), SceneError> {
        self.node(node)?;
        if let Some(parent) = new_parent {
            let mut cursor = Some(parent);
            while let Some(current) = cursor {
                if current == node {
                    return Err(SceneError::Cycle { node, parent });
                }
                cursor = self.node(current)?.parent;
            }
        }
        self.unlink(node);
        self.link(node, new_parent);
        self.mark_dirty(node);
        Ok(())
    }

    pub fn set_parent(&mut self, node: NodeHandle, parent: NodeHandle) -> Result<(), SceneError> {
        self.reparent(node, Some(parent))
    }

    /// Removes `node` and its whole subtree, returning the detached node.
    pub fn remove(&mut self, node: NodeHandle) -> Result<Node, SceneError> {
        self.node(node)?;
        self.unlink(node);

        let mut stack = vec![node];
        let mut removed_root = None;
        while let Some(current) = stack.pop() {
            if let Some(mut n) = self.nodes.remove(current) {
                stack.extend(n.children.iter().copied());
                if current == node {
                    n.children.clear();
                    n.parent = None;
                    removed_root = Some(n);
                }
            }
        }

        if self.main_camera.is_some_and(|c| !self.nodes.contains_key(c)) {
            self.main_camera = self.camera_nodes().into_iter().next();
            log::debug!("main camera removed, falling back to {:?}", self.main_camera);
        }
        removed_root.ok_or(SceneError::NotFound(node))
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.main_camera = None;
    }

    pub fn local_transform(&self, node: NodeHandle) -> Result<Matrix4<f32>, SceneError> {
        Ok(self.node(node)?.local)
    }

    pub fn set_local_transform(
        &mut self,
        node: NodeHandle,
        local: Matrix4<f32>,
    ) -> Result<(), SceneError> {
        let n = self
            .nodes
            .get_mut(node)
            .ok_or(SceneError::NotFound(node))?;
        n.local = local;
        self.mark_dirty(node);
        Ok(())
    }

    pub fn set_payload(&mut self, node: NodeHandle, payload: Option<Payload>) -> Result<(), SceneError> {
        let n = self
            .nodes
            .get_mut(node)
            .ok_or(SceneError::NotFound(node))?;
        let is_camera = matches!(payload, Some(Payload::Camera(_)));
        n.payload = payload;
        if is_camera && self.main_camera.is_none() {
            self.main_camera = Some(node);
        } else if !is_camera && self.main_camera == Some(node) {
            self.main_camera = self.camera_nodes().into_iter().next();
        }
        Ok(())
    }

    pub fn set_visible(&mut self, node: NodeHandle, visible: bool) -> Result<(), SceneError> {
        self.nodes
            .get_mut(node)
            .ok_or(SceneError::NotFound(node))?
            .visible = visible;
        Ok(())
    }

    /// Marks `node` and its descendants dirty.
    ///
    /// A dirty node never has a clean descendant, so already dirty subtrees are skipped.
    fn mark_dirty(&self, node: NodeHandle) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(n) = self.nodes.get(current) {
                if n.dirty.replace(true) {
                    continue;
                }
                stack.extend(n.children.iter().copied());
            }
        }
    }

    /**
     * World transform of `node`: the product of local transforms from its root.
     *
     * Only dirty entries on the path are recomputed. The cache lives in cells,
     * so this takes `&self` and never changes the topology.
     */
    pub fn world_transform(&self, node: NodeHandle) -> Result<Matrix4<f32>, SceneError> {
        let n = self.node(node)?;
        if !n.dirty.get() {
            return Ok(n.world.get());
        }

        let mut chain = vec![node];
        let mut base = Matrix4::identity();
        let mut cursor = n.parent;
        while let Some(current) = cursor {
            let p = self.node(current)?;
            if !p.dirty.get() {
                base = p.world.get();
                break;
            }
            chain.push(current);
            cursor = p.parent;
        }

        for current in chain.into_iter().rev() {
            let n = self.node(current)?;
            base = base * n.local;
            n.world.set(base);
            n.dirty.set(false);
        }
        Ok(base)
    }

    /// True when the node and all its ancestors are visible.
    pub fn is_visible(&self, node: NodeHandle) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            match self.nodes.get(current) {
                Some(n) if n.visible => cursor = n.parent,
                _ => return false,
            }
        }
        true
    }

    /// Visible nodes in depth-first order, parents before children, roots in insertion order.
    pub fn visible_nodes(&self) -> Vec<NodeHandle> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeHandle> = self.roots.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            let Some(n) = self.nodes.get(current) else {
                continue;
            };
            if !n.visible {
                continue;
            }
            out.push(current);
            stack.extend(n.children.iter().rev().copied());
        }
        out
    }

    /// Axis-aligned bounds of all visible meshes in world space; all zero without meshes.
    pub fn bounds(&self) -> Bounds {
        let mut acc: Option<Bounds> = None;
        for handle in self.visible_nodes() {
            let Some(mesh) = self.nodes.get(handle).and_then(Node::get_mesh) else {
                continue;
            };
            if !mesh.visible {
                continue;
            }
            let (Some(local), Ok(world)) = (mesh.bounds(), self.world_transform(handle)) else {
                continue;
            };
            acc = merge_bounds(acc, transform_bounds(&local, &world));
        }
        acc.unwrap_or([[0.0; 3]; 2])
    }

    pub fn centroid(&self) -> Vector3<f32> {
        let [min, max] = self.bounds();
        (Vector3::from(min) + Vector3::from(max)) / 2.0
    }

    pub fn extents(&self) -> Vector3<f32> {
        let [min, max] = self.bounds();
        Vector3::from(max) - Vector3::from(min)
    }

    /// Length of the bounds diagonal.
    pub fn scale(&self) -> f32 {
        self.extents().magnitude()
    }

    pub fn set_main_camera(&mut self, node: NodeHandle) -> Result<(), SceneError> {
        if self.node(node)?.get_camera().is_none() {
            return Err(SceneError::NotACamera(node));
        }
        self.main_camera = Some(node);
        Ok(())
    }

    pub fn main_camera_node(&self) -> Option<NodeHandle> {
        self.main_camera
    }

    /// The designated camera with its world pose, or a default one framing the scene.
    pub fn main_camera(&self) -> MainCamera {
        if let Some(handle) = self.main_camera {
            if let (Some(camera), Ok(pose)) = (
                self.nodes.get(handle).and_then(Node::get_camera),
                self.world_transform(handle),
            ) {
                return MainCamera {
                    node: Some(handle),
                    camera: camera.clone(),
                    pose,
                };
            }
        }
        log::debug!("scene has no main camera, synthesising a default one");
        self.default_camera()
    }

    /**
     * A perspective camera looking at the scene centroid from the `+X +Z` diagonal.
     *
     * Clip planes scale with the scene so that large and tiny scenes both fit.
     */
    pub fn default_camera(&self) -> MainCamera {
        let centroid = self.centroid();
        let mut scale = self.scale();
        if scale == 0.0 {
            scale = DEFAULT_SCENE_SCALE;
        }
        let znear = (scale / 10.0).min(crate::config::DEFAULT_Z_NEAR);
        let zfar = (scale * 10.0).max(crate::config::DEFAULT_Z_FAR);
        let camera =
            Camera::perspective(75f32.to_radians()).with_clip(znear, Some(zfar));

        let s2 = std::f32::consts::FRAC_1_SQRT_2;
        #[rustfmt::skip]
        let rotation = Matrix3::new(
            0.0, 1.0, 0.0,
            -s2, 0.0, s2,
            s2, 0.0, s2,
        );
        let mut pose = Matrix4::from(rotation);
        pose.w = (centroid + Vector3::new(scale, 0.0, scale) * 0.7).extend(1.0);
        MainCamera {
            node: None,
            camera,
            pose,
        }
    }
}
