//! Renderer data structures: scene graph, payloads, instances and textures.
//!
//! This module contains the core data types for scene representation:
//!
//! - `scene_graph` holds the node arena with lazily cached world transforms
//! - `model` contains mesh, primitive and material definitions
//! - `light` and `camera` are the remaining node payloads
//! - `instance` holds per-instance transformation data and its GPU layout
//! - `texture` contains the GPU texture wrapper and creation utilities

pub mod camera;
pub mod instance;
pub mod light;
pub mod model;
pub mod scene_graph;
pub mod texture;
