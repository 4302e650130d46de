//! pbr-ngin
//!
//! An offscreen, instancing-oriented renderer for physically based scenes. A
//! scene graph of meshes, lights and cameras is rendered into colour, depth,
//! node id or segmentation images. Shader variants are composed per draw
//! signature and cached, render targets are pooled between frames and every
//! mesh node is drawn with GPU instancing.
//!
//! High-level modules
//! - `config`: render flags, light caps and shadow settings
//! - `context`: device and queue, created without a surface
//! - `data_structures`: scene graph and payloads (meshes, lights, cameras)
//! - `render`: the per-frame render queue built from a scene snapshot
//! - `pass`: pass planning and light space maths
//! - `shader`: variant signatures, WGSL composition and the program cache
//! - `pipelines`: pipeline state and uniform layouts of the variants
//! - `resources`: GPU uploads of meshes and material textures
//! - `targets`: pooled offscreen render targets
//! - `pick`: readback and decoding of frame outputs
//! - `renderer`: the frame driver tying everything together
//!

pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod pass;
pub mod pick;
pub mod pipelines;
pub mod render;
pub mod renderer;
pub mod resources;
pub mod shader;
pub mod targets;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use image;
pub use wgpu;

pub use config::{LightCaps, RenderConfig, RenderFlags, ShadowToggles, WireframeMode};
pub use context::Context;
pub use data_structures::{
    camera::Camera,
    light::{Light, LightType},
    model::{AlphaMode, Material, Mesh, Primitive},
    scene_graph::{Node, NodeHandle, Scene, SharedScene},
};
pub use error::{RenderError, SceneError, ShaderCompileError};
pub use pick::{DepthImage, NodeIdBuffer};
pub use renderer::{FrameState, RenderMode, RenderOutput, Renderer};
