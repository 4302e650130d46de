//! Error types shared by the scene graph, the shader cache and the renderer.
//!
//! Topology errors come from scene mutation and never touch the GPU. Resource
//! errors abort the frame in progress; the renderer returns to idle and the
//! caches for unaffected signatures and targets stay valid.

use thiserror::Error;

use crate::{
    data_structures::scene_graph::NodeHandle,
    targets::{TargetId, TargetKind},
};

/// Errors raised synchronously by [`Scene`](crate::data_structures::scene_graph::Scene) mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("attaching {node:?} below {parent:?} would create a cycle")]
    Cycle { node: NodeHandle, parent: NodeHandle },

    #[error("node {0:?} is not part of this scene")]
    NotFound(NodeHandle),

    #[error("node {0:?} has no camera attached")]
    NotACamera(NodeHandle),
}

/// A shader variant failed to compile.
///
/// `fragment` names the piece of composed WGSL the failure was located in so that
/// a broken feature toggle can be traced back without dumping the whole source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("shader fragment `{fragment}` failed to compile: {message}")]
pub struct ShaderCompileError {
    pub fragment: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    ShaderCompile(#[from] ShaderCompileError),

    #[error("could not allocate {kind:?} target of {width}x{height}: {reason}")]
    TargetAllocation {
        kind: TargetKind,
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("render target {0:?} was already released")]
    DoubleRelease(TargetId),

    #[error("render target {0:?} is not owned by this manager")]
    UnknownTarget(TargetId),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error("invalid frame transition from {from:?} to {to:?}")]
    InvalidState {
        from: crate::renderer::FrameState,
        to: crate::renderer::FrameState,
    },

    #[error("reading back GPU results failed: {0}")]
    Readback(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("the renderer has been torn down")]
    TornDown,
}
