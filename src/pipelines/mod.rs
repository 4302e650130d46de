//! Pipeline state and uniform layouts of the shader variants.
//!
//! - `basic` builds the render pipeline and vertex layouts of a variant
//! - `light` packs the camera, light and shadow uniforms
//! - `pick` holds the per-draw id uniform of picking and segmentation
//! - `compiler` turns a signature into a GPU program

pub mod basic;
pub mod compiler;
pub mod light;
pub mod pick;
