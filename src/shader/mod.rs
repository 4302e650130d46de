//! Shader variants.
//!
//! - `signature` derives the cache key of a draw from its primitive, material and config
//! - `source` generates and validates the WGSL of a signature
//! - `cache` memoises compiled programs per signature

pub mod cache;
pub mod signature;
pub mod source;

pub use cache::{ProgramCompiler, ShaderCache};
pub use signature::{
    AlphaKind, MaterialKind, OutputMode, RasterState, ShaderSignature, ShadowCounts,
    TextureFlags, VertexFlags,
};
pub use source::{ComposedShader, compose, validate};
