//! Asset builder for spokk.
//!
//! Reads a JSON5 manifest listing images, fonts, meshes and shaders, and
//! rebuilds each output whose input or manifest changed since it was last
//! written:
//! - images and fonts are copied,
//! - meshes are imported from OBJ into the engine's mesh file format,
//! - GLSL shaders are compiled to SPIR-V with `#include` support.

pub mod builder;
pub mod error;
pub mod manifest;
pub mod mesh_import;
pub mod paths;
pub mod shader_compiler;

pub use builder::{needs_rebuild, BuildOptions, BuildSummary, ManifestBuilder};
pub use error::{AssetError, Result};
pub use manifest::{AssetClass, AssetRecord, Manifest};
pub use mesh_import::{import_mesh, SourceMesh};
pub use shader_compiler::{parse_stage, IncludeKind, IncludeResolver, ShaderCompiler};
