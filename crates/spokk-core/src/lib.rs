//! GPU-free building blocks shared by the spokk runtime and the spokkle asset builder.
//!
//! This crate provides:
//! - Axis-aligned bounding boxes
//! - The texel-block format table and image/mip helpers
//! - Vertex layouts and vertex buffer conversion between them
//! - Mesh formats (bindings, attributes, topology)
//! - The binary mesh file codec

pub mod error;
pub mod format;
pub mod math;
pub mod mesh_file;
pub mod mesh_format;
pub mod vertex;

pub use error::{Error, Result};
pub use format::{format_info, FormatInfo};
pub use math::Aabb;
pub use mesh_file::{bytes_per_index_for, MeshFile, MeshFileHeader, MESH_FILE_MAGIC};
pub use mesh_format::MeshFormat;
pub use vertex::{convert_vertex_buffer, AttributeInfo, VertexLayout};
