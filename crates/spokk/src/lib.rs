//! Vulkan resource and shader-reflection layer.
//!
//! This crate provides:
//! - Device and queue setup with pluggable memory allocators
//! - Buffers, per-frame pipelined buffers and one-shot uploads
//! - Device-local meshes loaded from mesh files
//! - Images loaded from DDS/ASTC/PNG files, with blit-based mip generation
//! - A per-frame staging ring for packing host memory into images
//! - SPIR-V reflection, shader programs with merged pipeline layouts
//! - Descriptor pools and batched descriptor set writes
//! - Render pass presets and graphics/compute pipelines

pub mod blitter;
pub mod buffer;
pub mod command;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod image;
pub mod image_file;
pub mod memory;
pub mod mesh;
pub mod pipeline;
pub mod program;
pub mod renderpass;
pub mod shader;
pub mod spirv;

pub use blitter::{ImageBlitter, StagingRing};
pub use buffer::{Buffer, PipelinedBuffer};
pub use command::{submit_one_shot, OneShotCommandPool};
pub use descriptors::{DescriptorPool, DescriptorSetWriter};
pub use device::{Device, DeviceBuilder, DeviceQueue};
pub use error::{GpuError, Result};
pub use image::{extent_to_rect2d, extent_to_viewport, sampler_create_info, Image, ImageState};
pub use image_file::{ImageFile, ImageFileDataFormat};
pub use memory::{
    Allocation, AllocationScope, BlockAllocator, DeviceAllocator, MemoryBlock,
    SuballocatingAllocator,
};
pub use mesh::Mesh;
pub use pipeline::{ComputePipeline, GraphicsPipeline};
pub use program::ShaderProgram;
pub use renderpass::{RenderPass, RenderPassPreset, SubpassAttachments};
pub use shader::{DescriptorBindingInfo, DescriptorSetLayoutInfo, Shader};

pub use ash::vk;
pub use spokk_core::{Aabb, MeshFile, MeshFormat};
