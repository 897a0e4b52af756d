//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be found.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No queue with the requested capabilities.
    #[error("No queue supports {0:?}")]
    NoSuitableQueue(vk::QueueFlags),

    /// Operation called on an object that was never created or was already destroyed.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Operation called on an object after it was finalized.
    #[error("{0} is already finalized")]
    AlreadyFinalized(&'static str),

    /// No memory type matches the requirements and property mask.
    #[error("No memory type in {type_bits:#x} has properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Device memory allocation failed.
    #[error("Out of device memory: {0}")]
    OutOfDeviceMemory(String),

    /// A staging copy does not fit in the remaining pframe space.
    #[error("Staging buffer too small: requested {requested} bytes, {available} available")]
    StagingTooSmall { requested: u64, available: u64 },

    /// Source pointer lies inside a staging range that belongs to another pframe.
    #[error("Source memory belongs to staging pframe {pframe}, current pframe is {current}")]
    StalePframePointer { pframe: u32, current: u32 },

    /// Two shader stages disagree about a descriptor binding.
    #[error("Descriptor mismatch at set {set} binding {binding}: {reason}")]
    DescriptorMismatch {
        set: u32,
        binding: u32,
        reason: String,
    },

    /// Shader stages do not form a supported pipeline.
    #[error("Invalid shader stage combination: {0:?}")]
    InvalidStageCombination(vk::ShaderStageFlags),

    /// Descriptor type override other than static <-> dynamic buffer.
    #[error("Cannot override {from:?} with {to:?}")]
    InvalidDescriptorOverride {
        from: vk::DescriptorType,
        to: vk::DescriptorType,
    },

    /// Malformed or unsupported SPIR-V.
    #[error("Invalid SPIR-V: {0}")]
    InvalidSpirv(String),

    /// Format missing from the format table or lacking a required feature.
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(vk::Format),

    /// Image file could not be decoded.
    #[error("Image file error: {0}")]
    ImageFile(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the GPU-free core.
    #[error(transparent)]
    Core(#[from] spokk_core::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
