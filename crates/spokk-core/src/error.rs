//! Error types for GPU-free data handling.

use thiserror::Error;

/// Errors raised while handling formats, vertex data and mesh files.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A format that has no entry in the format table or no vertex codec
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(ash::vk::Format),

    /// Source or destination slice too small for the requested operation
    #[error("Buffer too small: needed {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
