//! Asset builder error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a manifest or building its assets.
#[derive(Error, Debug)]
pub enum AssetError {
    /// A single asset failed; carries where it was declared and what kind it was.
    #[error("{location}: error: {class} asset: {source}")]
    Asset {
        location: String,
        class: String,
        #[source]
        source: Box<AssetError>,
    },

    /// The manifest is not valid JSON5.
    #[error("{}({line}): column {column}: {message}", file.display())]
    ManifestParse {
        file: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    /// The manifest parsed but its contents do not follow the schema.
    #[error("{location}: {message}")]
    Manifest { location: String, message: String },

    /// A path could not be resolved or created.
    #[error("Path error: {0}")]
    Path(String),

    /// Input file named by an asset is missing.
    #[error("input file '{}' does not exist", .0.display())]
    MissingInput(PathBuf),

    /// GLSL compilation failed. The message is the compiler's own.
    #[error("{0}")]
    Compile(String),

    /// Shader stage string is not one of the recognized names.
    #[error("Unrecognized shader stage '{0}'")]
    UnknownStage(String),

    /// Scene file could not be turned into a mesh file.
    #[error("Mesh import failed: {0}")]
    MeshImport(String),

    /// I/O error on a specific file.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Data model error (vertex conversion, mesh file encoding).
    #[error(transparent)]
    Core(#[from] spokk_core::Error),
}

impl AssetError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using [`AssetError`].
pub type Result<T> = std::result::Result<T, AssetError>;
