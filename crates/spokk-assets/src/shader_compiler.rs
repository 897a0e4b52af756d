//! GLSL to SPIR-V compilation through shaderc.
//!
//! `#include "x"` resolves next to the including file, `#include <x>` searches
//! the manifest's include directories in order. Resolved includes are cached by
//! canonical path for the life of the compiler.

use crate::error::{AssetError, Result};
use crate::paths;
use hashbrown::HashMap;
use parking_lot::Mutex;
use shaderc::{CompileOptions, Compiler, IncludeType, ResolvedInclude, ShaderKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Map a manifest stage name to a shader kind.
pub fn parse_stage(stage: &str) -> Result<ShaderKind> {
    match stage {
        "vert" | "vertex" => Ok(ShaderKind::Vertex),
        "frag" | "fragment" => Ok(ShaderKind::Fragment),
        "geom" | "geometry" => Ok(ShaderKind::Geometry),
        "tese" | "tesseval" => Ok(ShaderKind::TessEvaluation),
        "comp" | "compute" => Ok(ShaderKind::Compute),
        other => Err(AssetError::UnknownStage(other.to_string())),
    }
}

/// How an include directive names its file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    /// `#include "path"`
    Relative,
    /// `#include <path>`
    System,
}

impl From<IncludeType> for IncludeKind {
    fn from(ty: IncludeType) -> Self {
        match ty {
            IncludeType::Relative => Self::Relative,
            IncludeType::Standard => Self::System,
        }
    }
}

/// A successfully resolved include.
#[derive(Clone, Debug)]
pub struct Include {
    /// Canonical absolute path.
    pub path: PathBuf,
    pub content: Arc<str>,
}

/// Include lookup with a shared cache. Safe to call from several compiler threads.
#[derive(Debug, Default)]
pub struct IncludeResolver {
    include_dirs: Vec<PathBuf>,
    cache: Mutex<HashMap<PathBuf, Arc<str>>>,
}

impl IncludeResolver {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            include_dirs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Paths to try, in order, for `requested` included from `requesting_file`.
    pub fn candidates(
        &self,
        requested: &str,
        kind: IncludeKind,
        requesting_file: &Path,
    ) -> Vec<PathBuf> {
        match kind {
            IncludeKind::Relative => {
                let base = requesting_file.parent().unwrap_or_else(|| Path::new("/"));
                vec![paths::combine(base, Path::new(requested))]
            }
            IncludeKind::System => self
                .include_dirs
                .iter()
                .map(|dir| paths::combine(dir, Path::new(requested)))
                .collect(),
        }
    }

    /// Resolve and read an include. Errors are messages for the compiler to report.
    pub fn resolve(
        &self,
        requested: &str,
        kind: IncludeKind,
        requesting_file: &Path,
    ) -> std::result::Result<Include, String> {
        let candidates = self.candidates(requested, kind, requesting_file);
        let Some(path) = candidates.into_iter().find(|p| p.is_file()) else {
            return Err(match kind {
                IncludeKind::Relative => format!(
                    "cannot find \"{requested}\" relative to '{}'",
                    requesting_file.display()
                ),
                IncludeKind::System => {
                    format!("cannot find <{requested}> in any shader include directory")
                }
            });
        };

        let mut cache = self.cache.lock();
        if let Some(content) = cache.get(&path) {
            return Ok(Include {
                path,
                content: Arc::clone(content),
            });
        }
        let content: Arc<str> = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read '{}': {e}", path.display()))?
            .into();
        debug!("Resolved include {requested} -> {}", path.display());
        cache.insert(path.clone(), Arc::clone(&content));
        Ok(Include { path, content })
    }

    /// Number of distinct files read so far.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}

/// GLSL compiler configured with the manifest's include directories.
pub struct ShaderCompiler {
    compiler: Compiler,
    includer: IncludeResolver,
}

impl ShaderCompiler {
    pub fn new(include_dirs: Vec<PathBuf>) -> Result<Self> {
        let compiler = Compiler::new()
            .ok_or_else(|| AssetError::Compile("failed to create shader compiler".into()))?;
        Ok(Self {
            compiler,
            includer: IncludeResolver::new(include_dirs),
        })
    }

    pub fn includer(&self) -> &IncludeResolver {
        &self.includer
    }

    fn options(&self) -> Result<CompileOptions<'_>> {
        let mut options = CompileOptions::new()
            .ok_or_else(|| AssetError::Compile("failed to create compile options".into()))?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_1 as u32,
        );
        options.set_generate_debug_info();
        options.set_include_callback(|requested, ty, requesting, _depth| {
            self.includer
                .resolve(requested, ty.into(), Path::new(requesting))
                .map(|include| ResolvedInclude {
                    resolved_name: include.path.display().to_string(),
                    content: include.content.to_string(),
                })
        });
        Ok(options)
    }

    /// Compile `input` to SPIR-V words. With no `stage` the compiler reads
    /// `#pragma shader_stage` from the source.
    pub fn compile(&self, input: &Path, entry: &str, stage: Option<&str>) -> Result<Vec<u32>> {
        let kind = stage.map_or(Ok(ShaderKind::InferFromSource), parse_stage)?;
        let source = std::fs::read_to_string(input).map_err(|e| AssetError::io(input, e))?;
        let options = self.options()?;
        let artifact = self
            .compiler
            .compile_into_spirv(
                &source,
                kind,
                &input.display().to_string(),
                entry,
                Some(&options),
            )
            .map_err(compile_error)?;
        if artifact.get_num_warnings() > 0 {
            warn!("{}", artifact.get_warning_messages().trim_end());
        }
        Ok(artifact.as_binary().to_vec())
    }

    /// Run only the preprocessor, returning the expanded source.
    pub fn preprocess(&self, input: &Path, entry: &str) -> Result<String> {
        let source = std::fs::read_to_string(input).map_err(|e| AssetError::io(input, e))?;
        let options = self.options()?;
        let artifact = self
            .compiler
            .preprocess(&source, &input.display().to_string(), entry, Some(&options))
            .map_err(compile_error)?;
        Ok(artifact.as_text())
    }

    /// Compile `input` and write the module to `output`.
    pub fn compile_to_file(
        &self,
        input: &Path,
        output: &Path,
        entry: &str,
        stage: Option<&str>,
    ) -> Result<()> {
        let words = self.compile(input, entry, stage)?;
        std::fs::write(output, bytemuck::cast_slice::<u32, u8>(&words))
            .map_err(|e| AssetError::io(output, e))
    }
}

fn compile_error(err: shaderc::Error) -> AssetError {
    match err {
        shaderc::Error::CompilationError(_, message) => {
            AssetError::Compile(message.trim_end().to_string())
        }
        other => AssetError::Compile(other.to_string()),
    }
}
