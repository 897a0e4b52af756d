//! JSON5 asset manifests.
//!
//! ```json5
//! {
//!   defaults: { output_root: "../build", shader_include_dirs: ["include"] },
//!   assets: [
//!     { class: "image", input: "tex/rock.dds", output: "rock.dds" },
//!     { class: "shader", input: "shaders/mesh.frag", output: "mesh.frag.spv", stage: "frag" },
//!   ],
//! }
//! ```
//!
//! Every asset remembers the `file(line:col)` of its object so build failures
//! can point back at the manifest. Schema problems inside one asset are kept
//! as per-asset errors and do not stop the rest of the manifest from loading.

use crate::error::{AssetError, Result};
use crate::paths;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;
use std::time::SystemTime;
use tracing::warn;

/// What an asset is and how it gets built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetClass {
    /// Copied byte for byte.
    Image,
    /// Imported from a scene file into a mesh file.
    Mesh,
    /// Copied byte for byte.
    Font,
    /// Compiled from GLSL to SPIR-V.
    Shader,
}

impl AssetClass {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "image" => Some(Self::Image),
            "mesh" => Some(Self::Mesh),
            "font" => Some(Self::Font),
            "shader" => Some(Self::Shader),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Mesh => "mesh",
            Self::Font => "font",
            Self::Shader => "shader",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated entry of the `assets` array.
#[derive(Clone, Debug)]
pub struct AssetRecord {
    /// `file(line:col)` of the asset object.
    pub location: String,
    pub class: AssetClass,
    /// Absolute, canonical input path.
    pub input: PathBuf,
    /// Output path as written; resolved against the output root at build time.
    pub output: PathBuf,
    /// Shader entry point.
    pub entry: String,
    /// Shader stage name; `None` lets the compiler infer it from `#pragma shader_stage`.
    pub stage: Option<String>,
}

/// A loaded manifest.
#[derive(Debug)]
pub struct Manifest {
    /// Absolute, canonical path of the manifest file.
    pub path: PathBuf,
    /// Directory containing the manifest; base for relative paths.
    pub dir: PathBuf,
    /// Last-write time of the manifest file. Outputs older than this are stale.
    pub modified: SystemTime,
    /// `defaults.output_root`, resolved against [`Manifest::dir`].
    pub output_root: Option<PathBuf>,
    /// `defaults.shader_include_dirs`, resolved against [`Manifest::dir`].
    pub shader_include_dirs: Vec<PathBuf>,
    /// Assets that passed schema validation, in manifest order.
    pub assets: Vec<AssetRecord>,
    /// Per-asset schema errors.
    pub invalid: Vec<AssetError>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    defaults: Option<RawDefaults>,
    #[serde(default)]
    assets: Vec<Value>,
    #[serde(flatten)]
    unknown: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawDefaults {
    output_root: Option<String>,
    #[serde(default)]
    shader_include_dirs: Vec<String>,
    #[serde(flatten)]
    unknown: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawAsset {
    class: Option<String>,
    input: Option<String>,
    output: Option<String>,
    entry: Option<String>,
    stage: Option<String>,
    #[serde(flatten)]
    unknown: Map<String, Value>,
}

impl Manifest {
    /// Read and parse the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let path = paths::absolute(path)?;
        let source = std::fs::read_to_string(&path).map_err(|e| AssetError::io(&path, e))?;
        let modified = paths::modified_time(&path)?
            .ok_or_else(|| AssetError::MissingInput(path.clone()))?;
        let mut manifest = Self::parse(&path, &source)?;
        manifest.modified = modified;
        Ok(manifest)
    }

    /// Parse manifest text as if it were read from the absolute path `file`.
    ///
    /// [`Manifest::modified`] is left at the epoch; [`Manifest::load`] fills it in.
    pub fn parse(file: &Path, source: &str) -> Result<Self> {
        let path = paths::canonicalize(file);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| AssetError::Path(format!("'{}' has no parent", path.display())))?;

        let value: Value = json5::from_str(source).map_err(|e| parse_error(&path, &e))?;
        let file_location = path.display().to_string();
        let raw: RawManifest =
            serde_json::from_value(value).map_err(|e| AssetError::Manifest {
                location: file_location.clone(),
                message: e.to_string(),
            })?;
        warn_unknown(&file_location, &raw.unknown);

        let (output_root, shader_include_dirs) = match raw.defaults {
            Some(defaults) => {
                warn_unknown(&file_location, &defaults.unknown);
                (
                    defaults
                        .output_root
                        .map(|root| paths::combine(&dir, Path::new(&root))),
                    defaults
                        .shader_include_dirs
                        .iter()
                        .map(|d| paths::combine(&dir, Path::new(d)))
                        .collect(),
                )
            }
            None => (None, Vec::new()),
        };

        let positions = asset_object_positions(source);
        let mut assets = Vec::with_capacity(raw.assets.len());
        let mut invalid = Vec::new();
        for (index, value) in raw.assets.into_iter().enumerate() {
            let location = positions.get(index).map_or_else(
                || format!("{}(asset {index})", path.display()),
                |(line, column)| format!("{}({line}:{column})", path.display()),
            );
            match parse_asset(&dir, location, value) {
                Ok(record) => assets.push(record),
                Err(e) => invalid.push(e),
            }
        }

        Ok(Self {
            path,
            dir,
            modified: SystemTime::UNIX_EPOCH,
            output_root,
            shader_include_dirs,
            assets,
            invalid,
        })
    }

    /// Output root in effect: `override_root`, else `defaults.output_root`, else the manifest dir.
    pub fn effective_output_root(&self, override_root: Option<&Path>) -> PathBuf {
        override_root
            .map(Path::to_path_buf)
            .or_else(|| self.output_root.clone())
            .unwrap_or_else(|| self.dir.clone())
    }

    /// Number of asset entries, valid or not.
    pub fn asset_count(&self) -> usize {
        self.assets.len() + self.invalid.len()
    }
}

fn parse_error(path: &Path, err: &json5::Error) -> AssetError {
    let json5::Error::Message { msg, location } = err;
    // pest renders a multi-line report; the "= ..." line carries the actual complaint.
    let message = msg
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix("= "))
        .unwrap_or(msg)
        .to_string();
    let (line, column) = location.as_ref().map_or((0, 0), |l| (l.line, l.column));
    AssetError::ManifestParse {
        file: path.to_path_buf(),
        line,
        column,
        message,
    }
}

fn warn_unknown(location: &str, unknown: &Map<String, Value>) {
    for key in unknown.keys() {
        warn!("{location}: warning: ignoring unexpected tag '{key}'");
    }
}

fn parse_asset(dir: &Path, location: String, value: Value) -> Result<AssetRecord> {
    let schema_error = |location: &str, message: String| AssetError::Manifest {
        location: location.to_string(),
        message,
    };
    let raw: RawAsset = serde_json::from_value(value)
        .map_err(|e| schema_error(&location, format!("malformed asset: {e}")))?;
    warn_unknown(&location, &raw.unknown);

    let class_name = raw
        .class
        .ok_or_else(|| schema_error(&location, "asset has no class".into()))?;
    let class = AssetClass::parse(&class_name)
        .ok_or_else(|| schema_error(&location, format!("unknown asset class '{class_name}'")))?;
    let (Some(input), Some(output)) = (raw.input, raw.output) else {
        return Err(schema_error(&location, format!("incomplete {class} asset")));
    };
    if class != AssetClass::Shader {
        if raw.entry.is_some() {
            warn!("{location}: warning: ignoring unexpected tag 'entry'");
        }
        if raw.stage.is_some() {
            warn!("{location}: warning: ignoring unexpected tag 'stage'");
        }
    }

    Ok(AssetRecord {
        location,
        class,
        input: paths::combine(dir, Path::new(&input)),
        output: PathBuf::from(output),
        entry: raw.entry.unwrap_or_else(|| "main".to_string()),
        stage: raw.stage,
    })
}

struct Cursor<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
}

impl Cursor<'_> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn string(&mut self, quote: char) -> String {
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    if let Some(escaped) = self.bump() {
                        out.push(escaped);
                    }
                }
                c if c == quote => break,
                c => out.push(c),
            }
        }
        out
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        let mut star = false;
        while let Some(c) = self.bump() {
            if star && c == '/' {
                break;
            }
            star = c == '*';
        }
    }
}

/// 1-based `(line, column)` of each element directly inside the top-level `assets` array.
///
/// The JSON5 parser does not expose value positions, so this walks the token
/// structure on its own. It assumes the text already parsed successfully.
fn asset_object_positions(source: &str) -> Vec<(usize, usize)> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Frame {
        Object,
        Array,
        Assets,
    }

    let mut cursor = Cursor {
        chars: source.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut positions = Vec::new();
    let mut stack = Vec::new();
    let mut token = String::new();
    let mut key = String::new();
    let mut element_due = false;
    loop {
        let (line, column) = (cursor.line, cursor.column);
        let Some(c) = cursor.bump() else { break };
        let comment = c == '/' && matches!(cursor.peek(), Some('/' | '*'));
        if element_due
            && stack.last() == Some(&Frame::Assets)
            && !(c.is_whitespace() || comment || c == ',' || c == ']')
        {
            positions.push((line, column));
            element_due = false;
        }
        match c {
            '"' | '\'' => token = cursor.string(c),
            '/' if cursor.peek() == Some('/') => cursor.skip_line_comment(),
            '/' if cursor.peek() == Some('*') => {
                cursor.bump();
                cursor.skip_block_comment();
            }
            ':' => key = std::mem::take(&mut token),
            '{' => stack.push(Frame::Object),
            '[' => {
                let at_root = stack.len() == 1 && stack[0] == Frame::Object;
                if at_root && key == "assets" {
                    stack.push(Frame::Assets);
                    element_due = true;
                } else {
                    stack.push(Frame::Array);
                }
            }
            '}' | ']' => {
                stack.pop();
            }
            ',' => {
                token.clear();
                element_due = stack.last() == Some(&Frame::Assets);
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                token.clear();
                token.push(c);
                while let Some(next) = cursor.peek() {
                    if !(next.is_alphanumeric() || next == '_' || next == '$') {
                        break;
                    }
                    token.push(next);
                    cursor.bump();
                }
            }
            _ => {}
        }
    }
    positions
}
