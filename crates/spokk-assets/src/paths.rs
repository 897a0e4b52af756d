//! Lexical path handling.
//!
//! Nothing here touches the process working directory. Relative paths are
//! always resolved against an explicit base, and canonicalization is purely
//! lexical so it works for outputs that do not exist yet.

use crate::error::{AssetError, Result};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Collapse `.` and `..` components, repeated separators and trailing separators.
///
/// `..` at the root of an absolute path is dropped. A relative path keeps
/// leading `..` components it cannot collapse.
pub fn canonicalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut normal_depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if normal_depth > 0 {
                    out.pop();
                    normal_depth -= 1;
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(name) => {
                out.push(name);
                normal_depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Resolve `path` against the absolute directory `base_dir`, then canonicalize.
pub fn combine(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        canonicalize(path)
    } else {
        canonicalize(&base_dir.join(path))
    }
}

/// Resolve `path` against the current working directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(canonicalize(path));
    }
    let cwd = std::env::current_dir()
        .map_err(|e| AssetError::Path(format!("cannot read working directory: {e}")))?;
    Ok(combine(&cwd, path))
}

/// Create every missing parent directory of `path`.
pub fn create_parent_dirs(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| {
                AssetError::Path(format!(
                    "failed to create directory '{}': {e}",
                    parent.display()
                ))
            }),
        _ => Ok(()),
    }
}

/// Last-write time of `path`, or `None` if it does not exist.
pub fn modified_time(path: &Path) -> Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|e| AssetError::io(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AssetError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_dots_and_separators() {
        assert_eq!(
            canonicalize(Path::new("/a/./b//c/../d/")),
            PathBuf::from("/a/b/d")
        );
        assert_eq!(canonicalize(Path::new("a/b/../../c")), PathBuf::from("c"));
    }

    #[test]
    fn parent_of_root_is_root() {
        assert_eq!(canonicalize(Path::new("/../../x")), PathBuf::from("/x"));
        assert_eq!(canonicalize(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn relative_paths_keep_leading_parents() {
        assert_eq!(canonicalize(Path::new("../a/../../b")), PathBuf::from("../../b"));
        assert_eq!(canonicalize(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn combine_respects_absolute_paths() {
        let base = Path::new("/assets/src");
        assert_eq!(
            combine(base, Path::new("../out/tex.dds")),
            PathBuf::from("/assets/out/tex.dds")
        );
        assert_eq!(
            combine(base, Path::new("/tmp/./x.spv")),
            PathBuf::from("/tmp/x.spv")
        );
    }

    #[test]
    fn missing_file_has_no_mtime() {
        let path = std::env::temp_dir().join("spokk-assets-definitely-missing.bin");
        assert!(modified_time(&path).unwrap().is_none());
    }

    #[test]
    fn creates_nested_parents() {
        let root = std::env::temp_dir().join(format!("spokk-paths-{}", std::process::id()));
        let file = root.join("x/y/z.bin");
        create_parent_dirs(&file).unwrap();
        assert!(root.join("x/y").is_dir());
        std::fs::remove_dir_all(&root).unwrap();
    }
}
