//! Incremental build of the assets listed in a manifest.

use crate::error::{AssetError, Result};
use crate::manifest::{AssetClass, AssetRecord, Manifest};
use crate::mesh_import::import_mesh;
use crate::paths;
use crate::shader_compiler::ShaderCompiler;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info};

/// Options that come from the command line rather than the manifest.
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// Replaces `defaults.output_root`. Must be absolute.
    pub output_root: Option<PathBuf>,
    /// Rebuild every asset regardless of timestamps.
    pub force_rebuild: bool,
}

/// Outcome counts of one build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub built: usize,
    pub up_to_date: usize,
    pub failed: usize,
}

impl BuildSummary {
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub const fn total(&self) -> usize {
        self.built + self.up_to_date + self.failed
    }
}

/// Whether `output` has to be rebuilt from `input`.
///
/// Stale when forced, when the output is missing, or when it is older than
/// either the input or the manifest. A missing input is an error.
pub fn needs_rebuild(
    input: &Path,
    output: &Path,
    manifest_modified: SystemTime,
    force: bool,
) -> Result<bool> {
    let input_modified =
        paths::modified_time(input)?.ok_or_else(|| AssetError::MissingInput(input.to_path_buf()))?;
    if force {
        return Ok(true);
    }
    Ok(match paths::modified_time(output)? {
        None => true,
        Some(output_modified) => {
            output_modified < input_modified || output_modified < manifest_modified
        }
    })
}

/// Copy `input` to `output` and stamp the output with the current time.
pub fn copy_asset(input: &Path, output: &Path) -> Result<()> {
    std::fs::copy(input, output).map_err(|e| AssetError::io(output, e))?;
    File::options()
        .write(true)
        .open(output)
        .and_then(|f| f.set_modified(SystemTime::now()))
        .map_err(|e| AssetError::io(output, e))
}

/// Builds every asset of one manifest.
pub struct ManifestBuilder {
    manifest: Manifest,
    options: BuildOptions,
    output_root: PathBuf,
    shader_compiler: Option<ShaderCompiler>,
    compile_invocations: usize,
}

impl ManifestBuilder {
    pub fn new(manifest: Manifest, options: BuildOptions) -> Self {
        let output_root = manifest.effective_output_root(options.output_root.as_deref());
        Self {
            manifest,
            options,
            output_root,
            shader_compiler: None,
            compile_invocations: 0,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Directory that relative asset outputs are placed under.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Number of times the shader compiler has been run.
    pub fn compile_invocations(&self) -> usize {
        self.compile_invocations
    }

    /// Absolute output path of `record`.
    pub fn output_path(&self, record: &AssetRecord) -> PathBuf {
        paths::combine(&self.output_root, &record.output)
    }

    fn shader_compiler(&mut self) -> Result<&ShaderCompiler> {
        if self.shader_compiler.is_none() {
            let compiler = ShaderCompiler::new(self.manifest.shader_include_dirs.clone())?;
            self.shader_compiler = Some(compiler);
        }
        self.shader_compiler
            .as_ref()
            .ok_or_else(|| AssetError::Compile("shader compiler unavailable".into()))
    }

    /// Build one asset if it is stale. Returns `true` if it was rebuilt.
    pub fn build_asset(&mut self, record: &AssetRecord) -> Result<bool> {
        let output = self.output_path(record);
        if !needs_rebuild(
            &record.input,
            &output,
            self.manifest.modified,
            self.options.force_rebuild,
        )? {
            debug!("{} is up to date", output.display());
            return Ok(false);
        }

        paths::create_parent_dirs(&output)?;
        match record.class {
            AssetClass::Image | AssetClass::Font => copy_asset(&record.input, &output)?,
            AssetClass::Mesh => {
                import_mesh(&record.input, &output)?;
            }
            AssetClass::Shader => {
                self.compile_invocations += 1;
                self.shader_compiler()?.compile_to_file(
                    &record.input,
                    &output,
                    &record.entry,
                    record.stage.as_deref(),
                )?;
            }
        }
        info!("{} -> {}", record.input.display(), output.display());
        Ok(true)
    }

    /// Build every stale asset. Failures are logged and counted; they do not stop the build.
    pub fn build(&mut self) -> BuildSummary {
        let mut summary = BuildSummary::default();
        for invalid in &self.manifest.invalid {
            error!("{invalid}");
            summary.failed += 1;
        }

        let records = self.manifest.assets.clone();
        for record in &records {
            match self.build_asset(record) {
                Ok(true) => summary.built += 1,
                Ok(false) => summary.up_to_date += 1,
                Err(source) => {
                    let err = AssetError::Asset {
                        location: record.location.clone(),
                        class: record.class.to_string(),
                        source: Box::new(source),
                    };
                    error!("{err}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            "{}: {} built, {} up to date, {} failed",
            self.manifest.path.display(),
            summary.built,
            summary.up_to_date,
            summary.failed
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Scratch(PathBuf);

    impl Scratch {
        fn new(name: &str) -> Self {
            let dir =
                std::env::temp_dir().join(format!("spokk-build-{name}-{}", std::process::id()));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn write(&self, rel: &str, contents: &str, modified: SystemTime) -> PathBuf {
            let path = self.0.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, contents).unwrap();
            set_mtime(&path, modified);
            path
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn set_mtime(path: &Path, modified: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
    }

    fn mtime(path: &Path) -> SystemTime {
        std::fs::metadata(path).unwrap().modified().unwrap()
    }

    fn hours_ago(h: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(h * 3600)
    }

    #[test]
    fn staleness_rules() {
        let s = Scratch::new("stale");
        let input = s.write("in.png", "x", hours_ago(2));
        let output = s.0.join("out.png");
        let manifest_time = hours_ago(3);

        assert!(needs_rebuild(&input, &output, manifest_time, false).unwrap());

        s.write("out.png", "x", hours_ago(1));
        assert!(!needs_rebuild(&input, &output, manifest_time, false).unwrap());
        assert!(needs_rebuild(&input, &output, manifest_time, true).unwrap());

        // Manifest edited after the output was written.
        assert!(needs_rebuild(&input, &output, SystemTime::now(), false).unwrap());

        set_mtime(&input, SystemTime::now());
        assert!(needs_rebuild(&input, &output, manifest_time, false).unwrap());
    }

    #[test]
    fn missing_input_is_an_error() {
        let s = Scratch::new("missing");
        let err = needs_rebuild(&s.0.join("nope.png"), &s.0.join("o"), hours_ago(1), true)
            .unwrap_err();
        assert!(matches!(err, AssetError::MissingInput(_)));
    }

    #[test]
    fn copies_are_incremental() {
        let s = Scratch::new("copies");
        s.write("tex/a.png", "image-a", hours_ago(2));
        s.write("fonts/b.ttf", "font-b", hours_ago(2));
        let manifest_path = s.write(
            "manifest.json5",
            r#"{
                defaults: { output_root: "out" },
                assets: [
                    { class: "image", input: "tex/a.png", output: "textures/a.png" },
                    { class: "font", input: "fonts/b.ttf", output: "deep/nested/b.ttf" },
                ],
            }"#,
            hours_ago(2),
        );

        let mut builder =
            ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), BuildOptions::default());
        let first = builder.build();
        assert_eq!(
            first,
            BuildSummary {
                built: 2,
                up_to_date: 0,
                failed: 0
            }
        );
        let out_a = s.0.join("out/textures/a.png");
        let out_b = s.0.join("out/deep/nested/b.ttf");
        assert_eq!(std::fs::read_to_string(&out_a).unwrap(), "image-a");
        assert_eq!(std::fs::read_to_string(&out_b).unwrap(), "font-b");
        let stamp_b = mtime(&out_b);

        s.write("tex/a.png", "image-a2", SystemTime::now() + Duration::from_secs(3600));
        let mut builder =
            ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), BuildOptions::default());
        let second = builder.build();
        assert_eq!(second.built, 1);
        assert_eq!(second.up_to_date, 1);
        assert_eq!(std::fs::read_to_string(&out_a).unwrap(), "image-a2");
        assert_eq!(mtime(&out_b), stamp_b);
    }

    #[test]
    fn output_root_override_wins() {
        let s = Scratch::new("override");
        s.write("a.png", "a", hours_ago(1));
        let manifest_path = s.write(
            "m.json5",
            "{ defaults: { output_root: 'ignored' }, assets: [ { class: 'image', input: 'a.png', output: 'a.png' } ] }",
            hours_ago(1),
        );
        let options = BuildOptions {
            output_root: Some(s.0.join("elsewhere")),
            force_rebuild: false,
        };
        let mut builder = ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), options);
        assert!(builder.build().is_success());
        assert!(s.0.join("elsewhere/a.png").is_file());
        assert!(!s.0.join("ignored").exists());
    }

    #[test]
    fn failures_do_not_stop_the_build() {
        let s = Scratch::new("failures");
        s.write("good.png", "ok", hours_ago(1));
        let manifest_path = s.write(
            "m.json5",
            r#"{ assets: [
                { class: "image", input: "missing.png", output: "missing.png" },
                { class: "image", input: "good.png" },
                { class: "image", input: "good.png", output: "out/good.png" },
            ] }"#,
            hours_ago(1),
        );
        let mut builder =
            ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), BuildOptions::default());
        let summary = builder.build();
        assert_eq!(summary.built, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
        assert!(s.0.join("out/good.png").is_file());
    }

    #[test]
    fn meshes_are_imported() {
        let s = Scratch::new("mesh");
        s.write(
            "tri.obj",
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
            hours_ago(1),
        );
        let manifest_path = s.write(
            "m.json5",
            "{ assets: [ { class: 'mesh', input: 'tri.obj', output: 'tri.mesh' } ] }",
            hours_ago(1),
        );
        let mut builder =
            ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), BuildOptions::default());
        assert_eq!(builder.build().built, 1);
        let file = spokk_core::MeshFile::load(s.0.join("tri.mesh")).unwrap();
        assert_eq!(file.header.vertex_count, 3);
    }

    #[test]
    fn unchanged_inputs_rebuild_nothing() {
        let s = Scratch::new("idempotent");
        s.write(
            "shaders/a.vert",
            "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n",
            hours_ago(2),
        );
        s.write(
            "shaders/b.frag",
            "#version 450\nlayout(location = 0) out vec4 color;\nvoid main() { color = vec4(1.0); }\n",
            hours_ago(2),
        );
        s.write("img/c.png", "pixels", hours_ago(2));
        let manifest_path = s.write(
            "m.json5",
            r#"{ assets: [
                { class: "shader", input: "shaders/a.vert", output: "a.vert.spv", stage: "vert" },
                { class: "shader", input: "shaders/b.frag", output: "b.frag.spv", stage: "frag" },
                { class: "image", input: "img/c.png", output: "c.png" },
            ] }"#,
            hours_ago(2),
        );

        let mut first =
            ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), BuildOptions::default());
        assert_eq!(first.build().built, 3);
        assert_eq!(first.compile_invocations(), 2);
        let spv_a = s.0.join("a.vert.spv");
        let bytes_a = std::fs::read(&spv_a).unwrap();
        assert_eq!(bytes_a.len() % 4, 0);
        let stamp_a = mtime(&spv_a);

        let mut second =
            ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), BuildOptions::default());
        assert_eq!(second.build().up_to_date, 3);
        assert_eq!(second.compile_invocations(), 0);

        s.write("img/c.png", "pixels2", SystemTime::now() + Duration::from_secs(3600));
        let mut third =
            ManifestBuilder::new(Manifest::load(&manifest_path).unwrap(), BuildOptions::default());
        let summary = third.build();
        assert_eq!(summary.built, 1);
        assert_eq!(summary.up_to_date, 2);
        assert_eq!(third.compile_invocations(), 0);
        assert_eq!(std::fs::read(&spv_a).unwrap(), bytes_a);
        assert_eq!(mtime(&spv_a), stamp_a);
    }
}
