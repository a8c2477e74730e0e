#![doc = include_str!("../README.md")]
//! asp-harness-sdk
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_closure::ResolvedSpace;
use asp_error::{AspError, ErrorCode};
use asp_harness_core::{
    ComposeOptions, ComposeOutcome, ComposedTargetBundle, DetectResult, HarnessAdapter, HarnessId,
    MaterializeOptions, MaterializeOutcome, MaterializedArtifact, Result, RunOptions, ValidateOutcome,
};
use asp_lint::{NameCollisionTracker, Warning, WarningCode};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const MANIFEST_FILENAME: &str = "bundle-manifest.json";

/// Pi Agent SDK adapter. Emits a `bundle-manifest.json` rather than a
/// native harness layout; an SDK runner reads it directly.
pub struct PiSdkAdapter {
    root_env_var: &'static str,
}

impl PiSdkAdapter {
    /// The Pi Agent SDK adapter.
    #[must_use]
    pub fn new() -> Self {
        Self { root_env_var: "ASP_PI_SDK_ROOT" }
    }
}

impl Default for PiSdkAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HarnessAdapter for PiSdkAdapter {
    fn id(&self) -> HarnessId {
        HarnessId::PiSdk
    }

    async fn detect(&self) -> DetectResult {
        match std::env::var(self.root_env_var) {
            Ok(root) => {
                let root_path = PathBuf::from(&root);
                if root_path.is_dir() {
                    DetectResult { available: true, path: Some(root_path), ..Default::default() }
                } else {
                    DetectResult {
                        available: false,
                        error: Some(format!("{} points at '{root}' which is not a directory", self.root_env_var)),
                        ..Default::default()
                    }
                }
            }
            Err(_) => DetectResult {
                available: false,
                error: Some(format!("{} is not set", self.root_env_var)),
                ..Default::default()
            },
        }
    }

    fn validate_space(&self, space: &ResolvedSpace, snapshot_dir: &Path) -> ValidateOutcome {
        let mut warnings = Vec::new();
        if let Some(w) = asp_lint::pi_permission_lint_only(space.id.as_str(), !space.manifest.permissions.is_empty()) {
            warnings.push(w);
        }
        let _ = snapshot_dir;
        ValidateOutcome { valid: true, errors: Vec::new(), warnings }
    }

    fn materialize_space(
        &self,
        space: &ResolvedSpace,
        snapshot_dir: &Path,
        cache_dir: &Path,
        options: &MaterializeOptions,
    ) -> Result<MaterializeOutcome> {
        let artifact_path = cache_dir.join(space.key.as_str());
        if artifact_path.is_dir() && !options.force {
            debug!(path = %artifact_path.display(), "reusing cached sdk artifact");
            return Ok(MaterializeOutcome { artifact_path, files: Vec::new(), warnings: Vec::new() });
        }
        if artifact_path.is_dir() {
            std::fs::remove_dir_all(&artifact_path).map_err(|e| fs_err(&artifact_path, e))?;
        }

        let use_hardlinks = options.use_hardlinks && !space.commit.is_mutable();
        let mut files = Vec::new();

        let extensions_src = snapshot_dir.join("extensions");
        if extensions_src.is_dir() {
            let extensions_dest = artifact_path.join("extensions");
            std::fs::create_dir_all(&extensions_dest).map_err(|e| fs_err(&extensions_dest, e))?;
            for entry in std::fs::read_dir(&extensions_src).map_err(|e| fs_err(&extensions_src, e))? {
                let entry = entry.map_err(|e| fs_err(&extensions_src, e))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("ts") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
                let source = std::fs::read_to_string(&path).map_err(|e| fs_err(&path, e))?;
                let bundled_name = format!("{}__{stem}.js", space.id);
                let dest = extensions_dest.join(&bundled_name);
                std::fs::write(&dest, format!("// {}::{stem}\n(function(){{\n{source}\n}})();\n", space.id))
                    .map_err(|e| fs_err(&dest, e))?;
                files.push(PathBuf::from("extensions").join(&bundled_name));
            }
        }

        let skills_src = snapshot_dir.join("skills");
        if skills_src.is_dir() {
            let dest = artifact_path.join("skills");
            files.extend(materialize_tree(&skills_src, &dest, use_hardlinks)?.into_iter().map(|p| Path::new("skills").join(p)));
        }

        let hooks_src = snapshot_dir.join("hooks").join("hooks.json");
        if hooks_src.is_file() {
            let dest = artifact_path.join("hooks.json");
            std::fs::copy(&hooks_src, &dest).map_err(|e| fs_err(&dest, e))?;
            files.push(PathBuf::from("hooks.json"));
        }

        Ok(MaterializeOutcome { artifact_path, files, warnings: Vec::new() })
    }

    fn compose_target(
        &self,
        target_name: &str,
        artifacts: &[MaterializedArtifact<'_>],
        output_dir: &Path,
        options: &ComposeOptions,
    ) -> Result<ComposeOutcome> {
        if options.clean && output_dir.is_dir() {
            std::fs::remove_dir_all(output_dir).map_err(|e| fs_err(output_dir, e))?;
        }
        std::fs::create_dir_all(output_dir).map_err(|e| fs_err(output_dir, e))?;

        let mut warnings = Vec::new();
        let mut plugin_dirs = Vec::new();
        let mut extension_names = NameCollisionTracker::new(WarningCode::PiToolCollision);
        let mut manifest_extensions = Vec::new();
        let mut manifest_skills = Vec::new();
        let mut manifest_hooks: Vec<Value> = Vec::new();

        for artifact in artifacts {
            let plugin_name = effective_plugin_name(artifact.space);

            let extensions_src = artifact.artifact_path.join("extensions");
            if extensions_src.is_dir() {
                let extensions_out = output_dir.join("extensions");
                std::fs::create_dir_all(&extensions_out).map_err(|e| fs_err(&extensions_out, e))?;
                for entry in std::fs::read_dir(&extensions_src).map_err(|e| fs_err(&extensions_src, e))? {
                    let entry = entry.map_err(|e| fs_err(&extensions_src, e))?;
                    let src_path = entry.path();
                    let Some(filename) = src_path.file_name().and_then(|s| s.to_str()) else { continue };
                    if let Some(w) = extension_names.observe(filename, artifact.space.id.as_str()) {
                        warnings.push(w);
                    }
                    let dest = extensions_out.join(filename);
                    std::fs::copy(&src_path, &dest).map_err(|e| fs_err(&dest, e))?;
                    manifest_extensions.push(serde_json::json!({
                        "space": artifact.space.id.as_str(),
                        "path": format!("extensions/{filename}"),
                    }));
                }
            }

            let skills_src = artifact.artifact_path.join("skills");
            if skills_src.is_dir() {
                let dest = output_dir.join("skills").join(&plugin_name);
                materialize_tree(&skills_src, &dest, true)?;
                plugin_dirs.push(dest.clone());
                manifest_skills.push(serde_json::json!({
                    "space": artifact.space.id.as_str(),
                    "path": format!("skills/{plugin_name}"),
                }));
            }

            if let Some(Ok(Value::Object(events))) = read_json_opt(&artifact.artifact_path.join("hooks.json")) {
                for (event, entries) in events {
                    let Value::Array(entries) = entries else { continue };
                    for entry in entries {
                        manifest_hooks.push(serde_json::json!({
                            "space": artifact.space.id.as_str(),
                            "event": event,
                            "entry": entry,
                        }));
                    }
                }
            }
        }

        manifest_extensions.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
        manifest_skills.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
        manifest_hooks.sort_by(|a, b| {
            (a["event"].as_str(), a["space"].as_str()).cmp(&(b["event"].as_str(), b["space"].as_str()))
        });

        let manifest_path = output_dir.join(MANIFEST_FILENAME);
        let manifest = serde_json::json!({
            "target": target_name,
            "extensions": manifest_extensions,
            "skills": manifest_skills,
            "hooks": manifest_hooks,
        });
        write_json(&manifest_path, &manifest)?;

        Ok(ComposeOutcome {
            bundle: ComposedTargetBundle {
                harness_id: HarnessId::PiSdk,
                target_name: target_name.to_string(),
                root_dir: output_dir.to_path_buf(),
                plugin_dirs,
                mcp_config_path: None,
                settings_path: None,
                extra: serde_json::json!({ "manifest_path": manifest_path }),
            },
            warnings,
        })
    }

    fn load_target_bundle(&self, output_dir: &Path, target_name: &str) -> Result<ComposedTargetBundle> {
        if !output_dir.is_dir() {
            return Err(AspError::new(ErrorCode::FilesystemError, format!("{} does not exist", output_dir.display())));
        }
        let mut plugin_dirs = Vec::new();
        let skills_dir = output_dir.join("skills");
        if skills_dir.is_dir() {
            for entry in std::fs::read_dir(&skills_dir).map_err(|e| fs_err(&skills_dir, e))? {
                let entry = entry.map_err(|e| fs_err(&skills_dir, e))?;
                if entry.path().is_dir() {
                    plugin_dirs.push(entry.path());
                }
            }
        }
        plugin_dirs.sort();
        let manifest_path = output_dir.join(MANIFEST_FILENAME);
        Ok(ComposedTargetBundle {
            harness_id: HarnessId::PiSdk,
            target_name: target_name.to_string(),
            root_dir: output_dir.to_path_buf(),
            plugin_dirs,
            mcp_config_path: None,
            settings_path: None,
            extra: serde_json::json!({ "manifest_path": manifest_path.is_file().then_some(manifest_path) }),
        })
    }

    fn build_run_args(&self, _bundle: &ComposedTargetBundle, _run_options: &RunOptions) -> Vec<String> {
        Vec::new()
    }

    fn get_run_env(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PI_SDK_BUNDLE_MANIFEST".to_string(), bundle.root_dir.join(MANIFEST_FILENAME).display().to_string());
        env.extend(run_options.env.clone());
        env
    }

    fn get_default_run_options(&self, _target_name: &str) -> RunOptions {
        RunOptions::default()
    }
}

fn effective_plugin_name(space: &ResolvedSpace) -> String {
    space.manifest.plugin.name.clone().unwrap_or_else(|| space.id.to_string())
}

fn materialize_tree(src: &Path, dest: &Path, use_hardlinks: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let out = dest.join(rel);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
        }
        let linked = use_hardlinks && std::fs::hard_link(entry.path(), &out).is_ok();
        if !linked {
            std::fs::copy(entry.path(), &out).map_err(|e| fs_err(&out, e))?;
        }
        files.push(rel.to_path_buf());
    }
    Ok(files)
}

fn read_json_opt(path: &Path) -> Option<std::result::Result<Value, String>> {
    if !path.is_file() {
        return None;
    }
    Some(
        std::fs::read_to_string(path)
            .map_err(|e| format!("{}: {e}", path.display()))
            .and_then(|text| serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))),
    )
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AspError::new(ErrorCode::FilesystemError, format!("serializing {}: {e}", path.display())))?;
    std::fs::write(path, text).map_err(|e| fs_err(path, e))
}

fn fs_err(path: &Path, e: std::io::Error) -> AspError {
    AspError::new(ErrorCode::FilesystemError, format!("{}: {e}", path.display()))
}
