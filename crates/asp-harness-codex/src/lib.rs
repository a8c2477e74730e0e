#![doc = include_str!("../README.md")]
//! asp-harness-codex
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
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const OVERRIDE_KEYS: &[&str] = &["model", "approval_policy", "sandbox_mode", "profile"];

/// Codex CLI adapter.
pub struct CodexAdapter {
    binary_env_var: &'static str,
    binary_name: &'static str,
}

impl CodexAdapter {
    /// The Codex CLI adapter.
    #[must_use]
    pub fn cli() -> Self {
        Self { binary_env_var: "ASP_CODEX_PATH", binary_name: "codex" }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::cli()
    }
}

#[async_trait]
impl HarnessAdapter for CodexAdapter {
    fn id(&self) -> HarnessId {
        HarnessId::CodexCli
    }

    async fn detect(&self) -> DetectResult {
        if let Ok(path) = std::env::var(self.binary_env_var) {
            let path_buf = PathBuf::from(&path);
            if path_buf.is_file() {
                return DetectResult { available: true, path: Some(path_buf), ..Default::default() };
            }
            return DetectResult {
                available: false,
                error: Some(format!("{} points at '{path}' which does not exist", self.binary_env_var)),
                ..Default::default()
            };
        }
        match which(self.binary_name) {
            Some(path) => DetectResult { available: true, path: Some(path), ..Default::default() },
            None => DetectResult {
                available: false,
                error: Some(format!("'{}' not found on PATH", self.binary_name)),
                ..Default::default()
            },
        }
    }

    fn validate_space(&self, _space: &ResolvedSpace, _snapshot_dir: &Path) -> ValidateOutcome {
        ValidateOutcome { valid: true, errors: Vec::new(), warnings: Vec::new() }
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
            debug!(path = %artifact_path.display(), "reusing cached codex artifact");
            return Ok(MaterializeOutcome { artifact_path, files: Vec::new(), warnings: Vec::new() });
        }
        if artifact_path.is_dir() {
            std::fs::remove_dir_all(&artifact_path).map_err(|e| fs_err(&artifact_path, e))?;
        }

        let use_hardlinks = options.use_hardlinks && !space.commit.is_mutable();
        let mut files = Vec::new();

        let agents_src = snapshot_dir.join("AGENTS.md");
        if agents_src.is_file() {
            let dest = artifact_path.join("AGENTS.md");
            copy_one(&agents_src, &dest, use_hardlinks)?;
            files.push(PathBuf::from("AGENTS.md"));
        }

        for (src_name, dest_name) in [("skills", "skills"), ("commands", "prompts")] {
            let src = snapshot_dir.join(src_name);
            if !src.is_dir() {
                continue;
            }
            let dest = artifact_path.join(dest_name);
            match materialize_tree(&src, &dest, use_hardlinks) {
                Ok(copied) => files.extend(copied.into_iter().map(|p| Path::new(dest_name).join(p))),
                Err(e) => {
                    let _ = std::fs::remove_dir_all(&artifact_path);
                    return Err(e);
                }
            }
        }

        let config_toml = toml::Value::Table(space.manifest.codex.clone());
        let config_text = toml::to_string_pretty(&config_toml)
            .map_err(|e| AspError::new(ErrorCode::ManifestInvalid, format!("serializing codex config fragment: {e}")))?;
        std::fs::write(artifact_path.join("config.fragment.toml"), &config_text).map_err(|e| fs_err(&artifact_path, e))?;
        files.push(PathBuf::from("config.fragment.toml"));

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
        let mut plugin_names = NameCollisionTracker::new(WarningCode::PluginNameCollision);
        let mut prompt_names = NameCollisionTracker::new(WarningCode::CommandNameCollision);
        let mut merged_config = toml::value::Table::new();
        let mut agents_md = String::new();

        for artifact in artifacts {
            let plugin_name = effective_plugin_name(artifact.space);
            if let Some(w) = plugin_names.observe(&plugin_name, artifact.space.id.as_str()) {
                warnings.push(w);
            }

            let agents_src = artifact.artifact_path.join("AGENTS.md");
            if let Ok(text) = std::fs::read_to_string(&agents_src) {
                agents_md.push_str(&format!(
                    "<!-- BEGIN {} -->\n{}\n<!-- END {} -->\n\n",
                    artifact.space.id, text.trim_end(), artifact.space.id
                ));
            }

            for (subdir, name) in [("skills", &plugin_name), ("prompts", &plugin_name)] {
                let src = artifact.artifact_path.join(subdir);
                if !src.is_dir() {
                    continue;
                }
                let dest = output_dir.join(subdir).join(name.as_str());
                materialize_tree(&src, &dest, true)?;
                if subdir == "prompts" {
                    if let Ok(entries) = std::fs::read_dir(&src) {
                        for entry in entries.flatten() {
                            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                                if let Some(w) = prompt_names.observe(stem, artifact.space.id.as_str()) {
                                    warnings.push(w);
                                }
                            }
                        }
                    }
                }
            }

            let fragment_path = artifact.artifact_path.join("config.fragment.toml");
            if let Ok(text) = std::fs::read_to_string(&fragment_path) {
                if let Ok(toml::Value::Table(table)) = toml::from_str::<toml::Value>(&text) {
                    merge_toml_shallow(&mut merged_config, &table);
                }
            }
        }

        apply_target_overrides(&mut merged_config, &options.target_overrides);

        let config_text = toml::to_string_pretty(&toml::Value::Table(merged_config))
            .map_err(|e| AspError::new(ErrorCode::ManifestInvalid, format!("serializing codex config.toml: {e}")))?;
        let config_path = output_dir.join("config.toml");
        std::fs::write(&config_path, &config_text).map_err(|e| fs_err(&config_path, e))?;

        let agents_path = output_dir.join("AGENTS.md");
        std::fs::write(&agents_path, &agents_md).map_err(|e| fs_err(&agents_path, e))?;

        Ok(ComposeOutcome {
            bundle: ComposedTargetBundle {
                harness_id: HarnessId::CodexCli,
                target_name: target_name.to_string(),
                root_dir: output_dir.to_path_buf(),
                plugin_dirs: Vec::new(),
                mcp_config_path: None,
                settings_path: None,
                extra: serde_json::json!({
                    "config_path": config_path,
                    "agents_md_path": agents_path,
                }),
            },
            warnings,
        })
    }

    fn load_target_bundle(&self, output_dir: &Path, target_name: &str) -> Result<ComposedTargetBundle> {
        if !output_dir.is_dir() {
            return Err(AspError::new(ErrorCode::FilesystemError, format!("{} does not exist", output_dir.display())));
        }
        let config_path = output_dir.join("config.toml");
        let agents_path = output_dir.join("AGENTS.md");
        Ok(ComposedTargetBundle {
            harness_id: HarnessId::CodexCli,
            target_name: target_name.to_string(),
            root_dir: output_dir.to_path_buf(),
            plugin_dirs: Vec::new(),
            mcp_config_path: None,
            settings_path: None,
            extra: serde_json::json!({
                "config_path": config_path.is_file().then_some(config_path),
                "agents_md_path": agents_path.is_file().then_some(agents_path),
            }),
        })
    }

    fn build_run_args(&self, _bundle: &ComposedTargetBundle, run_options: &RunOptions) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(model) = &run_options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if run_options.yolo {
            args.push("--full-auto".to_string());
        }
        args
    }

    fn get_run_env(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CODEX_HOME".to_string(), bundle.root_dir.display().to_string());
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

fn merge_toml_shallow(into: &mut toml::value::Table, value: &toml::value::Table) {
    for (k, v) in value {
        into.insert(k.clone(), v.clone());
    }
}

fn apply_target_overrides(into: &mut toml::value::Table, overrides: &serde_json::Value) {
    let Some(obj) = overrides.as_object() else { return };
    for key in OVERRIDE_KEYS {
        if let Some(v) = obj.get(*key) {
            if let Some(toml_v) = json_to_toml(v) {
                into.insert((*key).to_string(), toml_v);
            }
        }
    }
}

fn json_to_toml(v: &serde_json::Value) -> Option<toml::Value> {
    use serde_json::Value as J;
    Some(match v {
        J::Null => return None,
        J::Bool(b) => toml::Value::Boolean(*b),
        J::Number(n) => {
            if let Some(i) = n.as_i64() {
                toml::Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                toml::Value::Float(f)
            } else {
                return None;
            }
        }
        J::String(s) => toml::Value::String(s.clone()),
        J::Array(arr) => toml::Value::Array(arr.iter().filter_map(json_to_toml).collect()),
        J::Object(map) => {
            let mut t = toml::value::Table::new();
            for (k, val) in map {
                if let Some(tv) = json_to_toml(val) {
                    t.insert(k.clone(), tv);
                }
            }
            toml::Value::Table(t)
        }
    })
}

fn copy_one(src: &Path, dest: &Path, use_hardlinks: bool) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
    }
    let linked = use_hardlinks && std::fs::hard_link(src, dest).is_ok();
    if !linked {
        std::fs::copy(src, dest).map_err(|e| fs_err(dest, e))?;
    }
    Ok(())
}

fn materialize_tree(src: &Path, dest: &Path, use_hardlinks: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let out = dest.join(rel);
        copy_one(entry.path(), &out, use_hardlinks)?;
        files.push(rel.to_path_buf());
    }
    Ok(files)
}

fn fs_err(path: &Path, e: std::io::Error) -> AspError {
    AspError::new(ErrorCode::FilesystemError, format!("{}: {e}", path.display()))
}

fn which(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(binary)).find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use asp_closure::ResolvedSpace;
    use asp_manifest::{Deps, PluginMeta, SpaceManifest};
    use asp_refs::{CommitSha, SpaceId, SpaceKey};
    use asp_resolve::ResolvedSelector;
    use tempfile::TempDir;

    fn fake_space(id: &str, plugin_name: Option<&str>, codex: toml::Table) -> ResolvedSpace {
        let space_id = SpaceId::parse(id).unwrap();
        let commit = CommitSha::parse("abcdef1234567890abcdef1234567890abcdef12").unwrap();
        ResolvedSpace {
            key: SpaceKey::new(&space_id, &commit),
            id: space_id,
            commit,
            path: None,
            manifest: SpaceManifest {
                id: id.to_string(),
                version: None,
                plugin: PluginMeta { name: plugin_name.map(str::to_string), ..Default::default() },
                deps: Deps::default(),
                codex,
                pi: Default::default(),
                harness: Default::default(),
                settings: toml::Table::default(),
                permissions: toml::Table::default(),
                unknown_keys: Vec::new(),
            },
            resolved_from: ResolvedSelector::Dev,
            deps: Vec::new(),
            project_space: false,
        }
    }

    #[tokio::test]
    async fn detect_checks_env_override_first() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("codex");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::env::set_var("ASP_CODEX_PATH", &bin);
        let result = CodexAdapter::cli().detect().await;
        std::env::remove_var("ASP_CODEX_PATH");
        assert!(result.available);
        assert_eq!(result.path, Some(bin));
    }

    #[test]
    fn materialize_renames_commands_to_prompts() {
        let snapshot_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(snapshot_dir.path().join("commands")).unwrap();
        std::fs::write(snapshot_dir.path().join("commands/deploy.md"), "# deploy\n").unwrap();
        std::fs::write(snapshot_dir.path().join("AGENTS.md"), "be nice\n").unwrap();

        let mut codex_config = toml::Table::new();
        codex_config.insert("model".to_string(), toml::Value::String("gpt-5-codex".to_string()));
        let space = fake_space("base", Some("base-plugin"), codex_config);

        let adapter = CodexAdapter::cli();
        let cache_dir = TempDir::new().unwrap();
        let outcome = adapter
            .materialize_space(&space, snapshot_dir.path(), cache_dir.path(), &MaterializeOptions::default())
            .unwrap();
        assert!(outcome.artifact_path.join("prompts/deploy.md").is_file());
        assert!(outcome.artifact_path.join("AGENTS.md").is_file());
        assert!(outcome.artifact_path.join("config.fragment.toml").is_file());
    }

    #[test]
    fn compose_merges_config_and_applies_target_overrides() {
        let snapshot_dir = TempDir::new().unwrap();
        std::fs::write(snapshot_dir.path().join("AGENTS.md"), "base agent rules\n").unwrap();
        let mut codex_config = toml::Table::new();
        codex_config.insert("model".to_string(), toml::Value::String("gpt-5-codex".to_string()));
        let space = fake_space("base", Some("base-plugin"), codex_config);

        let adapter = CodexAdapter::cli();
        let cache_dir = TempDir::new().unwrap();
        let outcome = adapter
            .materialize_space(&space, snapshot_dir.path(), cache_dir.path(), &MaterializeOptions::default())
            .unwrap();

        let output_dir = TempDir::new().unwrap();
        let artifacts = vec![MaterializedArtifact { space: &space, artifact_path: outcome.artifact_path }];
        let mut options = ComposeOptions::default();
        options.target_overrides = serde_json::json!({ "model": "gpt-5-codex-high", "approval_policy": "on-failure" });
        let compose = adapter.compose_target("default", &artifacts, output_dir.path(), &options).unwrap();

        let config_text = std::fs::read_to_string(output_dir.path().join("config.toml")).unwrap();
        assert!(config_text.contains("gpt-5-codex-high"));
        assert!(config_text.contains("on-failure"));

        let agents_text = std::fs::read_to_string(output_dir.path().join("AGENTS.md")).unwrap();
        assert!(agents_text.contains("BEGIN base"));
        assert!(agents_text.contains("base agent rules"));
        assert!(compose.bundle.extra.get("config_path").is_some());
    }

    #[test]
    fn compose_flags_prompt_name_collision() {
        let make_artifact = |id: &str, plugin: &str| {
            let snapshot_dir = TempDir::new().unwrap();
            std::fs::create_dir_all(snapshot_dir.path().join("commands")).unwrap();
            std::fs::write(snapshot_dir.path().join("commands/deploy.md"), "# deploy\n").unwrap();
            let space = fake_space(id, Some(plugin), toml::Table::default());
            let cache_dir = TempDir::new().unwrap();
            let outcome = CodexAdapter::cli()
                .materialize_space(&space, snapshot_dir.path(), cache_dir.path(), &MaterializeOptions::default())
                .unwrap();
            (snapshot_dir, cache_dir, space, outcome.artifact_path)
        };

        let (_s1, _c1, space_a, artifact_a) = make_artifact("space-a", "plugin-a");
        let (_s2, _c2, space_b, artifact_b) = make_artifact("space-b", "plugin-b");

        let output_dir = TempDir::new().unwrap();
        let artifacts = vec![
            MaterializedArtifact { space: &space_a, artifact_path: artifact_a },
            MaterializedArtifact { space: &space_b, artifact_path: artifact_b },
        ];
        let compose = CodexAdapter::cli()
            .compose_target("default", &artifacts, output_dir.path(), &ComposeOptions::default())
            .unwrap();
        assert!(compose.warnings.iter().any(|w| w.code == WarningCode::CommandNameCollision));
    }

    #[test]
    fn get_run_env_exposes_codex_home() {
        let bundle = ComposedTargetBundle {
            harness_id: HarnessId::CodexCli,
            target_name: "default".to_string(),
            root_dir: PathBuf::from("/out"),
            plugin_dirs: Vec::new(),
            mcp_config_path: None,
            settings_path: None,
            extra: serde_json::Value::Null,
        };
        let env = CodexAdapter::cli().get_run_env(&bundle, &RunOptions::default());
        assert_eq!(env.get("CODEX_HOME"), Some(&"/out".to_string()));
    }
}
