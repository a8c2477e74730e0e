#![doc = include_str!("../README.md")]
//! asp-harness-claude
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

const PLUGIN_ROOT_VAR: &str = "${CLAUDE_PLUGIN_ROOT}";
const LINKED_SUBDIRS: &[&str] = &["commands", "agents", "skills", "hooks", "mcp"];

/// Claude CLI adapter. Identical bundle layout is reused for the Claude
/// Agent SDK by constructing with [`ClaudeAdapter::sdk`].
pub struct ClaudeAdapter {
    id: HarnessId,
    binary_env_var: &'static str,
    binary_name: &'static str,
}

impl ClaudeAdapter {
    /// The Claude CLI adapter.
    #[must_use]
    pub fn cli() -> Self {
        Self { id: HarnessId::ClaudeCli, binary_env_var: "ASP_CLAUDE_PATH", binary_name: "claude" }
    }

    /// The Claude Agent SDK adapter (same bundle layout, different
    /// discovery and run surface).
    #[must_use]
    pub fn sdk() -> Self {
        Self { id: HarnessId::ClaudeSdk, binary_env_var: "ASP_CLAUDE_PATH", binary_name: "claude" }
    }
}

#[async_trait]
impl HarnessAdapter for ClaudeAdapter {
    fn id(&self) -> HarnessId {
        self.id
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

    fn validate_space(&self, _space: &ResolvedSpace, snapshot_dir: &Path) -> ValidateOutcome {
        let mut warnings = Vec::new();
        let errors = Vec::new();

        if let Some(hooks) = read_json_opt(&snapshot_dir.join("hooks/hooks.json")) {
            match hooks {
                Ok(value) => warnings.extend(hook_path_warnings(&value)),
                Err(e) => {
                    return ValidateOutcome { valid: false, errors: vec![e], warnings };
                }
            }
        }

        ValidateOutcome { valid: errors.is_empty(), errors, warnings }
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
            debug!(path = %artifact_path.display(), "reusing cached claude artifact");
            return Ok(MaterializeOutcome { artifact_path, files: Vec::new(), warnings: Vec::new() });
        }
        if artifact_path.is_dir() {
            std::fs::remove_dir_all(&artifact_path).map_err(|e| fs_err(&artifact_path, e))?;
        }

        let use_hardlinks = options.use_hardlinks && !space.commit.is_mutable();
        let files = match materialize_tree(snapshot_dir, &artifact_path, use_hardlinks) {
            Ok(files) => files,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&artifact_path);
                return Err(e);
            }
        };

        let plugin_name = effective_plugin_name(space);
        let plugin_json = serde_json::json!({
            "name": plugin_name,
            "version": space.manifest.plugin.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
            "description": space.manifest.plugin.description,
            "author": space.manifest.plugin.author,
            "keywords": space.manifest.plugin.keywords,
            "license": space.manifest.plugin.license,
        });
        write_json(&artifact_path.join("plugin.json"), &plugin_json)?;

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
        let mut plugin_dirs = Vec::with_capacity(artifacts.len());
        let mut command_names = NameCollisionTracker::new(WarningCode::CommandNameCollision);
        let mut plugin_names = NameCollisionTracker::new(WarningCode::PluginNameCollision);
        let mut merged_hooks: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut merged_mcp_servers: BTreeMap<String, Value> = BTreeMap::new();
        let mut merged_settings = serde_json::Map::new();

        for artifact in artifacts {
            let plugin_name = effective_plugin_name(artifact.space);
            if let Some(w) = plugin_names.observe(&plugin_name, artifact.space.id.as_str()) {
                warnings.push(w);
            }

            let plugin_dir = output_dir.join(&plugin_name);
            link_subdirs(&artifact.artifact_path, &plugin_dir)?;
            plugin_dirs.push(plugin_dir.clone());

            for subdir in ["commands", "agents"] {
                if let Ok(entries) = std::fs::read_dir(artifact.artifact_path.join(subdir)) {
                    for entry in entries.flatten() {
                        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                            if let Some(w) = command_names.observe(stem, artifact.space.id.as_str()) {
                                warnings.push(w);
                            }
                        }
                    }
                }
            }

            if let Some(Ok(value)) = read_json_opt(&artifact.artifact_path.join("hooks/hooks.json")) {
                warnings.extend(hook_path_warnings(&value));
                merge_hooks(&mut merged_hooks, &value);
            }
            if let Some(Ok(value)) = read_json_opt(&artifact.artifact_path.join("mcp/mcp.json")) {
                merge_mcp(&mut merged_mcp_servers, &value);
            }
            if let Some(Ok(Value::Object(obj))) = read_json_opt(&artifact.artifact_path.join("settings.json")) {
                for (k, v) in obj {
                    merged_settings.insert(k, v);
                }
            }
        }

        let hooks_path = output_dir.join("hooks.json");
        write_json(&hooks_path, &Value::Object(merged_hooks.into_iter().map(|(k, v)| (k, Value::Array(v))).collect()))?;

        let mcp_path = output_dir.join("mcp.json");
        let mcp_value = serde_json::json!({ "mcpServers": Value::Object(merged_mcp_servers.into_iter().collect()) });
        write_json(&mcp_path, &mcp_value)?;

        let settings_path = output_dir.join("settings.json");
        write_json(&settings_path, &Value::Object(merged_settings))?;

        Ok(ComposeOutcome {
            bundle: ComposedTargetBundle {
                harness_id: self.id,
                target_name: target_name.to_string(),
                root_dir: output_dir.to_path_buf(),
                plugin_dirs,
                mcp_config_path: Some(mcp_path),
                settings_path: Some(settings_path),
                extra: Value::Null,
            },
            warnings,
        })
    }

    fn load_target_bundle(&self, output_dir: &Path, target_name: &str) -> Result<ComposedTargetBundle> {
        if !output_dir.is_dir() {
            return Err(AspError::new(ErrorCode::FilesystemError, format!("{} does not exist", output_dir.display())));
        }
        let mut plugin_dirs = Vec::new();
        for entry in std::fs::read_dir(output_dir).map_err(|e| fs_err(output_dir, e))? {
            let entry = entry.map_err(|e| fs_err(output_dir, e))?;
            if entry.path().is_dir() {
                plugin_dirs.push(entry.path());
            }
        }
        plugin_dirs.sort();
        let mcp_path = output_dir.join("mcp.json");
        let settings_path = output_dir.join("settings.json");
        Ok(ComposedTargetBundle {
            harness_id: self.id,
            target_name: target_name.to_string(),
            root_dir: output_dir.to_path_buf(),
            plugin_dirs,
            mcp_config_path: mcp_path.is_file().then_some(mcp_path),
            settings_path: settings_path.is_file().then_some(settings_path),
            extra: Value::Null,
        })
    }

    fn build_run_args(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> Vec<String> {
        let mut args = vec!["--plugin-root".to_string(), bundle.root_dir.display().to_string()];
        if let Some(model) = &run_options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if run_options.yolo {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args
    }

    fn get_run_env(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CLAUDE_PLUGIN_ROOT".to_string(), bundle.root_dir.display().to_string());
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

fn link_subdirs(artifact_path: &Path, plugin_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(plugin_dir).map_err(|e| fs_err(plugin_dir, e))?;
    for subdir in LINKED_SUBDIRS {
        let src = artifact_path.join(subdir);
        if !src.is_dir() {
            continue;
        }
        let dest = plugin_dir.join(subdir);
        materialize_tree(&src, &dest, true)?;
    }
    let plugin_json = artifact_path.join("plugin.json");
    if plugin_json.is_file() {
        std::fs::copy(&plugin_json, plugin_dir.join("plugin.json")).map_err(|e| fs_err(&plugin_json, e))?;
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

fn hook_path_warnings(hooks: &Value) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let Value::Object(events) = hooks else {
        return warnings;
    };
    for entries in events.values() {
        let Value::Array(entries) = entries else { continue };
        for entry in entries {
            if let Some(command) = entry.get("command").and_then(Value::as_str) {
                if let Some(w) = asp_lint::hook_path_no_plugin_root(command, PLUGIN_ROOT_VAR) {
                    warnings.push(w);
                }
            }
        }
    }
    warnings
}

fn merge_hooks(into: &mut BTreeMap<String, Vec<Value>>, value: &Value) {
    let Value::Object(events) = value else { return };
    for (event, entries) in events {
        if let Value::Array(entries) = entries {
            into.entry(event.clone()).or_default().extend(entries.iter().cloned());
        }
    }
}

fn merge_mcp(into: &mut BTreeMap<String, Value>, value: &Value) {
    let Some(servers) = value.get("mcpServers").and_then(Value::as_object) else {
        return;
    };
    for (name, config) in servers {
        into.insert(name.clone(), config.clone());
    }
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

    fn fake_space(id: &str, plugin_name: Option<&str>) -> ResolvedSpace {
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
                codex: toml::Table::default(),
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
        let bin = dir.path().join("claude");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::env::set_var("ASP_CLAUDE_PATH", &bin);
        let result = ClaudeAdapter::cli().detect().await;
        std::env::remove_var("ASP_CLAUDE_PATH");
        assert!(result.available);
        assert_eq!(result.path, Some(bin));
    }

    #[test]
    fn materialize_then_compose_writes_plugin_json() {
        let snapshot_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(snapshot_dir.path().join("commands")).unwrap();
        std::fs::write(snapshot_dir.path().join("commands/deploy.md"), "# deploy\n").unwrap();

        let space = fake_space("base", Some("base-plugin"));
        let adapter = ClaudeAdapter::cli();
        let cache_dir = TempDir::new().unwrap();
        let outcome = adapter
            .materialize_space(&space, snapshot_dir.path(), cache_dir.path(), &MaterializeOptions::default())
            .unwrap();
        assert!(outcome.artifact_path.join("plugin.json").is_file());
        assert!(outcome.artifact_path.join("commands/deploy.md").is_file());

        let output_dir = TempDir::new().unwrap();
        let artifacts = vec![MaterializedArtifact { space: &space, artifact_path: outcome.artifact_path }];
        let compose = adapter
            .compose_target("default", &artifacts, output_dir.path(), &ComposeOptions::default())
            .unwrap();
        assert_eq!(compose.bundle.plugin_dirs.len(), 1);
        assert!(compose.bundle.plugin_dirs[0].join("commands/deploy.md").is_file());
        assert!(compose.bundle.mcp_config_path.unwrap().is_file());
    }

    #[test]
    fn compose_flags_command_name_collision() {
        let make_artifact = |id: &str, plugin: &str| {
            let snapshot_dir = TempDir::new().unwrap();
            std::fs::create_dir_all(snapshot_dir.path().join("commands")).unwrap();
            std::fs::write(snapshot_dir.path().join("commands/deploy.md"), "# deploy\n").unwrap();
            let space = fake_space(id, Some(plugin));
            let cache_dir = TempDir::new().unwrap();
            let outcome = ClaudeAdapter::cli()
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
        let compose = ClaudeAdapter::cli()
            .compose_target("default", &artifacts, output_dir.path(), &ComposeOptions::default())
            .unwrap();
        assert!(compose.warnings.iter().any(|w| w.code == WarningCode::CommandNameCollision));
    }

    #[test]
    fn get_run_env_exposes_plugin_root() {
        let bundle = ComposedTargetBundle {
            harness_id: HarnessId::ClaudeCli,
            target_name: "default".to_string(),
            root_dir: PathBuf::from("/out"),
            plugin_dirs: Vec::new(),
            mcp_config_path: None,
            settings_path: None,
            extra: Value::Null,
        };
        let env = ClaudeAdapter::cli().get_run_env(&bundle, &RunOptions::default());
        assert_eq!(env.get("CLAUDE_PLUGIN_ROOT"), Some(&"/out".to_string()));
    }
}
