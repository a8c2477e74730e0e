#![doc = include_str!("../README.md")]
//! asp-harness-pi
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

/// Canonical hook events this harness can block on, per its own event
/// model. Any other event that declares itself blocking is lint-only.
const BLOCKABLE_EVENTS: &[&str] = &["PreToolUse", "UserPromptSubmit"];

const HOOK_BRIDGE_FILENAME: &str = "hook-bridge.js";

/// Pi CLI adapter.
pub struct PiAdapter {
    binary_env_var: &'static str,
    binary_name: &'static str,
}

impl PiAdapter {
    /// The Pi CLI adapter.
    #[must_use]
    pub fn cli() -> Self {
        Self { binary_env_var: "ASP_PI_PATH", binary_name: "pi" }
    }
}

impl Default for PiAdapter {
    fn default() -> Self {
        Self::cli()
    }
}

#[async_trait]
impl HarnessAdapter for PiAdapter {
    fn id(&self) -> HarnessId {
        HarnessId::PiCli
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

    fn validate_space(&self, space: &ResolvedSpace, snapshot_dir: &Path) -> ValidateOutcome {
        let mut warnings = Vec::new();
        let errors = Vec::new();

        if let Some(hooks) = read_json_opt(&snapshot_dir.join("hooks/hooks.json")) {
            match hooks {
                Ok(value) => warnings.extend(blockable_event_warnings(&value)),
                Err(e) => return ValidateOutcome { valid: false, errors: vec![e], warnings },
            }
        }

        if let Some(w) = asp_lint::pi_permission_lint_only(space.id.as_str(), !space.manifest.permissions.is_empty()) {
            warnings.push(w);
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
            debug!(path = %artifact_path.display(), "reusing cached pi artifact");
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
                std::fs::write(&dest, bundle_extension(space.id.as_str(), stem, &source)).map_err(|e| fs_err(&dest, e))?;
                files.push(PathBuf::from("extensions").join(&bundled_name));
            }
        }

        let skills_src = snapshot_dir.join("skills");
        if skills_src.is_dir() {
            let dest = artifact_path.join("skills");
            files.extend(materialize_tree(&skills_src, &dest, use_hardlinks)?.into_iter().map(|p| Path::new("skills").join(p)));
        }

        let hooks_src = snapshot_dir.join("hooks");
        if hooks_src.is_dir() {
            let dest = artifact_path.join("hooks-scripts");
            files.extend(
                materialize_tree(&hooks_src, &dest, use_hardlinks)?.into_iter().map(|p| Path::new("hooks-scripts").join(p)),
            );
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
        let mut plugin_dirs = Vec::with_capacity(artifacts.len());
        let mut extension_names = NameCollisionTracker::new(WarningCode::PiToolCollision);
        let mut bridge_events: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut enabled_skill_dirs = Vec::new();

        let extensions_out = output_dir.join("extensions");
        std::fs::create_dir_all(&extensions_out).map_err(|e| fs_err(&extensions_out, e))?;

        for artifact in artifacts {
            let plugin_name = effective_plugin_name(artifact.space);
            let plugin_dir = output_dir.join("skills").join(&plugin_name);

            let skills_src = artifact.artifact_path.join("skills");
            if skills_src.is_dir() {
                materialize_tree(&skills_src, &plugin_dir, true)?;
                plugin_dirs.push(plugin_dir.clone());
                enabled_skill_dirs.push(format!("skills/{plugin_name}"));
            }

            let hooks_src = artifact.artifact_path.join("hooks-scripts");
            if hooks_src.is_dir() {
                let dest = output_dir.join("hooks-scripts").join(&plugin_name);
                materialize_tree(&hooks_src, &dest, true)?;
            }

            let extensions_src = artifact.artifact_path.join("extensions");
            if extensions_src.is_dir() {
                for entry in std::fs::read_dir(&extensions_src).map_err(|e| fs_err(&extensions_src, e))? {
                    let entry = entry.map_err(|e| fs_err(&extensions_src, e))?;
                    let src_path = entry.path();
                    let Some(filename) = src_path.file_name().and_then(|s| s.to_str()) else { continue };
                    if let Some(w) = extension_names.observe(filename, artifact.space.id.as_str()) {
                        warnings.push(w);
                    }
                    let dest = extensions_out.join(filename);
                    std::fs::copy(&src_path, &dest).map_err(|e| fs_err(&dest, e))?;
                }
            }

            if let Some(Ok(value)) = read_json_opt(&artifact.artifact_path.join("hooks.json")) {
                merge_bridge_events(&mut bridge_events, &value);
            } else if let Some(Ok(value)) = read_json_opt(&artifact.artifact_path.join("hooks-scripts/hooks.json")) {
                merge_bridge_events(&mut bridge_events, &value);
            }
        }

        let bridge_path = extensions_out.join(HOOK_BRIDGE_FILENAME);
        std::fs::write(&bridge_path, hook_bridge_source(&bridge_events)).map_err(|e| fs_err(&bridge_path, e))?;

        let settings_path = output_dir.join("settings.json");
        let settings = serde_json::json!({ "enabledSkillDirectories": enabled_skill_dirs });
        write_json(&settings_path, &settings)?;

        Ok(ComposeOutcome {
            bundle: ComposedTargetBundle {
                harness_id: HarnessId::PiCli,
                target_name: target_name.to_string(),
                root_dir: output_dir.to_path_buf(),
                plugin_dirs,
                mcp_config_path: None,
                settings_path: Some(settings_path),
                extra: serde_json::json!({ "hook_bridge_path": bridge_path }),
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
        let settings_path = output_dir.join("settings.json");
        let bridge_path = output_dir.join("extensions").join(HOOK_BRIDGE_FILENAME);
        Ok(ComposedTargetBundle {
            harness_id: HarnessId::PiCli,
            target_name: target_name.to_string(),
            root_dir: output_dir.to_path_buf(),
            plugin_dirs,
            mcp_config_path: None,
            settings_path: settings_path.is_file().then_some(settings_path),
            extra: serde_json::json!({ "hook_bridge_path": bridge_path.is_file().then_some(bridge_path) }),
        })
    }

    fn build_run_args(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> Vec<String> {
        let mut args = vec!["--plugin-root".to_string(), bundle.root_dir.display().to_string()];
        if let Some(model) = &run_options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }

    fn get_run_env(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PI_PLUGIN_ROOT".to_string(), bundle.root_dir.display().to_string());
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

fn bundle_extension(space_id: &str, name: &str, source: &str) -> String {
    format!("// {space_id}::{name}\n(function(){{\n{source}\n}})();\n")
}

fn hook_bridge_source(bridge_events: &BTreeMap<String, Vec<Value>>) -> String {
    let table = serde_json::to_string_pretty(bridge_events).unwrap_or_else(|_| "{}".to_string());
    format!(
        "// generated hook bridge: translates canonical hook events to harness events\nconst CANONICAL_HOOKS = {table};\nmodule.exports = {{ CANONICAL_HOOKS }};\n"
    )
}

fn blockable_event_warnings(hooks: &Value) -> Vec<Warning> {
    let mut warnings = Vec::new();
    let Value::Object(events) = hooks else { return warnings };
    for (event, entries) in events {
        let Value::Array(entries) = entries else { continue };
        for entry in entries {
            if entry.get("blocking").and_then(Value::as_bool).unwrap_or(false) {
                if let Some(w) = asp_lint::pi_hook_cannot_block(event, BLOCKABLE_EVENTS) {
                    warnings.push(w);
                }
            }
        }
    }
    warnings
}

fn merge_bridge_events(into: &mut BTreeMap<String, Vec<Value>>, value: &Value) {
    let Value::Object(events) = value else { return };
    for (event, entries) in events {
        if let Value::Array(entries) = entries {
            into.entry(event.clone()).or_default().extend(entries.iter().cloned());
        }
    }
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
        let bin = dir.path().join("pi");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::env::set_var("ASP_PI_PATH", &bin);
        let result = PiAdapter::cli().detect().await;
        std::env::remove_var("ASP_PI_PATH");
        assert!(result.available);
        assert_eq!(result.path, Some(bin));
    }

    #[test]
    fn materialize_bundles_extensions_and_renames_hooks() {
        let snapshot_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(snapshot_dir.path().join("extensions")).unwrap();
        std::fs::write(snapshot_dir.path().join("extensions/tool.ts"), "export const run = () => 1;\n").unwrap();
        std::fs::create_dir_all(snapshot_dir.path().join("hooks")).unwrap();
        std::fs::write(snapshot_dir.path().join("hooks/hooks.json"), r#"{"PreToolUse":[{"command":"./check.sh"}]}"#).unwrap();

        let space = fake_space("base", Some("base-plugin"));
        let adapter = PiAdapter::cli();
        let cache_dir = TempDir::new().unwrap();
        let outcome = adapter
            .materialize_space(&space, snapshot_dir.path(), cache_dir.path(), &MaterializeOptions::default())
            .unwrap();
        assert!(outcome.artifact_path.join("extensions/base__tool.js").is_file());
        assert!(outcome.artifact_path.join("hooks-scripts/hooks.json").is_file());
        assert!(!outcome.artifact_path.join("hooks").is_dir());
    }

    #[test]
    fn validate_space_flags_unblockable_hook() {
        let snapshot_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(snapshot_dir.path().join("hooks")).unwrap();
        std::fs::write(
            snapshot_dir.path().join("hooks/hooks.json"),
            r#"{"Stop":[{"command":"./check.sh","blocking":true}]}"#,
        )
        .unwrap();
        let space = fake_space("base", None);
        let outcome = PiAdapter::cli().validate_space(&space, snapshot_dir.path());
        assert!(outcome.valid);
        assert!(outcome.warnings.iter().any(|w| w.code == WarningCode::PiHookCannotBlock));
    }

    #[test]
    fn validate_space_flags_permission_facet_as_lint_only() {
        let snapshot_dir = TempDir::new().unwrap();
        let mut space = fake_space("base", None);
        space.manifest.permissions.insert("deny".to_string(), toml::Value::Array(Vec::new()));
        let outcome = PiAdapter::cli().validate_space(&space, snapshot_dir.path());
        assert!(outcome.warnings.iter().any(|w| w.code == WarningCode::PiPermissionLintOnly));
    }

    #[test]
    fn compose_flags_extension_filename_collision() {
        let make_artifact = |id: &str, plugin: &str| {
            let snapshot_dir = TempDir::new().unwrap();
            std::fs::create_dir_all(snapshot_dir.path().join("extensions")).unwrap();
            std::fs::write(snapshot_dir.path().join("extensions/tool.ts"), "export const run = () => 1;\n").unwrap();
            let space = fake_space(id, Some(plugin));
            let cache_dir = TempDir::new().unwrap();
            let outcome = PiAdapter::cli()
                .materialize_space(&space, snapshot_dir.path(), cache_dir.path(), &MaterializeOptions::default())
                .unwrap();
            (snapshot_dir, cache_dir, space, outcome.artifact_path)
        };

        // Same space id on purpose: simulates two artifact directories that
        // resolve to the same bundled filename, which is the only way the
        // deterministic <spaceId>__<name>.js naming can collide.
        let (_s1, _c1, space_a, artifact_a) = make_artifact("dup-space", "plugin-a");
        let (_s2, _c2, space_b, artifact_b) = make_artifact("dup-space", "plugin-b");

        let output_dir = TempDir::new().unwrap();
        let artifacts = vec![
            MaterializedArtifact { space: &space_a, artifact_path: artifact_a },
            MaterializedArtifact { space: &space_b, artifact_path: artifact_b },
        ];
        let compose = PiAdapter::cli()
            .compose_target("default", &artifacts, output_dir.path(), &ComposeOptions::default())
            .unwrap();
        assert!(compose.warnings.iter().any(|w| w.code == WarningCode::PiToolCollision));
    }

    #[test]
    fn compose_writes_hook_bridge_and_settings() {
        let snapshot_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(snapshot_dir.path().join("hooks")).unwrap();
        std::fs::write(snapshot_dir.path().join("hooks/hooks.json"), r#"{"PreToolUse":[{"command":"./check.sh"}]}"#).unwrap();
        std::fs::create_dir_all(snapshot_dir.path().join("skills/demo")).unwrap();
        std::fs::write(snapshot_dir.path().join("skills/demo/SKILL.md"), "---\nname: demo\n---\nbody").unwrap();

        let space = fake_space("base", Some("base-plugin"));
        let adapter = PiAdapter::cli();
        let cache_dir = TempDir::new().unwrap();
        let outcome = adapter
            .materialize_space(&space, snapshot_dir.path(), cache_dir.path(), &MaterializeOptions::default())
            .unwrap();

        let output_dir = TempDir::new().unwrap();
        let artifacts = vec![MaterializedArtifact { space: &space, artifact_path: outcome.artifact_path }];
        let compose = adapter
            .compose_target("default", &artifacts, output_dir.path(), &ComposeOptions::default())
            .unwrap();

        assert!(output_dir.path().join("extensions").join(HOOK_BRIDGE_FILENAME).is_file());
        let settings_text = std::fs::read_to_string(compose.bundle.settings_path.as_ref().unwrap()).unwrap();
        assert!(settings_text.contains("skills/base-plugin"));
    }
}
