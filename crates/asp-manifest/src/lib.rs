#![doc = include_str!("../README.md")]
//! asp-manifest
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_error::{AspError, ErrorCode};
use asp_git::GitRepo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// `plugin { name, version, description, author, keywords, license }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Effective plugin name exposed to harnesses.
    pub name: Option<String>,
    /// Plugin version string (not necessarily semver).
    pub version: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Author string.
    pub author: Option<String>,
    /// Freeform keyword tags.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// SPDX license identifier.
    pub license: Option<String>,
}

/// `deps.spaces` — ordered dependency reference strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deps {
    /// Declared dependency refs, in authored order.
    #[serde(default)]
    pub spaces: Vec<String>,
}

/// `pi.build` — Pi CLI-specific build hints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiConfig {
    /// Build-time settings passed through to the Pi adapter's bundler.
    #[serde(default)]
    pub build: toml::Table,
}

/// `harness.supports` — explicit harness compatibility declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Harness ids this space declares explicit support for.
    #[serde(default)]
    pub supports: Vec<String>,
}

/// Parsed `space.toml`, per spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceManifest {
    /// Must match the space id the manifest was resolved under.
    pub id: String,
    /// Optional semver version of the space's content.
    pub version: Option<String>,
    /// Plugin metadata block.
    #[serde(default)]
    pub plugin: PluginMeta,
    /// Declared dependencies.
    #[serde(default)]
    pub deps: Deps,
    /// Raw passthrough of the `codex` config block.
    #[serde(default)]
    pub codex: toml::Table,
    /// `pi.build` config block.
    #[serde(default)]
    pub pi: PiConfig,
    /// `harness.supports` config block.
    #[serde(default)]
    pub harness: HarnessConfig,
    /// Freeform per-space settings, passed through opaquely.
    #[serde(default)]
    pub settings: toml::Table,
    /// Freeform permission facets, passed through opaquely.
    #[serde(default)]
    pub permissions: toml::Table,

    /// Top-level keys present in the source document but not part of the
    /// known schema. Non-fatal; the reader surfaces these as warnings.
    #[serde(skip)]
    pub unknown_keys: Vec<String>,
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "id", "version", "plugin", "deps", "codex", "pi", "harness", "settings", "permissions",
];

/// A non-fatal finding surfaced while reading a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestWarning {
    /// Human-readable description.
    pub message: String,
}

/// A manifest together with any warnings produced while reading it.
#[derive(Debug, Clone)]
pub struct ManifestRead {
    /// The validated manifest.
    pub manifest: SpaceManifest,
    /// Non-fatal findings (unknown keys, etc).
    pub warnings: Vec<ManifestWarning>,
}

/// Read `<commit>:spaces/<id>/space.toml` from a registry clone.
pub fn read_from_git(repo: &GitRepo, commit: &str, id: &str) -> Result<ManifestRead> {
    let rel = format!("spaces/{id}/space.toml");
    let bytes = repo
        .show(commit, &rel)
        .map_err(asp_git::GitAccessError::into_asp_error)?
        .ok_or_else(|| {
            AspError::new(
                ErrorCode::ManifestInvalid,
                format!("{commit}:{rel} does not exist"),
            )
        })?;
    let text = String::from_utf8(bytes).map_err(|e| {
        AspError::new(ErrorCode::ManifestInvalid, format!("{rel} is not valid UTF-8: {e}"))
    })?;
    parse_and_validate(&text, id)
}

/// Read `<root>/spaces/<id>/space.toml`, or `<path>/space.toml` when an
/// explicit filesystem path override is given (dev spaces).
pub fn read_from_filesystem(root: &Path, id: &str, path_override: Option<&Path>) -> Result<ManifestRead> {
    let manifest_path = match path_override {
        Some(p) => p.join("space.toml"),
        None => root.join("spaces").join(id).join("space.toml"),
    };
    let text = std::fs::read_to_string(&manifest_path).map_err(|e| {
        AspError::new(
            ErrorCode::FilesystemError,
            format!("reading {}: {e}", manifest_path.display()),
        )
    })?;
    parse_and_validate(&text, id)
}

fn parse_and_validate(text: &str, expected_id: &str) -> Result<ManifestRead> {
    let raw: toml::Table = toml::from_str(text)
        .map_err(|e| AspError::new(ErrorCode::ManifestInvalid, format!("space.toml: {e}")))?;

    let mut warnings = Vec::new();
    for key in raw.keys() {
        if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            warnings.push(ManifestWarning {
                message: format!("unknown top-level key '{key}' in space.toml"),
            });
        }
    }

    let mut manifest: SpaceManifest = toml::Value::Table(raw)
        .try_into()
        .map_err(|e| AspError::new(ErrorCode::ManifestInvalid, format!("space.toml: {e}")))?;

    if manifest.id.is_empty() {
        return Err(AspError::new(
            ErrorCode::ManifestInvalid,
            "space.toml is missing required field 'id'",
        ));
    }
    if manifest.id != expected_id {
        return Err(AspError::new(
            ErrorCode::ManifestInvalid,
            format!(
                "space.toml id '{}' does not match expected id '{expected_id}'",
                manifest.id
            ),
        ));
    }

    manifest.unknown_keys = warnings.iter().map(|w| w.message.clone()).collect();
    Ok(ManifestRead { manifest, warnings })
}

/// Build a summary map of declared per-harness config blocks, used by the
/// linter (C10) to cross-check harness-specific facets without re-parsing
/// TOML.
#[must_use]
pub fn harness_blocks(manifest: &SpaceManifest) -> BTreeMap<&'static str, bool> {
    let mut out = BTreeMap::new();
    out.insert("codex", !manifest.codex.is_empty());
    out.insert("pi.build", !manifest.pi.build.is_empty());
    out.insert("harness.supports", !manifest.harness.supports.is_empty());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo_with_manifest(id: &str, toml_body: &str) -> (TempDir, GitRepo, String) {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .status()
                .unwrap();
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);

        let space_dir = dir.path().join("spaces").join(id);
        std::fs::create_dir_all(&space_dir).unwrap();
        std::fs::write(space_dir.join("space.toml"), toml_body).unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);

        let commit = String::from_utf8(
            Command::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(dir.path())
                .output()
                .unwrap()
                .stdout,
        )
        .unwrap()
        .trim()
        .to_string();

        let repo = GitRepo::at(dir.path());
        (dir, repo, commit)
    }

    #[test]
    fn reads_minimal_manifest_from_git() {
        let (_dir, repo, commit) = init_repo_with_manifest("base", "id = \"base\"\n");
        let read = read_from_git(&repo, &commit, "base").unwrap();
        assert_eq!(read.manifest.id, "base");
        assert!(read.warnings.is_empty());
    }

    #[test]
    fn reads_full_manifest_from_git() {
        let body = r#"
id = "base"
version = "1.2.3"

[plugin]
name = "base-plugin"
version = "1.2.3"
description = "a base space"
keywords = ["core"]

[deps]
spaces = ["space:other@stable"]
"#;
        let (_dir, repo, commit) = init_repo_with_manifest("base", body);
        let read = read_from_git(&repo, &commit, "base").unwrap();
        assert_eq!(read.manifest.version.as_deref(), Some("1.2.3"));
        assert_eq!(read.manifest.plugin.name.as_deref(), Some("base-plugin"));
        assert_eq!(read.manifest.deps.spaces, vec!["space:other@stable"]);
    }

    #[test]
    fn unknown_keys_warn_not_fail() {
        let (_dir, repo, commit) =
            init_repo_with_manifest("base", "id = \"base\"\nfuture_field = true\n");
        let read = read_from_git(&repo, &commit, "base").unwrap();
        assert_eq!(read.warnings.len(), 1);
        assert!(read.warnings[0].message.contains("future_field"));
    }

    #[test]
    fn missing_id_is_fatal() {
        let (_dir, repo, commit) = init_repo_with_manifest("base", "version = \"1.0.0\"\n");
        let err = read_from_git(&repo, &commit, "base").unwrap_err();
        assert_eq!(err.code, ErrorCode::ManifestInvalid);
    }

    #[test]
    fn id_mismatch_is_fatal() {
        let (_dir, repo, commit) = init_repo_with_manifest("base", "id = \"other\"\n");
        let err = read_from_git(&repo, &commit, "base").unwrap_err();
        assert_eq!(err.code, ErrorCode::ManifestInvalid);
    }

    #[test]
    fn reads_from_filesystem_dev_path() {
        let dir = TempDir::new().unwrap();
        let space_dir = dir.path().join("my-dev-space");
        std::fs::create_dir_all(&space_dir).unwrap();
        std::fs::write(space_dir.join("space.toml"), "id = \"dev-space\"\n").unwrap();

        let read = read_from_filesystem(dir.path(), "dev-space", Some(&space_dir)).unwrap();
        assert_eq!(read.manifest.id, "dev-space");
    }

    #[test]
    fn reads_from_project_filesystem_layout() {
        let dir = TempDir::new().unwrap();
        let space_dir = dir.path().join("spaces").join("base");
        std::fs::create_dir_all(&space_dir).unwrap();
        std::fs::write(space_dir.join("space.toml"), "id = \"base\"\n").unwrap();

        let read = read_from_filesystem(dir.path(), "base", None).unwrap();
        assert_eq!(read.manifest.id, "base");
    }
}
