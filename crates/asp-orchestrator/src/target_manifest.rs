//! Parsing and validation for the project manifest (`asp-targets.toml`),
//! per spec §3 / §6.

use asp_error::{AspError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Result alias for this module's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

const SUPPORTED_SCHEMA: u32 = 1;

/// One entry in the `targets` table of `asp-targets.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Ordered `space:<id>@<selector>` references this target composes.
    #[serde(default)]
    pub compose: Vec<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Auto-approve all tool invocations for this target.
    #[serde(default)]
    pub yolo: bool,
    /// Claude-specific overrides, passed through opaquely.
    #[serde(default)]
    pub claude: toml::Table,
    /// Codex-specific overrides, passed through opaquely.
    #[serde(default)]
    pub codex: toml::Table,
    /// Pi-specific overrides, passed through opaquely.
    #[serde(default)]
    pub pi: toml::Table,
    /// SDK-specific overrides, passed through opaquely.
    #[serde(default)]
    pub sdk: toml::Table,
}

/// Parsed `asp-targets.toml`, per spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetManifest {
    /// Must equal 1.
    pub schema: u32,
    /// Default Claude options applied under every target's own overrides.
    #[serde(default)]
    pub claude: toml::Table,
    /// Default Codex options applied under every target's own overrides.
    #[serde(default)]
    pub codex: toml::Table,
    /// Default Pi options applied under every target's own overrides.
    #[serde(default)]
    pub pi: toml::Table,
    /// Default SDK options applied under every target's own overrides.
    #[serde(default)]
    pub sdk: toml::Table,
    /// Named targets, each composing a non-empty space list.
    pub targets: BTreeMap<String, TargetSpec>,
}

impl TargetManifest {
    /// Validate the enforced fields from spec §6: `schema=1`, at least one
    /// target, each with a non-empty `compose`.
    pub fn validate(&self) -> Result<()> {
        if self.schema != SUPPORTED_SCHEMA {
            return Err(AspError::new(
                ErrorCode::ManifestInvalid,
                format!("asp-targets.toml schema {} is not supported (expected {SUPPORTED_SCHEMA})", self.schema),
            ));
        }
        if self.targets.is_empty() {
            return Err(AspError::new(ErrorCode::ManifestInvalid, "asp-targets.toml declares no targets"));
        }
        for (name, target) in &self.targets {
            if target.compose.is_empty() {
                return Err(AspError::new(
                    ErrorCode::ManifestInvalid,
                    format!("target '{name}' has an empty compose list"),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the target names to operate over: the explicit list when
    /// given, otherwise every declared target.
    #[must_use]
    pub fn select_target_names(&self, requested: Option<&[String]>) -> Vec<String> {
        match requested {
            Some(names) => names.to_vec(),
            None => self.targets.keys().cloned().collect(),
        }
    }
}

/// Read and validate `<project_root>/asp-targets.toml`.
pub fn read_from_filesystem(project_root: &Path) -> Result<TargetManifest> {
    let path = asp_paths::project_manifest_path(project_root);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| AspError::new(ErrorCode::FilesystemError, format!("reading {}: {e}", path.display())))?;
    let manifest: TargetManifest =
        toml::from_str(&text).map_err(|e| AspError::new(ErrorCode::ManifestInvalid, format!("{}: {e}", path.display())))?;
    manifest.validate()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_minimal_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("asp-targets.toml"),
            r#"
schema = 1

[targets.default]
compose = ["space:base@stable"]
"#,
        )
        .unwrap();
        let manifest = read_from_filesystem(dir.path()).unwrap();
        assert_eq!(manifest.targets.len(), 1);
        assert_eq!(manifest.targets["default"].compose, vec!["space:base@stable"]);
    }

    #[test]
    fn rejects_unsupported_schema() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("asp-targets.toml"), "schema = 2\n[targets.default]\ncompose = [\"space:a@dev\"]\n")
            .unwrap();
        let err = read_from_filesystem(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ManifestInvalid);
    }

    #[test]
    fn rejects_empty_compose() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("asp-targets.toml"), "schema = 1\n[targets.default]\ncompose = []\n").unwrap();
        let err = read_from_filesystem(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ManifestInvalid);
    }

    #[test]
    fn rejects_no_targets() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("asp-targets.toml"), "schema = 1\n").unwrap();
        let err = read_from_filesystem(dir.path()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ManifestInvalid);
    }

    #[test]
    fn select_target_names_defaults_to_all() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("asp-targets.toml"),
            "schema = 1\n[targets.a]\ncompose = [\"space:x@dev\"]\n[targets.b]\ncompose = [\"space:y@dev\"]\n",
        )
        .unwrap();
        let manifest = read_from_filesystem(dir.path()).unwrap();
        let mut names = manifest.select_target_names(None);
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
