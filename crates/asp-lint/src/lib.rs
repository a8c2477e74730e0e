#![doc = include_str!("../README.md")]
//! asp-lint
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_closure::Closure;
use asp_error::{AspError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Whether a [`Warning`] blocks installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Surfaced to the caller but does not block installation.
    Warning,
    /// Fatal: the install pipeline MUST abort before materializing.
    Error,
}

/// The enforced subset of lint codes from spec §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// W201 — two spaces expose the same command.
    CommandNameCollision,
    /// W203 — hook path does not use the plugin-root substitution variable.
    HookPathNoPluginRoot,
    /// W205 — two spaces produce the same effective plugin name.
    PluginNameCollision,
    /// W301 — a blocking hook targets an event the harness cannot block.
    PiHookCannotBlock,
    /// W303 — two extensions materialize to the same filename after namespacing.
    PiToolCollision,
    /// W304 — permissions facet present that the harness cannot enforce.
    PiPermissionLintOnly,
    /// SKILL_MD_MISSING_FRONTMATTER — halts install.
    SkillMdMissingFrontmatter,
}

impl WarningCode {
    /// The stable short identifier used in diagnostics (`"W201"`, etc).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommandNameCollision => "W201",
            Self::HookPathNoPluginRoot => "W203",
            Self::PluginNameCollision => "W205",
            Self::PiHookCannotBlock => "W301",
            Self::PiToolCollision => "W303",
            Self::PiPermissionLintOnly => "W304",
            Self::SkillMdMissingFrontmatter => "SKILL_MD_MISSING_FRONTMATTER",
        }
    }

    /// The severity this code carries unless explicitly overridden.
    #[must_use]
    pub fn default_severity(self) -> Severity {
        match self {
            Self::SkillMdMissingFrontmatter => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

/// `Warning { code, severity, message, details? }`, per spec §4.10.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// The triggered lint code.
    pub code: WarningCode,
    /// Whether this instance blocks installation.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Structured detail payload, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Warning {
    /// Build a warning at its code's default severity.
    #[must_use]
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            severity: code.default_severity(),
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }
}

/// Abort with `LintError` if any warning carries `Severity::Error`. Called
/// by the install orchestrator (C13) before materialization.
pub fn gate(warnings: &[Warning]) -> Result<(), AspError> {
    let fatal: Vec<&Warning> = warnings.iter().filter(|w| w.severity == Severity::Error).collect();
    if fatal.is_empty() {
        return Ok(());
    }
    let summary = fatal.iter().map(|w| format!("{} ({})", w.code.as_str(), w.message)).collect::<Vec<_>>().join("; ");
    Err(AspError::new(ErrorCode::LintError, format!("install blocked by error-severity lint findings: {summary}")))
}

/// Tracks first-seen ownership of a name to detect collisions, used for
/// command names, effective plugin names, and namespaced tool filenames.
pub struct NameCollisionTracker {
    code: WarningCode,
    seen: BTreeMap<String, String>,
}

impl NameCollisionTracker {
    /// Create a tracker that emits `code` on first collision.
    #[must_use]
    pub fn new(code: WarningCode) -> Self {
        Self { code, seen: BTreeMap::new() }
    }

    /// Record that `owner` declares `name`. Returns a [`Warning`] if a
    /// different owner already declared the same name.
    pub fn observe(&mut self, name: &str, owner: &str) -> Option<Warning> {
        if let Some(existing_owner) = self.seen.get(name) {
            if existing_owner != owner {
                return Some(Warning::new(
                    self.code,
                    format!("'{name}' is declared by both '{existing_owner}' and '{owner}'"),
                ));
            }
            return None;
        }
        self.seen.insert(name.to_string(), owner.to_string());
        None
    }
}

/// W205: flag spaces in a closure whose effective plugin name collides.
/// Falls back to the space id when no `plugin.name` is declared, matching
/// the fallback used when generating the lock file.
#[must_use]
pub fn plugin_name_collisions(closure: &Closure) -> Vec<Warning> {
    let mut tracker = NameCollisionTracker::new(WarningCode::PluginNameCollision);
    let mut warnings = Vec::new();
    for resolved in closure.spaces.values() {
        let plugin_name = resolved.manifest.plugin.name.clone().unwrap_or_else(|| resolved.id.to_string());
        if let Some(w) = tracker.observe(&plugin_name, resolved.id.as_str()) {
            warnings.push(w);
        }
    }
    warnings
}

/// W203: a hook script path must reference the harness's plugin-root
/// substitution variable so it resolves after materialization moves the
/// plugin out of the registry clone.
#[must_use]
pub fn hook_path_no_plugin_root(hook_path: &str, plugin_root_var: &str) -> Option<Warning> {
    if hook_path.contains(plugin_root_var) {
        return None;
    }
    Some(Warning::new(
        WarningCode::HookPathNoPluginRoot,
        format!("hook path '{hook_path}' does not reference '{plugin_root_var}'"),
    ))
}

/// W301: a hook marked blocking targets an event the harness cannot block.
#[must_use]
pub fn pi_hook_cannot_block(event: &str, blockable_events: &[&str]) -> Option<Warning> {
    if blockable_events.contains(&event) {
        return None;
    }
    Some(Warning::new(
        WarningCode::PiHookCannotBlock,
        format!("hook event '{event}' cannot block in this harness"),
    ))
}

/// W304: a space declares a `permissions` facet that the target harness
/// can only enforce as a lint, not at runtime.
#[must_use]
pub fn pi_permission_lint_only(space_id: &str, has_permissions_facet: bool) -> Option<Warning> {
    if !has_permissions_facet {
        return None;
    }
    Some(Warning::new(
        WarningCode::PiPermissionLintOnly,
        format!("'{space_id}' declares permissions this harness only lints, never enforces"),
    ))
}

/// SKILL_MD_MISSING_FRONTMATTER: every `SKILL.md` under `root` must begin
/// with a `---` YAML frontmatter fence.
#[must_use]
pub fn skill_frontmatter_warnings(root: &Path) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if entry.file_name() != "SKILL.md" {
            continue;
        }
        let path = entry.path();
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        if !contents.trim_start().starts_with("---") {
            warnings.push(
                Warning::new(
                    WarningCode::SkillMdMissingFrontmatter,
                    format!("{} is missing YAML frontmatter", path.display()),
                )
                .with_details(serde_json::json!({ "path": path.display().to_string() })),
            );
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn gate_passes_with_only_warnings() {
        let warnings = vec![Warning::new(WarningCode::CommandNameCollision, "dup")];
        gate(&warnings).unwrap();
    }

    #[test]
    fn gate_fails_on_error_severity() {
        let warnings = vec![Warning::new(WarningCode::SkillMdMissingFrontmatter, "missing")];
        let err = gate(&warnings).unwrap_err();
        assert_eq!(err.code, ErrorCode::LintError);
    }

    #[test]
    fn collision_tracker_flags_second_distinct_owner() {
        let mut tracker = NameCollisionTracker::new(WarningCode::CommandNameCollision);
        assert!(tracker.observe("deploy", "space-a").is_none());
        assert!(tracker.observe("deploy", "space-a").is_none());
        let warning = tracker.observe("deploy", "space-b").unwrap();
        assert_eq!(warning.code, WarningCode::CommandNameCollision);
    }

    #[test]
    fn hook_path_requires_plugin_root_var() {
        assert!(hook_path_no_plugin_root("${CLAUDE_PLUGIN_ROOT}/hooks/pre.sh", "${CLAUDE_PLUGIN_ROOT}").is_none());
        assert!(hook_path_no_plugin_root("/abs/hooks/pre.sh", "${CLAUDE_PLUGIN_ROOT}").is_some());
    }

    #[test]
    fn skill_frontmatter_check_flags_missing_fence() {
        let dir = TempDir::new().unwrap();
        let skills = dir.path().join("skills/a");
        std::fs::create_dir_all(&skills).unwrap();
        std::fs::write(skills.join("SKILL.md"), "no frontmatter here\n").unwrap();

        let warnings = skill_frontmatter_warnings(dir.path());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::Error);
    }

    #[test]
    fn skill_frontmatter_check_accepts_fenced_file() {
        let dir = TempDir::new().unwrap();
        let skills = dir.path().join("skills/a");
        std::fs::create_dir_all(&skills).unwrap();
        std::fs::write(skills.join("SKILL.md"), "---\nname: a\n---\nbody\n").unwrap();

        assert!(skill_frontmatter_warnings(dir.path()).is_empty());
    }
}
