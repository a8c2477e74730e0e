#![doc = include_str!("../README.md")]
//! asp-harness-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_closure::ResolvedSpace;
use asp_error::AspError;
use asp_lint::Warning;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// The closed set of runtimes Agent Spaces can target, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarnessId {
    /// Claude CLI.
    ClaudeCli,
    /// Pi CLI.
    PiCli,
    /// Codex CLI.
    CodexCli,
    /// Claude Agent SDK.
    ClaudeSdk,
    /// Pi SDK.
    PiSdk,
}

impl HarnessId {
    /// Stable identifier used in directory names and lock file entries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCli => "claude-cli",
            Self::PiCli => "pi-cli",
            Self::CodexCli => "codex-cli",
            Self::ClaudeSdk => "claude-sdk",
            Self::PiSdk => "pi-sdk",
        }
    }
}

impl std::fmt::Display for HarnessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`HarnessAdapter::detect`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectResult {
    /// Whether the runtime was found and is usable.
    pub available: bool,
    /// Reported version string, if discoverable.
    pub version: Option<String>,
    /// Path to the discovered binary or SDK entry point.
    pub path: Option<PathBuf>,
    /// Harness-reported capability payload, passed through opaquely.
    pub capabilities: Option<serde_json::Value>,
    /// Failure detail, present only when `available` is false.
    pub error: Option<String>,
}

/// Outcome of [`HarnessAdapter::validate_space`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateOutcome {
    /// Whether the space passed structural validation.
    pub valid: bool,
    /// Fatal validation errors.
    pub errors: Vec<String>,
    /// Non-fatal findings.
    pub warnings: Vec<Warning>,
}

/// Options controlling [`HarnessAdapter::materialize_space`].
#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// Re-materialize even if a cache entry already exists.
    pub force: bool,
    /// Prefer hardlinks from the snapshot/source over copying.
    pub use_hardlinks: bool,
}

/// Outcome of [`HarnessAdapter::materialize_space`].
#[derive(Debug, Clone)]
pub struct MaterializeOutcome {
    /// The per-space artifact directory.
    pub artifact_path: PathBuf,
    /// Files written, relative to `artifact_path`.
    pub files: Vec<PathBuf>,
    /// Non-fatal findings.
    pub warnings: Vec<Warning>,
}

/// A single space's materialized artifact, ready for composition.
pub struct MaterializedArtifact<'a> {
    /// The resolved space this artifact was built from.
    pub space: &'a ResolvedSpace,
    /// Where [`HarnessAdapter::materialize_space`] wrote its output.
    pub artifact_path: PathBuf,
}

/// Options controlling [`HarnessAdapter::compose_target`].
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    /// Wipe `outputDir` before composing.
    pub clean: bool,
    /// Directory of project-level overrides to layer on top.
    pub inherit_project: Option<PathBuf>,
    /// Directory of user-level overrides to layer on top.
    pub inherit_user: Option<PathBuf>,
    /// Harness-specific target overrides (e.g. `model`, `approval_policy`),
    /// passed through opaquely from the project manifest's target block.
    pub target_overrides: serde_json::Value,
}

/// `ComposedTargetBundle`, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedTargetBundle {
    /// Which harness this bundle targets.
    pub harness_id: HarnessId,
    /// The target name this bundle was composed for.
    pub target_name: String,
    /// The composed output root.
    pub root_dir: PathBuf,
    /// Per-space plugin directories under `root_dir`, in load order.
    #[serde(default)]
    pub plugin_dirs: Vec<PathBuf>,
    /// Merged MCP config path, if this harness uses one.
    pub mcp_config_path: Option<PathBuf>,
    /// Merged settings path, if this harness uses one.
    pub settings_path: Option<PathBuf>,
    /// Harness-specific extra structure, passed through opaquely.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Outcome of [`HarnessAdapter::compose_target`].
#[derive(Debug, Clone)]
pub struct ComposeOutcome {
    /// The resulting bundle descriptor.
    pub bundle: ComposedTargetBundle,
    /// Non-fatal findings (collisions, etc).
    pub warnings: Vec<Warning>,
}

/// Harness-specific defaults and caller overrides for starting a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Requested model id, if any.
    pub model: Option<String>,
    /// Working directory the harness process should run in.
    pub cwd: Option<PathBuf>,
    /// Auto-approve all tool invocations.
    pub yolo: bool,
    /// Additional environment overlay, applied after harness defaults.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Harness-specific extra options, passed through opaquely.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// The contract every harness adapter implements, per spec §4.11.
#[async_trait]
pub trait HarnessAdapter: Send + Sync {
    /// Which harness this adapter implements.
    fn id(&self) -> HarnessId;

    /// Discover the runtime. Implementations SHOULD cache their own result
    /// per process; [`HarnessRegistry::detect_available`] does not cache
    /// on the caller's behalf.
    async fn detect(&self) -> DetectResult;

    /// Structural checks against a resolved space before materialization.
    fn validate_space(&self, space: &ResolvedSpace, snapshot_dir: &Path) -> ValidateOutcome;

    /// Deterministically produce the per-space artifact under `cache_dir`.
    fn materialize_space(
        &self,
        space: &ResolvedSpace,
        snapshot_dir: &Path,
        cache_dir: &Path,
        options: &MaterializeOptions,
    ) -> Result<MaterializeOutcome>;

    /// Merge ordered artifacts into the harness-native layout under
    /// `output_dir`.
    fn compose_target(
        &self,
        target_name: &str,
        artifacts: &[MaterializedArtifact<'_>],
        output_dir: &Path,
        options: &ComposeOptions,
    ) -> Result<ComposeOutcome>;

    /// Rehydrate a bundle descriptor from a previously composed directory.
    fn load_target_bundle(&self, output_dir: &Path, target_name: &str) -> Result<ComposedTargetBundle>;

    /// Command-line arguments (excluding the command path) for a run.
    fn build_run_args(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> Vec<String>;

    /// Process environment overlay for a run.
    fn get_run_env(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> BTreeMap<String, String>;

    /// Harness-specific defaults, merged under explicit CLI overrides by
    /// the caller.
    fn get_default_run_options(&self, target_name: &str) -> RunOptions;

    /// Deterministic on-disk location for this harness's bundle.
    fn get_target_output_path(&self, asp_modules_dir: &Path, target_name: &str) -> PathBuf {
        asp_modules_dir.join(target_name).join(self.id().as_str())
    }
}

/// Process-wide registry of harness adapters, keyed by [`HarnessId`], per
/// spec §4.12.
#[derive(Default)]
pub struct HarnessRegistry {
    adapters: BTreeMap<HarnessId, Arc<dyn HarnessAdapter>>,
}

impl HarnessRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter`. Rejects duplicate ids.
    pub fn register(&mut self, adapter: Arc<dyn HarnessAdapter>) -> Result<()> {
        let id = adapter.id();
        if self.adapters.contains_key(&id) {
            return Err(AspError::new(
                asp_error::ErrorCode::Internal,
                format!("harness '{id}' is already registered"),
            ));
        }
        self.adapters.insert(id, adapter);
        Ok(())
    }

    /// Look up a registered adapter by id.
    #[must_use]
    pub fn get(&self, id: HarnessId) -> Option<Arc<dyn HarnessAdapter>> {
        self.adapters.get(&id).cloned()
    }

    /// Registered ids, in a stable order.
    #[must_use]
    pub fn ids(&self) -> Vec<HarnessId> {
        self.adapters.keys().copied().collect()
    }

    /// Run every adapter's `detect` concurrently. A panicking or erroring
    /// adapter is captured as `{ available: false, error }` rather than
    /// propagated, so one broken adapter cannot prevent discovering the
    /// rest.
    pub async fn detect_available(&self) -> BTreeMap<HarnessId, DetectResult> {
        let futures = self.adapters.iter().map(|(id, adapter)| {
            let id = *id;
            let adapter = Arc::clone(adapter);
            async move {
                let result = std::panic::AssertUnwindSafe(adapter.detect())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        warn!(%id, "harness detect() panicked");
                        DetectResult {
                            available: false,
                            error: Some(format!("{id}: detect() panicked")),
                            ..Default::default()
                        }
                    });
                (id, result)
            }
        });
        futures::future::join_all(futures).await.into_iter().collect()
    }

    /// Adapters whose most recent detection in `detected` succeeded.
    #[must_use]
    pub fn get_available(&self, detected: &BTreeMap<HarnessId, DetectResult>) -> Vec<HarnessId> {
        detected
            .iter()
            .filter(|(id, result)| result.available && self.adapters.contains_key(id))
            .map(|(id, _)| *id)
            .collect()
    }
}
