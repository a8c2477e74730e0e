#![doc = include_str!("../README.md")]
//! asp-orchestrator
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod target_manifest;

use asp_closure::{Closure, ClosureOptions, ResolvedSpace};
use asp_error::{AspError, ErrorCode};
use asp_git::GitRepo;
use asp_harness_core::{ComposeOptions, ComposedTargetBundle, HarnessId, HarnessRegistry, MaterializeOptions, MaterializedArtifact};
use asp_integrity::{env_hash, hash_space, EnvEntry};
use asp_lock::{write_atomic, LockFile, ProjectLock, RegistryInfo};
use asp_paths::AspHome;
use asp_refs::{CommitSha, Sha256Integrity, SpaceId, SpaceKey, SpaceRef};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use target_manifest::{TargetManifest, TargetSpec};
use tracing::{info, warn};

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

const LOCKFILE_VERSION: u32 = 1;
const RESOLVER_VERSION: u32 = 1;

/// Inputs shared by [`install`], [`install_needed`] and [`build`].
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Root of the project consuming spaces (holds `asp-targets.toml`).
    pub project_root: PathBuf,
    /// Clone URL recorded in the lock file's `registry` block.
    pub registry_url: String,
    /// Target names to operate over; `None` means every declared target.
    pub targets: Option<Vec<String>>,
    /// Re-resolve against the registry instead of respecting the existing
    /// lock file verbatim.
    pub update: bool,
    /// When `update` is set, restrict re-resolution to these space ids;
    /// every other locked space stays pinned to its current commit. Empty
    /// means re-resolve everything.
    pub upgrade_space_ids: Vec<String>,
    /// Re-materialize and recompose even if cached output already exists.
    pub refresh: bool,
    /// Prefer hardlinks over copies when materializing artifacts.
    pub use_hardlinks: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            project_root: PathBuf::new(),
            registry_url: String::new(),
            targets: None,
            update: false,
            upgrade_space_ids: Vec::new(),
            refresh: false,
            use_hardlinks: true,
        }
    }
}

/// Outcome of a full [`install`] run.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// The lock file written to `asp-lock.json`.
    pub lock: LockFile,
    /// Composed bundles, keyed by target name, one entry per harness the
    /// caller's registry has registered.
    pub bundles: BTreeMap<String, Vec<ComposedTargetBundle>>,
    /// Accumulated non-fatal lint findings, as rendered messages.
    pub warnings: Vec<String>,
}

/// Run the full install pipeline (spec §4.13):
///
/// 1. ensure the `ASP_HOME` scaffold exists and best-effort fetch the
///    registry;
/// 2. read the project manifest and select target names;
/// 3. resolve pinned spaces from the existing lock for selective upgrades;
/// 4. resolve each target's closure and accumulate a merged lock;
/// 5. populate the content-addressed store for every non-dev/non-project
///    space;
/// 6. gate on lint errors;
/// 7. write the lock file atomically under the project advisory lock;
/// 8. materialize and compose each target's bundle per registered harness.
pub fn install(home: &AspHome, repo: &GitRepo, registry: &HarnessRegistry, options: &InstallOptions) -> Result<InstallOutcome> {
    home.ensure_scaffold().map_err(|e| fs_err(home.root(), e))?;
    if let Err(e) = repo.fetch_all() {
        warn!(error = %e, "best-effort registry fetch failed, continuing with local refs");
    }

    let manifest = target_manifest::read_from_filesystem(&options.project_root)?;
    let target_names = select_targets(&manifest, options)?;

    let existing_lock = read_existing_lock(&options.project_root);
    let pinned_spaces = compute_pinned_spaces(options, existing_lock.as_ref());

    let mut closures: BTreeMap<String, (Closure, Vec<String>)> = BTreeMap::new();
    for name in &target_names {
        let spec = &manifest.targets[name];
        let closure = resolve_target_closure(repo, &options.project_root, &pinned_spaces, spec)?;
        closures.insert(name.clone(), (closure, spec.compose.clone()));
    }

    let integrities = populate_store(home, repo, closures.values().map(|(c, _)| c))?;

    let mut all_warnings = Vec::new();
    for (closure, _) in closures.values() {
        let mut warnings = asp_lint::plugin_name_collisions(closure);
        for space in closure.spaces.values() {
            if let Some(snapshot_dir) = snapshot_dir_for(home, space, &integrities) {
                warnings.extend(asp_lint::skill_frontmatter_warnings(&snapshot_dir));
            }
        }
        asp_lint::gate(&warnings)?;
        all_warnings.extend(warnings.into_iter().map(|w| w.message));
    }

    let mut merged = existing_lock.unwrap_or_else(|| empty_lock(&options.registry_url));
    for (name, (closure, compose_refs)) in &closures {
        let target_hash = target_env_hash(closure, &integrities);
        let target_lock = LockFile::generate(
            name,
            compose_refs,
            closure,
            &options.registry_url,
            chrono::Utc::now(),
            &integrities,
            &target_hash,
            Vec::new(),
        );
        merged = merged.merge(target_lock);
    }

    let lock_path = asp_paths::project_lockfile_path(&options.project_root);
    let project_lock_path = asp_paths::project_lock_path(&options.project_root);
    {
        let _guard = ProjectLock::acquire(project_lock_path)?;
        write_atomic(&lock_path, &merged)?;
    }

    let mut bundles: BTreeMap<String, Vec<ComposedTargetBundle>> = BTreeMap::new();
    for (name, (closure, _)) in &closures {
        let spec = &manifest.targets[name];
        let mut target_bundles = Vec::new();
        for harness_id in registry.ids() {
            let Some(adapter) = registry.get(harness_id) else {
                continue;
            };
            let mut artifact_paths = Vec::with_capacity(closure.load_order.len());
            for key in &closure.load_order {
                let space = &closure.spaces[key];
                let snapshot_dir = snapshot_dir_for(home, space, &integrities).ok_or_else(|| {
                    AspError::new(ErrorCode::Internal, format!("{key}: no snapshot directory available"))
                })?;

                let validation = adapter.validate_space(space, &snapshot_dir);
                if !validation.valid || !validation.errors.is_empty() {
                    return Err(AspError::new(
                        ErrorCode::LintError,
                        format!("{key}: failed {harness_id} structural validation: {}", validation.errors.join("; ")),
                    ));
                }
                asp_lint::gate(&validation.warnings)?;
                all_warnings.extend(validation.warnings.into_iter().map(|w| w.message));

                let cache_dir = home.cache_root().join(harness_id.as_str());
                let outcome = adapter.materialize_space(
                    space,
                    &snapshot_dir,
                    &cache_dir,
                    &MaterializeOptions {
                        force: options.refresh,
                        use_hardlinks: options.use_hardlinks,
                    },
                )?;
                all_warnings.extend(outcome.warnings.into_iter().map(|w| w.message));
                artifact_paths.push(outcome.artifact_path);
            }
            let artifacts: Vec<MaterializedArtifact<'_>> = closure
                .load_order
                .iter()
                .zip(artifact_paths)
                .map(|(key, artifact_path)| MaterializedArtifact {
                    space: &closure.spaces[key],
                    artifact_path,
                })
                .collect();

            let output_dir = adapter.get_target_output_path(&asp_paths::asp_modules_dir(&options.project_root), name);
            let compose_options = ComposeOptions {
                clean: options.refresh,
                inherit_project: None,
                inherit_user: None,
                target_overrides: harness_overrides_json(&manifest, spec, harness_id),
            };
            let outcome = adapter.compose_target(name, &artifacts, &output_dir, &compose_options)?;
            all_warnings.extend(outcome.warnings.into_iter().map(|w| w.message));
            info!(target = %name, harness = %harness_id, root = %outcome.bundle.root_dir.display(), "composed target bundle");
            target_bundles.push(outcome.bundle);
        }
        bundles.insert(name.clone(), target_bundles);
    }

    Ok(InstallOutcome {
        lock: merged,
        bundles,
        warnings: all_warnings,
    })
}

/// Cheap staleness check: recompute each selected target's closure and
/// environment hash and compare against the stored lock, without
/// populating the store or materializing anything. Returns `true` if an
/// [`install`] call would change the lock file or composed bundles.
pub fn install_needed(repo: &GitRepo, options: &InstallOptions) -> Result<bool> {
    let manifest = target_manifest::read_from_filesystem(&options.project_root)?;
    let target_names = select_targets(&manifest, options)?;

    let Some(lock) = read_existing_lock(&options.project_root) else {
        return Ok(true);
    };
    let pinned_spaces = compute_pinned_spaces(options, Some(&lock));

    for name in &target_names {
        let Some(locked_target) = lock.targets.get(name) else {
            return Ok(true);
        };
        let spec = &manifest.targets[name];
        let closure = resolve_target_closure(repo, &options.project_root, &pinned_spaces, spec)?;

        let mut integrities = BTreeMap::new();
        for space in closure.spaces.values() {
            let integrity = if space.commit.is_mutable() {
                Sha256Integrity::Dev
            } else if let Some(locked) = lock.spaces.get(&space.key) {
                locked.integrity.clone()
            } else {
                hash_space(repo, &space.commit.to_string(), space.id.as_str())?
            };
            integrities.insert(space.key.clone(), integrity);
        }

        let fresh_hash = target_env_hash(&closure, &integrities);
        if fresh_hash.to_string() != locked_target.env_hash {
            return Ok(true);
        }
        if closure.load_order != locked_target.load_order || closure.roots != locked_target.roots {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Resolve one target's closure, populate the store for it, gate on lint
/// errors and write a merged lock entry, without composing any harness
/// bundle. Used for inspection or packaging flows that don't need a
/// materialized bundle on disk.
pub fn build(home: &AspHome, repo: &GitRepo, target_name: &str, options: &InstallOptions) -> Result<LockFile> {
    home.ensure_scaffold().map_err(|e| fs_err(home.root(), e))?;
    if let Err(e) = repo.fetch_all() {
        warn!(error = %e, "best-effort registry fetch failed, continuing with local refs");
    }

    let manifest = target_manifest::read_from_filesystem(&options.project_root)?;
    let spec = manifest
        .targets
        .get(target_name)
        .ok_or_else(|| AspError::new(ErrorCode::ManifestInvalid, format!("unknown target '{target_name}'")))?;

    let existing_lock = read_existing_lock(&options.project_root);
    let pinned_spaces = compute_pinned_spaces(options, existing_lock.as_ref());
    let closure = resolve_target_closure(repo, &options.project_root, &pinned_spaces, spec)?;

    let integrities = populate_store(home, repo, std::iter::once(&closure))?;

    let mut warnings = asp_lint::plugin_name_collisions(&closure);
    for space in closure.spaces.values() {
        if let Some(snapshot_dir) = snapshot_dir_for(home, space, &integrities) {
            warnings.extend(asp_lint::skill_frontmatter_warnings(&snapshot_dir));
        }
    }
    asp_lint::gate(&warnings)?;

    let target_hash = target_env_hash(&closure, &integrities);
    let target_lock = LockFile::generate(
        target_name,
        &spec.compose,
        &closure,
        &options.registry_url,
        chrono::Utc::now(),
        &integrities,
        &target_hash,
        warnings.into_iter().map(|w| w.message).collect(),
    );
    let merged = existing_lock.unwrap_or_else(|| empty_lock(&options.registry_url)).merge(target_lock);

    let lock_path = asp_paths::project_lockfile_path(&options.project_root);
    let project_lock_path = asp_paths::project_lock_path(&options.project_root);
    let _guard = ProjectLock::acquire(project_lock_path)?;
    write_atomic(&lock_path, &merged)?;
    Ok(merged)
}

fn select_targets(manifest: &TargetManifest, options: &InstallOptions) -> Result<Vec<String>> {
    let names = manifest.select_target_names(options.targets.as_deref());
    for name in &names {
        if !manifest.targets.contains_key(name) {
            return Err(AspError::new(ErrorCode::ManifestInvalid, format!("unknown target '{name}'")));
        }
    }
    Ok(names)
}

fn resolve_target_closure(
    repo: &GitRepo,
    project_root: &Path,
    pinned_spaces: &BTreeMap<SpaceId, CommitSha>,
    spec: &TargetSpec,
) -> Result<Closure> {
    let roots: Vec<SpaceRef> = spec
        .compose
        .iter()
        .map(|s| SpaceRef::parse(s))
        .collect::<std::result::Result<_, _>>()?;
    let closure_options = ClosureOptions {
        repo,
        pinned_spaces,
        project_root: Some(project_root),
    };
    asp_closure::compute(&roots, &closure_options)
}

/// Pin every locked space to its recorded commit, except those the caller
/// is selectively upgrading. A plain (non-`update`) install pins
/// everything, reproducing the lock exactly; `update` with an empty
/// `upgrade_space_ids` re-resolves the whole closure from scratch.
fn compute_pinned_spaces(options: &InstallOptions, existing: Option<&LockFile>) -> BTreeMap<SpaceId, CommitSha> {
    let mut pinned = BTreeMap::new();
    let Some(lock) = existing else {
        return pinned;
    };
    if options.update && options.upgrade_space_ids.is_empty() {
        return pinned;
    }
    for locked in lock.spaces.values() {
        if options.update && options.upgrade_space_ids.iter().any(|id| id == &locked.id) {
            continue;
        }
        let (Ok(id), Ok(commit)) = (SpaceId::parse(locked.id.clone()), CommitSha::parse(&locked.commit)) else {
            continue;
        };
        if commit.is_mutable() {
            continue;
        }
        pinned.insert(id, commit);
    }
    pinned
}

fn populate_store<'a>(home: &AspHome, repo: &GitRepo, closures: impl Iterator<Item = &'a Closure>) -> Result<BTreeMap<SpaceKey, Sha256Integrity>> {
    let mut integrities = BTreeMap::new();
    for closure in closures {
        for (key, space) in &closure.spaces {
            if integrities.contains_key(key) {
                continue;
            }
            let integrity = if space.commit.is_mutable() {
                Sha256Integrity::Dev
            } else {
                asp_store::create_snapshot(home, repo, space.id.as_str(), &space.commit.to_string())?
            };
            integrities.insert(key.clone(), integrity);
        }
    }
    Ok(integrities)
}

fn snapshot_dir_for(home: &AspHome, space: &ResolvedSpace, integrities: &BTreeMap<SpaceKey, Sha256Integrity>) -> Option<PathBuf> {
    if space.commit.is_mutable() {
        return space.path.clone();
    }
    let integrity = integrities.get(&space.key)?;
    Some(home.store_entry(strip_sha256(integrity)))
}

fn strip_sha256(integrity: &Sha256Integrity) -> String {
    let rendered = integrity.to_string();
    rendered.strip_prefix("sha256:").unwrap_or(&rendered).to_string()
}

fn target_env_hash(closure: &Closure, integrities: &BTreeMap<SpaceKey, Sha256Integrity>) -> asp_integrity::EnvHash {
    let entries: Vec<EnvEntry<'_>> = closure
        .load_order
        .iter()
        .map(|key| {
            let space = &closure.spaces[key];
            EnvEntry {
                key,
                integrity: &integrities[key],
                plugin_name: space.manifest.plugin.name.as_deref().unwrap_or(space.id.as_str()),
            }
        })
        .collect();
    env_hash(&entries)
}

/// Merge the manifest's default per-harness table under the target's own
/// override table, then render as JSON for [`ComposeOptions::target_overrides`].
fn harness_overrides_json(manifest: &TargetManifest, spec: &TargetSpec, harness_id: HarnessId) -> serde_json::Value {
    let (mut merged, overrides) = match harness_id {
        HarnessId::ClaudeCli | HarnessId::ClaudeSdk => (manifest.claude.clone(), &spec.claude),
        HarnessId::CodexCli => (manifest.codex.clone(), &spec.codex),
        HarnessId::PiCli => (manifest.pi.clone(), &spec.pi),
        HarnessId::PiSdk => (manifest.sdk.clone(), &spec.sdk),
    };
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    serde_json::to_value(&merged).unwrap_or(serde_json::Value::Null)
}

fn read_existing_lock(project_root: &Path) -> Option<LockFile> {
    let path = asp_paths::project_lockfile_path(project_root);
    let text = std::fs::read_to_string(path).ok()?;
    LockFile::from_json(&text).ok()
}

fn empty_lock(registry_url: &str) -> LockFile {
    LockFile {
        lockfile_version: LOCKFILE_VERSION,
        resolver_version: RESOLVER_VERSION,
        generated_at: chrono::Utc::now(),
        registry: RegistryInfo {
            kind: "git".to_string(),
            url: registry_url.to_string(),
        },
        spaces: BTreeMap::new(),
        targets: BTreeMap::new(),
    }
}

fn fs_err(path: &Path, e: std::io::Error) -> AspError {
    AspError::new(ErrorCode::FilesystemError, format!("{}: {e}", path.display()))
}
