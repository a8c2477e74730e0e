#![doc = include_str!("../README.md")]
//! asp-lock
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_closure::Closure;
use asp_error::{AspError, ErrorCode};
use asp_integrity::EnvHash;
use asp_refs::{Sha256Integrity, SpaceKey};
use asp_resolve::ResolvedSelector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

const LOCKFILE_VERSION: u32 = 1;
const RESOLVER_VERSION: u32 = 1;

/// `registry = { type: "git", url }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    /// Always `"git"` today; kept as a string for forward compatibility.
    #[serde(rename = "type")]
    pub kind: String,
    /// Registry clone URL.
    pub url: String,
}

/// `plugin { name, version? }`, a trimmed-down [`asp_manifest::PluginMeta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPlugin {
    /// Effective plugin name.
    pub name: String,
    /// Plugin version, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// `deps.spaces` on a locked space entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedDeps {
    /// Ordered dependency keys.
    pub spaces: Vec<SpaceKey>,
}

/// One entry in the lock file's `spaces` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedSpace {
    /// The space's id.
    pub id: String,
    /// The resolved commit (or reserved marker) as a string.
    pub commit: String,
    /// Filesystem path for dev/project spaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Content integrity.
    pub integrity: Sha256Integrity,
    /// Plugin identity.
    pub plugin: LockedPlugin,
    /// Dependency keys.
    pub deps: LockedDeps,
    /// Provenance of the resolved commit.
    pub resolved_from: ResolvedSelector,
    /// True for spaces resolved via `space:project:<id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_space: Option<bool>,
}

/// One entry in the lock file's `targets` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedTarget {
    /// The target's compose list, as originally authored ref strings.
    pub compose: Vec<String>,
    /// Root keys, one per compose entry.
    pub roots: Vec<SpaceKey>,
    /// Topological load order for this target's closure.
    pub load_order: Vec<SpaceKey>,
    /// Stable per-target environment identity.
    pub env_hash: String,
    /// Non-fatal findings surfaced while resolving this target.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// The `asp-lock.json` document, per spec §3/§4.8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    /// Always 1 today.
    pub lockfile_version: u32,
    /// Always 1 today.
    pub resolver_version: u32,
    /// ISO-8601 UTC generation timestamp.
    pub generated_at: DateTime<Utc>,
    /// Registry identity this lock was computed against.
    pub registry: RegistryInfo,
    /// All resolved spaces across every target, keyed by [`SpaceKey`].
    pub spaces: BTreeMap<SpaceKey, LockedSpace>,
    /// Per-target entries.
    pub targets: BTreeMap<String, LockedTarget>,
}

impl LockFile {
    /// Build a fresh lock file containing exactly one target's closure.
    ///
    /// `integrities` and `plugin_names` must cover every key in `closure`.
    #[must_use]
    pub fn generate(
        target_name: &str,
        compose_refs: &[String],
        closure: &Closure,
        registry_url: &str,
        generated_at: DateTime<Utc>,
        integrities: &BTreeMap<SpaceKey, Sha256Integrity>,
        env_hash: &EnvHash,
        warnings: Vec<String>,
    ) -> Self {
        let mut spaces = BTreeMap::new();
        for (key, resolved) in &closure.spaces {
            let integrity = integrities
                .get(key)
                .cloned()
                .unwrap_or_else(|| Sha256Integrity::Dev);
            let plugin_name = resolved
                .manifest
                .plugin
                .name
                .clone()
                .unwrap_or_else(|| resolved.id.to_string());
            spaces.insert(
                key.clone(),
                LockedSpace {
                    id: resolved.id.to_string(),
                    commit: resolved.commit.to_string(),
                    path: resolved.path.clone(),
                    integrity,
                    plugin: LockedPlugin {
                        name: plugin_name,
                        version: resolved.manifest.plugin.version.clone(),
                    },
                    deps: LockedDeps {
                        spaces: resolved.deps.clone(),
                    },
                    resolved_from: resolved.resolved_from.clone(),
                    project_space: resolved.project_space.then_some(true),
                },
            );
        }

        let mut targets = BTreeMap::new();
        targets.insert(
            target_name.to_string(),
            LockedTarget {
                compose: compose_refs.to_vec(),
                roots: closure.roots.clone(),
                load_order: closure.load_order.clone(),
                env_hash: env_hash.to_string(),
                warnings,
            },
        );

        Self {
            lockfile_version: LOCKFILE_VERSION,
            resolver_version: RESOLVER_VERSION,
            generated_at,
            registry: RegistryInfo {
                kind: "git".to_string(),
                url: registry_url.to_string(),
            },
            spaces,
            targets,
        }
    }

    /// Union `self` and `incoming`: later values win on key collision.
    /// Since keys are content-addressed, colliding values are expected to
    /// be equivalent; the merge does not attempt to detect divergence.
    #[must_use]
    pub fn merge(mut self, incoming: LockFile) -> Self {
        self.spaces.extend(incoming.spaces);
        self.targets.extend(incoming.targets);
        self.generated_at = incoming.generated_at;
        self
    }

    /// Serialize to canonical JSON: sorted object keys (guaranteed by the
    /// `BTreeMap` fields above) and stable array ordering.
    pub fn to_canonical_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AspError::new(ErrorCode::LockInvalid, format!("serializing lock file: {e}")))
    }

    /// Parse a lock file from its canonical JSON form.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| AspError::new(ErrorCode::LockInvalid, format!("parsing lock file: {e}")))
    }

    /// Validate the cross-referential invariants from spec §3: every key
    /// referenced by a target or by a space's deps must exist in `spaces`.
    pub fn validate(&self) -> Result<()> {
        for (target_name, target) in &self.targets {
            for key in target.roots.iter().chain(target.load_order.iter()) {
                if !self.spaces.contains_key(key) {
                    return Err(AspError::new(
                        ErrorCode::LockInvalid,
                        format!("target '{target_name}' references unknown space key '{key}'"),
                    ));
                }
            }
        }
        for (key, space) in &self.spaces {
            for dep in &space.deps.spaces {
                if !self.spaces.contains_key(dep) {
                    return Err(AspError::new(
                        ErrorCode::LockInvalid,
                        format!("space '{key}' depends on unknown space key '{dep}'"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Write `lock` to `path` atomically: serialize, write to a sibling
/// `.tmp` file, fsync, then rename into place.
pub fn write_atomic(path: &Path, lock: &LockFile) -> Result<()> {
    lock.validate()?;
    let json = lock.to_canonical_json()?;
    let tmp_path = path.with_extension("json.tmp");

    let mut file = std::fs::File::create(&tmp_path).map_err(|e| fs_err(&tmp_path, e))?;
    file.write_all(json.as_bytes()).map_err(|e| fs_err(&tmp_path, e))?;
    file.sync_all().map_err(|e| fs_err(&tmp_path, e))?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| fs_err(path, e))?;
    debug!(path = %path.display(), "wrote lock file");
    Ok(())
}

fn fs_err(path: &Path, e: std::io::Error) -> AspError {
    AspError::new(ErrorCode::FilesystemError, format!("{}: {e}", path.display()))
}

/// Advisory whole-project lock at `<projectPath>/.asp-lock.lock`, per
/// spec §4.8. Held for the duration of a `write_atomic` call or a larger
/// install transaction.
pub struct ProjectLock {
    path: PathBuf,
}

const DEFAULT_RETRY_ATTEMPTS: u32 = 20;
const DEFAULT_BASE_DELAY_MS: u64 = 25;
const STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

impl ProjectLock {
    /// Acquire the lock, retrying with exponential backoff. Locks whose
    /// mtime is older than [`STALE_THRESHOLD`] and whose recorded PID is no
    /// longer running are reclaimed.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut delay = Duration::from_millis(DEFAULT_BASE_DELAY_MS);

        for attempt in 0..DEFAULT_RETRY_ATTEMPTS {
            match try_create_exclusive(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        warn!(path = %path.display(), "reclaiming stale project lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    debug!(attempt, ?delay, "project lock held, retrying");
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
                Err(e) => return Err(fs_err(&path, e)),
            }
        }

        Err(AspError::new(
            ErrorCode::FilesystemError,
            format!("timed out acquiring project lock at {}", path.display()),
        ))
    }

    /// Release the lock by removing the lock file.
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path).map_err(|e| fs_err(&self.path, e))
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn try_create_exclusive(path: &Path) -> std::result::Result<(), std::io::Error> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    let _ = write!(file, "{}", std::process::id());
    Ok(())
}

fn is_stale(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    let Ok(age) = modified.elapsed() else {
        return false;
    };
    if age < STALE_THRESHOLD {
        return false;
    }
    match std::fs::read_to_string(path).ok().and_then(|s| s.trim().parse::<u32>().ok()) {
        Some(pid) => !process_is_alive(pid),
        None => true,
    }
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_lock() -> LockFile {
        let mut spaces = BTreeMap::new();
        let key = SpaceKey::parse("base@abcdef123456").unwrap();
        spaces.insert(
            key.clone(),
            LockedSpace {
                id: "base".to_string(),
                commit: "abcdef1234567890abcdef1234567890abcdef12".to_string(),
                path: None,
                integrity: Sha256Integrity::from_hex("a".repeat(64)),
                plugin: LockedPlugin { name: "base".to_string(), version: None },
                deps: LockedDeps::default(),
                resolved_from: ResolvedSelector::SemverExact { version: "1.0.0".to_string() },
                project_space: None,
            },
        );
        let mut targets = BTreeMap::new();
        targets.insert(
            "default".to_string(),
            LockedTarget {
                compose: vec!["space:base@1.0.0".to_string()],
                roots: vec![key.clone()],
                load_order: vec![key],
                env_hash: "sha256:deadbeef".to_string(),
                warnings: Vec::new(),
            },
        );
        LockFile {
            lockfile_version: LOCKFILE_VERSION,
            resolver_version: RESOLVER_VERSION,
            generated_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().into(),
            registry: RegistryInfo { kind: "git".to_string(), url: "https://example.invalid/registry.git".to_string() },
            spaces,
            targets,
        }
    }

    #[test]
    fn roundtrips_through_canonical_json() {
        let lock = sample_lock();
        let json = lock.to_canonical_json().unwrap();
        let parsed = LockFile::from_json(&json).unwrap();
        assert_eq!(lock, parsed);
    }

    #[test]
    fn validate_accepts_well_formed_lock() {
        sample_lock().validate().unwrap();
    }

    #[test]
    fn validate_rejects_dangling_dep() {
        let mut lock = sample_lock();
        let dangling = SpaceKey::parse("missing@000000000000").unwrap();
        lock.spaces.values_mut().next().unwrap().deps.spaces.push(dangling);
        let err = lock.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::LockInvalid);
    }

    #[test]
    fn write_atomic_round_trips_identically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("asp-lock.json");
        let lock = sample_lock();
        write_atomic(&path, &lock).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(LockFile::from_json(&text).unwrap(), lock);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn merge_unions_spaces_and_targets() {
        let base = sample_lock();
        let mut incoming = sample_lock();
        let extra_key = SpaceKey::parse("extra@111111111111").unwrap();
        incoming.spaces.insert(
            extra_key.clone(),
            LockedSpace {
                id: "extra".to_string(),
                commit: "1111111111111111111111111111111111111111".to_string(),
                path: None,
                integrity: Sha256Integrity::from_hex("b".repeat(64)),
                plugin: LockedPlugin { name: "extra".to_string(), version: None },
                deps: LockedDeps::default(),
                resolved_from: ResolvedSelector::Dev,
                project_space: None,
            },
        );
        let merged = base.merge(incoming);
        assert_eq!(merged.spaces.len(), 2);
        assert!(merged.spaces.contains_key(&extra_key));
    }

    #[test]
    fn project_lock_excludes_concurrent_acquirers() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join(".asp-lock.lock");
        let first = ProjectLock::acquire(&lock_path).unwrap();
        assert!(lock_path.exists());
        first.release().unwrap();
        assert!(!lock_path.exists());
    }
}
