#![doc = include_str!("../README.md")]
//! asp-paths
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::env;
use std::path::{Path, PathBuf};

/// Resolved `ASP_HOME` and the deterministic paths derived from it.
///
/// All path functions are pure: constructing an [`AspHome`] never touches
/// the filesystem. Call [`AspHome::ensure_scaffold`] to create the
/// directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspHome {
    root: PathBuf,
}

impl AspHome {
    /// Build an `AspHome` rooted at an explicit path (used by callers that
    /// want to overlay `ASP_HOME` for the duration of one operation, per
    /// spec §4.14 step 4 and §5's environment-mutation policy).
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `ASP_HOME` from the environment, defaulting to `$HOME/.asp`.
    ///
    /// # Panics
    ///
    /// Panics if neither `ASP_HOME` nor `HOME` is set; callers that need a
    /// fallible variant should read the environment themselves and use
    /// [`AspHome::at`].
    #[must_use]
    pub fn from_env() -> Self {
        if let Some(v) = env::var_os("ASP_HOME") {
            return Self::at(v);
        }
        let home = env::var_os("HOME").expect("HOME or ASP_HOME must be set");
        Self::at(PathBuf::from(home).join(".asp"))
    }

    /// Root directory of this `ASP_HOME`.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The registry clone directory.
    #[must_use]
    pub fn repo(&self) -> PathBuf {
        self.root.join("repo")
    }

    /// Root of the content-addressed snapshot store.
    #[must_use]
    pub fn store_root(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Snapshot directory for a given `sha256:<hex>` integrity string.
    ///
    /// Accepts either the full `sha256:<hex>` form or a bare hex digest;
    /// the `sha256:` prefix (if present) is stripped since it is redundant
    /// once inside `store/`.
    #[must_use]
    pub fn store_entry(&self, integrity: &str) -> PathBuf {
        self.store_root().join(strip_sha_prefix(integrity))
    }

    /// Root of the plugin cache.
    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Plugin cache directory keyed by `(integrity, name, version)`, per
    /// spec §4.11 item 3 and §5's immutable-once-present policy.
    #[must_use]
    pub fn cache_entry(&self, integrity: &str, name: &str, version: &str) -> PathBuf {
        let key = plugin_cache_key(integrity, name, version);
        self.cache_root().join(key)
    }

    /// Scratch temp directory root.
    #[must_use]
    pub fn tmp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Path to the global (cross-project) lock file.
    #[must_use]
    pub fn global_lock(&self) -> PathBuf {
        self.root.join("global-lock.json")
    }

    /// Root under which per-harness, per-session directories live (used by
    /// the session driver's continuation keys, spec §4.14 step 2).
    #[must_use]
    pub fn sessions_root(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Session directory for a given harness id and continuation key.
    #[must_use]
    pub fn session_dir(&self, harness_id: &str, key: &str) -> PathBuf {
        self.sessions_root().join(harness_id).join(key)
    }

    /// Create the top-level scaffold directories if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_scaffold(&self) -> std::io::Result<()> {
        for dir in [
            self.root.clone(),
            self.repo(),
            self.store_root(),
            self.cache_root(),
            self.tmp(),
            self.sessions_root(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// The deterministic on-disk key for a plugin cache entry.
///
/// Exposed standalone (not just via [`AspHome::cache_entry`]) because
/// harness adapters need the same key to detect cache hits without going
/// through an `AspHome`.
#[must_use]
pub fn plugin_cache_key(integrity: &str, name: &str, version: &str) -> String {
    format!("{}__{name}__{version}", strip_sha_prefix(integrity))
}

/// Deterministic output directory for a composed target bundle, per spec §6:
/// `<project>/asp_modules/<target>/<harnessId>/...`.
#[must_use]
pub fn target_output_path(asp_modules_dir: &Path, target_name: &str, harness_id: &str) -> PathBuf {
    asp_modules_dir.join(target_name).join(harness_id)
}

/// The `asp_modules/` directory for a project root.
#[must_use]
pub fn asp_modules_dir(project_root: &Path) -> PathBuf {
    project_root.join("asp_modules")
}

/// Path to the per-project advisory lock marker file, per spec §4.8/§9.
#[must_use]
pub fn project_lock_path(project_root: &Path) -> PathBuf {
    project_root.join(".asp-lock.lock")
}

/// Path to the project's `asp-lock.json`.
#[must_use]
pub fn project_lockfile_path(project_root: &Path) -> PathBuf {
    project_root.join("asp-lock.json")
}

/// Path to the project's `asp-targets.toml`.
#[must_use]
pub fn project_manifest_path(project_root: &Path) -> PathBuf {
    project_root.join("asp-targets.toml")
}

fn strip_sha_prefix(integrity: &str) -> &str {
    integrity.strip_prefix("sha256:").unwrap_or(integrity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_are_pure_and_deterministic() {
        let home = AspHome::at("/tmp/fixture-asp-home");
        assert_eq!(home.repo(), Path::new("/tmp/fixture-asp-home/repo"));
        assert_eq!(
            home.store_root(),
            Path::new("/tmp/fixture-asp-home/store")
        );
        assert_eq!(home.cache_root(), Path::new("/tmp/fixture-asp-home/cache"));
        assert_eq!(home.tmp(), Path::new("/tmp/fixture-asp-home/tmp"));
        assert_eq!(
            home.global_lock(),
            Path::new("/tmp/fixture-asp-home/global-lock.json")
        );
    }

    #[test]
    fn store_entry_strips_sha256_prefix() {
        let home = AspHome::at("/tmp/h");
        let a = home.store_entry("sha256:abcdef");
        let b = home.store_entry("abcdef");
        assert_eq!(a, b);
        assert_eq!(a, Path::new("/tmp/h/store/abcdef"));
    }

    #[test]
    fn plugin_cache_key_is_deterministic() {
        let k1 = plugin_cache_key("sha256:abc", "base", "1.0.0");
        let k2 = plugin_cache_key("sha256:abc", "base", "1.0.0");
        assert_eq!(k1, k2);
        assert_eq!(k1, "abc__base__1.0.0");
    }

    #[test]
    fn plugin_cache_key_varies_with_integrity() {
        let k1 = plugin_cache_key("sha256:abc", "base", "1.0.0");
        let k2 = plugin_cache_key("sha256:def", "base", "1.0.0");
        assert_ne!(k1, k2);
    }

    #[test]
    fn ensure_scaffold_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let home = AspHome::at(tmp.path().join("asp"));
        home.ensure_scaffold().unwrap();
        assert!(home.repo().is_dir());
        assert!(home.store_root().is_dir());
        assert!(home.cache_root().is_dir());
        assert!(home.tmp().is_dir());
        assert!(home.sessions_root().is_dir());
    }

    #[test]
    fn target_output_path_matches_spec_layout() {
        let project = Path::new("/work/myproj");
        let out = target_output_path(&asp_modules_dir(project), "default", "claude");
        assert_eq!(out, Path::new("/work/myproj/asp_modules/default/claude"));
    }
}
