#![doc = include_str!("../README.md")]
//! asp-integrity
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_error::{AspError, ErrorCode};
use asp_git::{EntryKind, GitRepo, TreeEntry};
use asp_refs::{Sha256Integrity, SpaceKey};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::fmt;

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, asp_error::AspError>;

const EXCLUDED_DIRS: &[&str] = &[".git", ".asp", "node_modules", "dist"];

/// Hash `<commit>:spaces/<id>` into a content-addressed [`Sha256Integrity`],
/// per spec §4.7. Excludes `.git/`, `.asp/`, `node_modules/`, `dist/`, and
/// anything matched by an `.aspignore` at the space root, the same filter
/// [`asp_store::create_snapshot`] applies before materializing — the two
/// must agree, since a space's integrity is the identity of its snapshot.
pub fn hash_space(repo: &GitRepo, commit: &str, id: &str) -> Result<Sha256Integrity> {
    let subtree = format!("spaces/{id}");
    let entries = repo
        .ls_tree_recursive(commit, &subtree)
        .map_err(asp_git::GitAccessError::into_asp_error)?;
    let ignore = load_ignore_globset(repo, commit, &subtree)?;
    let entries = filter_ignored(entries, ignore.as_ref());
    Ok(hash_entries(entries))
}

/// Read `<subtree>/.aspignore` at `commit`, if present, and compile its
/// non-blank, non-comment lines as exclude globs. Absence is an empty
/// ignore set, not an error.
pub fn load_ignore_globset(repo: &GitRepo, commit: &str, subtree: &str) -> Result<Option<GlobSet>> {
    let path = format!("{subtree}/.aspignore");
    let Some(bytes) = repo.show(commit, &path).map_err(asp_git::GitAccessError::into_asp_error)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    let mut builder = GlobSetBuilder::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let glob = Glob::new(line).map_err(|e| AspError::new(ErrorCode::ManifestInvalid, format!("invalid .aspignore pattern '{line}': {e}")))?;
        builder.add(glob);
    }
    let set = builder.build().map_err(|e| AspError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
    Ok(Some(set))
}

/// Drop entries matched by `ignore`, or return `entries` unchanged when
/// there is no `.aspignore`.
#[must_use]
pub fn filter_ignored(entries: Vec<TreeEntry>, ignore: Option<&GlobSet>) -> Vec<TreeEntry> {
    let Some(set) = ignore else {
        return entries;
    };
    entries.into_iter().filter(|entry| !set.is_match(&entry.path)).collect()
}

/// Hash an already-fetched entry list directly (used by tests and by
/// callers that already have a listing, e.g. from a cached store walk).
#[must_use]
pub fn hash_entries(mut entries: Vec<TreeEntry>) -> Sha256Integrity {
    entries.retain(|entry| !is_excluded(&entry.path));
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    hasher.update(b"v1\0");
    for entry in &entries {
        hasher.update(entry.path.as_bytes());
        hasher.update(b"\0");
        hasher.update(kind_label(entry.kind).as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.oid.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.mode.as_bytes());
        hasher.update(b"\n");
    }
    Sha256Integrity::from_hex(format!("{:x}", hasher.finalize()))
}

fn is_excluded(path: &str) -> bool {
    path.split('/').any(|segment| EXCLUDED_DIRS.contains(&segment))
}

fn kind_label(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Blob => "blob",
        EntryKind::Tree => "tree",
        EntryKind::Symlink => "symlink",
    }
}

/// A stable per-target identity derived from a resolved load order, per
/// spec §4.7. Always rendered as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvHash(String);

impl fmt::Display for EnvHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// One entry contributing to an environment hash: a space's key, resolved
/// integrity, and plugin name.
pub struct EnvEntry<'a> {
    /// The space's key in the load order.
    pub key: &'a SpaceKey,
    /// The space's resolved content integrity.
    pub integrity: &'a Sha256Integrity,
    /// The space's effective plugin name.
    pub plugin_name: &'a str,
}

/// `sha256("env-v1\0" + for each entry: spaceKey\0integrity\0pluginName\n)`.
#[must_use]
pub fn env_hash(load_order: &[EnvEntry<'_>]) -> EnvHash {
    let mut hasher = Sha256::new();
    hasher.update(b"env-v1\0");
    feed_env_entries(&mut hasher, load_order);
    EnvHash(format!("{:x}", hasher.finalize()))
}

/// `sha256("env-harness-v1\0<harnessId>\0" + ...)`.
#[must_use]
pub fn env_hash_for_harness(harness_id: &str, load_order: &[EnvEntry<'_>]) -> EnvHash {
    let mut hasher = Sha256::new();
    hasher.update(b"env-harness-v1\0");
    hasher.update(harness_id.as_bytes());
    hasher.update(b"\0");
    feed_env_entries(&mut hasher, load_order);
    EnvHash(format!("{:x}", hasher.finalize()))
}

fn feed_env_entries(hasher: &mut Sha256, load_order: &[EnvEntry<'_>]) {
    for entry in load_order {
        hasher.update(entry.key.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.integrity.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.plugin_name.as_bytes());
        hasher.update(b"\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asp_refs::SpaceId;
    use std::path::Path;
    use std::process::Command;
    use tempfile::TempDir;

    fn entry(path: &str, kind: EntryKind, oid: &str, mode: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            kind,
            oid: oid.to_string(),
            mode: mode.to_string(),
        }
    }

    fn run(dir: &Path, args: &[&str]) {
        let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[test]
    fn hash_is_deterministic_regardless_of_input_order() {
        let a = vec![
            entry("b.txt", EntryKind::Blob, "oid-b", "100644"),
            entry("a.txt", EntryKind::Blob, "oid-a", "100644"),
        ];
        let b = vec![
            entry("a.txt", EntryKind::Blob, "oid-a", "100644"),
            entry("b.txt", EntryKind::Blob, "oid-b", "100644"),
        ];
        assert_eq!(hash_entries(a), hash_entries(b));
    }

    #[test]
    fn excludes_dot_git_and_dist() {
        let with_dist = vec![
            entry("a.txt", EntryKind::Blob, "oid-a", "100644"),
            entry("dist/bundle.js", EntryKind::Blob, "oid-z", "100644"),
        ];
        let without_dist = vec![entry("a.txt", EntryKind::Blob, "oid-a", "100644")];
        assert_eq!(hash_entries(with_dist), hash_entries(without_dist));
    }

    #[test]
    fn different_content_hashes_differently() {
        let a = vec![entry("a.txt", EntryKind::Blob, "oid-a", "100644")];
        let b = vec![entry("a.txt", EntryKind::Blob, "oid-different", "100644")];
        assert_ne!(hash_entries(a), hash_entries(b));
    }

    #[test]
    fn integrity_renders_with_prefix() {
        let h = hash_entries(vec![entry("a.txt", EntryKind::Blob, "oid-a", "100644")]);
        assert!(h.to_string().starts_with("sha256:"));
        assert_eq!(h.to_string().len(), "sha256:".len() + 64);
    }

    #[test]
    fn env_hash_changes_with_plugin_name() {
        let id = SpaceId::parse("base").unwrap();
        let commit = asp_refs::CommitSha::parse("abcdef1234567890abcdef1234567890abcdef12").unwrap();
        let key = SpaceKey::new(&id, &commit);
        let integrity = Sha256Integrity::from_hex("a".repeat(64));

        let h1 = env_hash(&[EnvEntry { key: &key, integrity: &integrity, plugin_name: "one" }]);
        let h2 = env_hash(&[EnvEntry { key: &key, integrity: &integrity, plugin_name: "two" }]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn env_hash_for_harness_differs_from_plain() {
        let id = SpaceId::parse("base").unwrap();
        let commit = asp_refs::CommitSha::parse("abcdef1234567890abcdef1234567890abcdef12").unwrap();
        let key = SpaceKey::new(&id, &commit);
        let integrity = Sha256Integrity::from_hex("a".repeat(64));
        let entries = [EnvEntry { key: &key, integrity: &integrity, plugin_name: "one" }];

        let plain = env_hash(&entries);
        let claude = env_hash_for_harness("claude", &entries);
        let codex = env_hash_for_harness("codex", &entries);
        assert_ne!(plain, claude);
        assert_ne!(claude, codex);
    }

    #[test]
    fn hash_space_excludes_aspignored_files() {
        let dir = TempDir::new().unwrap();
        run(dir.path(), &["init", "-q"]);
        run(dir.path(), &["config", "user.email", "test@example.com"]);
        run(dir.path(), &["config", "user.name", "test"]);

        let space_dir = dir.path().join("spaces/base");
        std::fs::create_dir_all(&space_dir).unwrap();
        std::fs::write(space_dir.join("space.toml"), "id = \"base\"\n").unwrap();
        std::fs::write(space_dir.join("notes.local.md"), "scratch\n").unwrap();
        std::fs::write(space_dir.join(".aspignore"), "*.local.md\n").unwrap();
        run(dir.path(), &["add", "."]);
        run(dir.path(), &["commit", "-q", "-m", "init"]);
        let commit = String::from_utf8(
            Command::new("git").args(["rev-parse", "HEAD"]).current_dir(dir.path()).output().unwrap().stdout,
        )
        .unwrap()
        .trim()
        .to_string();
        let repo = GitRepo::at(dir.path());

        let with_ignore = hash_space(&repo, &commit, "base").unwrap();

        // Same tracked content, minus the ignored file and the `.aspignore`
        // file itself, hashed with the ignore set disabled: matches only
        // when the ignored file was excluded both times.
        let entries = repo.ls_tree_recursive(&commit, "spaces/base").unwrap();
        let without_ignored_files: Vec<TreeEntry> = entries
            .into_iter()
            .filter(|e| e.path != "notes.local.md" && e.path != ".aspignore")
            .collect();
        let expected = hash_entries(without_ignored_files);

        assert_eq!(with_ignore, expected);
    }

    #[test]
    fn hash_space_matches_store_filtering_for_unignored_content() {
        let dir = TempDir::new().unwrap();
        run(dir.path(), &["init", "-q"]);
        run(dir.path(), &["config", "user.email", "test@example.com"]);
        run(dir.path(), &["config", "user.name", "test"]);

        let space_dir = dir.path().join("spaces/base");
        std::fs::create_dir_all(&space_dir).unwrap();
        std::fs::write(space_dir.join("space.toml"), "id = \"base\"\n").unwrap();
        run(dir.path(), &["add", "."]);
        run(dir.path(), &["commit", "-q", "-m", "init"]);
        let commit = String::from_utf8(
            Command::new("git").args(["rev-parse", "HEAD"]).current_dir(dir.path()).output().unwrap().stdout,
        )
        .unwrap()
        .trim()
        .to_string();
        let repo = GitRepo::at(dir.path());

        let via_hash_space = hash_space(&repo, &commit, "base").unwrap();
        let entries = repo.ls_tree_recursive(&commit, "spaces/base").unwrap();
        let ignore = load_ignore_globset(&repo, &commit, "spaces/base").unwrap();
        assert!(ignore.is_none());
        let via_manual_filter = hash_entries(filter_ignored(entries, ignore.as_ref()));

        assert_eq!(via_hash_space, via_manual_filter);
    }
}
