#![doc = include_str!("../README.md")]
//! asp-store
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_error::{AspError, ErrorCode};
use asp_git::{EntryKind, GitRepo};
use asp_integrity::{filter_ignored, hash_entries, load_ignore_globset};
use asp_paths::AspHome;
use asp_refs::Sha256Integrity;
use std::path::Path;
use tracing::{debug, info};

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// Returns the store entry directory for `integrity` if it has already
/// been materialized.
#[must_use]
pub fn snapshot_exists(home: &AspHome, integrity: &Sha256Integrity) -> bool {
    home.store_entry(&strip_prefix(integrity)).is_dir()
}

/// Create a content-addressed snapshot of `<commit>:spaces/<id>` under
/// `home.store_root()`, if one does not already exist.
///
/// Idempotent: concurrent callers may both build into their own temp
/// sibling and race on the final rename; the loser's temp directory is
/// discarded and both observe the same final content.
pub fn create_snapshot(home: &AspHome, repo: &GitRepo, id: &str, commit: &str) -> Result<Sha256Integrity> {
    let subtree = format!("spaces/{id}");
    let entries = repo
        .ls_tree_recursive(commit, &subtree)
        .map_err(asp_git::GitAccessError::into_asp_error)?;

    let ignore = load_ignore_globset(repo, commit, &subtree)?;
    let entries = filter_ignored(entries, ignore.as_ref());

    let integrity = hash_entries(entries.clone());
    let dest = home.store_entry(&strip_prefix(&integrity));
    if dest.is_dir() {
        debug!(path = %dest.display(), "snapshot already present");
        return Ok(integrity);
    }

    let tmp_dir = home.tmp().join(format!("snapshot-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&tmp_dir).map_err(|e| fs_err(&tmp_dir, e))?;

    for entry in &entries {
        if entry.kind == EntryKind::Tree {
            continue;
        }
        let rel = Path::new(&entry.path);
        let out_path = tmp_dir.join(rel);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| fs_err(parent, e))?;
        }
        let blob_path = format!("{subtree}/{}", entry.path);
        let bytes = repo
            .show(commit, &blob_path)
            .map_err(asp_git::GitAccessError::into_asp_error)?
            .ok_or_else(|| {
                AspError::new(
                    ErrorCode::GitError,
                    format!("{commit}:{blob_path} listed by ls-tree but missing from show"),
                )
            })?;

        write_entry(&out_path, entry.kind, &bytes)?;
    }

    match std::fs::rename(&tmp_dir, &dest) {
        Ok(()) => {
            info!(id, commit, path = %dest.display(), "materialized snapshot");
            Ok(integrity)
        }
        Err(_) if dest.is_dir() => {
            // Another process won the race; our content is equivalent
            // because the destination is keyed by the same integrity hash.
            let _ = std::fs::remove_dir_all(&tmp_dir);
            Ok(integrity)
        }
        Err(e) => Err(fs_err(&dest, e)),
    }
}

#[cfg(unix)]
fn write_entry(path: &Path, kind: EntryKind, bytes: &[u8]) -> Result<()> {
    if kind == EntryKind::Symlink {
        let target = String::from_utf8_lossy(bytes).into_owned();
        std::os::unix::fs::symlink(target, path).map_err(|e| fs_err(path, e))
    } else {
        std::fs::write(path, bytes).map_err(|e| fs_err(path, e))
    }
}

#[cfg(not(unix))]
fn write_entry(path: &Path, _kind: EntryKind, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| fs_err(path, e))
}

fn strip_prefix(integrity: &Sha256Integrity) -> String {
    let rendered = integrity.to_string();
    rendered
        .strip_prefix("sha256:")
        .unwrap_or(&rendered)
        .to_string()
}

fn fs_err(path: &Path, e: std::io::Error) -> AspError {
    AspError::new(ErrorCode::FilesystemError, format!("{}: {e}", path.display()))
}
