#![doc = include_str!("../README.md")]
//! asp-git
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_error::{AspError, ErrorCode};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Errors produced by the git access layer itself, per spec §4.1.
///
/// These are intentionally more granular than [`asp_error::ErrorCode`]:
/// callers such as the selector resolver (C4) need to distinguish "ref not
/// found" from "git itself failed" so they can re-code the failure as
/// `dist_tag_not_found`, `version_not_found`, etc. [`GitAccessError::into_asp_error`]
/// gives a reasonable default mapping for callers that don't need to
/// discriminate further.
#[derive(Debug)]
pub enum GitAccessError {
    /// `git fetch` (or an equivalent network operation) failed.
    RegistryUnavailable(String),
    /// The requested ref, path, or commit does not exist.
    NotFound(String),
    /// Any other non-zero exit from git.
    GitError(String),
}

impl fmt::Display for GitAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistryUnavailable(m) => write!(f, "registry unavailable: {m}"),
            Self::NotFound(m) => write!(f, "not found: {m}"),
            Self::GitError(m) => write!(f, "git error: {m}"),
        }
    }
}

impl std::error::Error for GitAccessError {}

impl GitAccessError {
    /// Default conversion into the workspace-wide [`AspError`] taxonomy.
    #[must_use]
    pub fn into_asp_error(self) -> AspError {
        match self {
            Self::RegistryUnavailable(m) => AspError::new(ErrorCode::RegistryUnavailable, m),
            Self::NotFound(m) => AspError::new(ErrorCode::GitError, m),
            Self::GitError(m) => AspError::new(ErrorCode::GitError, m),
        }
    }
}

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, GitAccessError>;

/// Kind of a tree entry as reported by `git ls-tree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    Blob,
    /// A subdirectory.
    Tree,
    /// A symbolic link.
    Symlink,
}

/// One entry in a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path relative to the listed subtree root.
    pub path: String,
    /// Blob, tree, or symlink.
    pub kind: EntryKind,
    /// Git object id.
    pub oid: String,
    /// Octal file mode as reported by git (e.g. `"100644"`).
    pub mode: String,
}

/// A single `name -> commit` pair from `for-each-ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    /// Full ref name, e.g. `refs/tags/space/base/v1.0.0`.
    pub name: String,
    /// The commit SHA the ref points at.
    pub commit: String,
}

/// Handle to a git repository used as the Agent Spaces registry clone.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Wrap an existing clone at `path`. No I/O happens here.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The repository's working/clone directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a file at `<rev>:<path>`. Returns `Ok(None)` if the path does
    /// not exist at that revision (distinguishing "missing file" from a
    /// hard git failure).
    pub fn show(&self, rev: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let spec = format!("{rev}:{path}");
        match self.run_bytes(&["show", &spec]) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(GitAccessError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Recursively list a subtree at `<rev>:<path>`.
    ///
    /// Returns `NotFound` if the path does not exist at that revision.
    pub fn ls_tree_recursive(&self, rev: &str, path: &str) -> Result<Vec<TreeEntry>> {
        let spec = format!("{rev}:{path}");
        let out = self.run_text(&["ls-tree", "-r", "-z", "--full-tree", &spec])?;
        if out.trim().is_empty() {
            // `ls-tree` on a valid-but-empty tree succeeds with empty
            // output; we can't distinguish that from "path missing" via
            // exit code alone, so verify existence separately.
            if !self.path_exists_at(rev, path)? {
                return Err(GitAccessError::NotFound(format!("{rev}:{path}")));
            }
            return Ok(Vec::new());
        }
        Ok(parse_ls_tree_z(&out))
    }

    fn path_exists_at(&self, rev: &str, path: &str) -> Result<bool> {
        if path.is_empty() || path == "." {
            return Ok(true);
        }
        let spec = format!("{rev}:{path}");
        match self.run_text(&["cat-file", "-e", &spec]) {
            Ok(_) => Ok(true),
            Err(GitAccessError::NotFound(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Enumerate refs matching `pattern` (e.g. `refs/tags/space/<id>/v*`).
    pub fn for_each_ref(&self, pattern: &str) -> Result<Vec<RefEntry>> {
        let out = self.run_text(&[
            "for-each-ref",
            "--format=%(refname)%00%(objectname)",
            pattern,
        ])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, '\0');
            let (Some(name), Some(commit)) = (parts.next(), parts.next()) else {
                continue;
            };
            entries.push(RefEntry {
                name: name.to_string(),
                commit: commit.to_string(),
            });
        }
        Ok(entries)
    }

    /// Resolve any rev-spec (tag, branch, sha prefix) to a full commit SHA.
    pub fn resolve_ref(&self, rev: &str) -> Result<String> {
        let out = self.run_text(&["rev-parse", "--verify", &format!("{rev}^{{commit}}")])?;
        Ok(out.trim().to_string())
    }

    /// `git fetch origin --all`. Best-effort: callers decide whether a
    /// failure here is fatal (per spec §7, install-time fetch failures are
    /// downgraded to warnings).
    pub fn fetch_all(&self) -> Result<()> {
        self.run_text(&["fetch", "origin", "--all", "--tags"])?;
        Ok(())
    }

    fn run_text(&self, args: &[&str]) -> Result<String> {
        let bytes = self.run_bytes(args)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn run_bytes(&self, args: &[&str]) -> Result<Vec<u8>> {
        debug!(?args, path = %self.path.display(), "git invocation");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .map_err(|e| GitAccessError::GitError(format!("spawn git {args:?}: {e}")))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if args.first() == Some(&"fetch") {
            return Err(GitAccessError::RegistryUnavailable(if stderr.is_empty() {
                format!("git fetch: unknown failure (exit={:?})", output.status.code())
            } else {
                stderr
            }));
        }

        if looks_like_missing(&stderr) {
            return Err(GitAccessError::NotFound(if stderr.is_empty() {
                format!("{args:?}")
            } else {
                stderr
            }));
        }

        if stderr.is_empty() {
            return Err(GitAccessError::GitError(format!(
                "{}: unknown failure",
                args.first().copied().unwrap_or("git")
            )));
        }
        Err(GitAccessError::GitError(stderr))
    }
}

fn looks_like_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not a valid object name")
        || lower.contains("does not exist")
        || lower.contains("unknown revision")
        || lower.contains("bad revision")
        || lower.contains("fatal: invalid object name")
        || lower.contains("path '")
        || lower.contains("no such path")
}

/// Parse `git ls-tree -r -z` output into [`TreeEntry`] values, sorted by
/// path for determinism (spec §4.7 requires lexicographic ordering before
/// hashing; sorting here means callers get a stable order up front).
fn parse_ls_tree_z(raw: &str) -> Vec<TreeEntry> {
    let mut entries: Vec<TreeEntry> = raw
        .split('\0')
        .filter(|line| !line.is_empty())
        .filter_map(parse_ls_tree_line)
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

fn parse_ls_tree_line(line: &str) -> Option<TreeEntry> {
    // format: "<mode> <type> <oid>\t<path>"
    let (meta, path) = line.split_once('\t')?;
    let mut meta_parts = meta.split(' ');
    let mode = meta_parts.next()?.to_string();
    let kind_str = meta_parts.next()?;
    let oid = meta_parts.next()?.to_string();
    let kind = match kind_str {
        "blob" => {
            if mode == "120000" {
                EntryKind::Symlink
            } else {
                EntryKind::Blob
            }
        }
        "tree" => EntryKind::Tree,
        "commit" => return None, // submodules: not relevant to Space trees
        _ => return None,
    };
    Some(TreeEntry {
        path: path.to_string(),
        kind,
        oid,
        mode,
    })
}
