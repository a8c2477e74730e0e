#![doc = include_str!("../README.md")]
//! asp-closure
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_error::{AspError, ErrorCode};
use asp_git::GitRepo;
use asp_manifest::SpaceManifest;
use asp_refs::{CommitSha, SpaceId, SpaceKey, SpaceRef};
use asp_resolve::ResolvedSelector;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// A single node in a computed [`Closure`].
#[derive(Debug, Clone)]
pub struct ResolvedSpace {
    /// Unique identity within the closure.
    pub key: SpaceKey,
    /// The space's id.
    pub id: SpaceId,
    /// The resolved commit (or reserved marker).
    pub commit: CommitSha,
    /// Filesystem path, populated for dev/project spaces only.
    pub path: Option<PathBuf>,
    /// The validated manifest.
    pub manifest: SpaceManifest,
    /// Provenance of how `commit` was obtained.
    pub resolved_from: ResolvedSelector,
    /// Dependency keys in declared order.
    pub deps: Vec<SpaceKey>,
    /// True if this node came from a `space:project:<id>` ref.
    pub project_space: bool,
}

/// `{ spaces, loadOrder, roots }`, per spec §3.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    /// All resolved nodes, keyed by [`SpaceKey`].
    pub spaces: BTreeMap<SpaceKey, ResolvedSpace>,
    /// Topological order: every dependency precedes its dependents.
    pub load_order: Vec<SpaceKey>,
    /// One entry per input root ref, in input order.
    pub roots: Vec<SpaceKey>,
}

/// Inputs controlling closure computation, per spec §4.6.
pub struct ClosureOptions<'a> {
    /// The registry clone to resolve non-dev/non-project refs against.
    pub repo: &'a GitRepo,
    /// Commits to use in place of fresh resolution, for selective upgrades.
    pub pinned_spaces: &'a BTreeMap<SpaceId, CommitSha>,
    /// Project root, required when any root or transitive dep is a
    /// project/dev space.
    pub project_root: Option<&'a Path>,
}

/// Compute the closure of `roots` in input order.
pub fn compute(roots: &[SpaceRef], options: &ClosureOptions<'_>) -> Result<Closure> {
    let mut builder = Builder {
        options,
        visiting: Vec::new(),
        visited: BTreeSet::new(),
        spaces: BTreeMap::new(),
        load_order: Vec::new(),
    };
    let mut closure_roots = Vec::with_capacity(roots.len());
    for root in roots {
        debug!(root = %root, "visiting closure root");
        closure_roots.push(builder.visit(root, None)?);
    }
    Ok(Closure {
        spaces: builder.spaces,
        load_order: builder.load_order,
        roots: closure_roots,
    })
}

struct Builder<'a> {
    options: &'a ClosureOptions<'a>,
    visiting: Vec<SpaceKey>,
    visited: BTreeSet<SpaceKey>,
    spaces: BTreeMap<SpaceKey, ResolvedSpace>,
    load_order: Vec<SpaceKey>,
}

impl Builder<'_> {
    fn visit(&mut self, space_ref: &SpaceRef, parent: Option<&str>) -> Result<SpaceKey> {
        let (commit, resolved_from) = self.determine_commit(space_ref).map_err(|e| {
            wrap_dependency_failure(e, parent, &space_ref.to_ref_string())
        })?;
        let key = SpaceKey::new(&space_ref.id, &commit);

        if self.visited.contains(&key) {
            return Ok(key);
        }
        if self.visiting.contains(&key) {
            let mut path: Vec<String> = self.visiting.iter().map(SpaceKey::to_string).collect();
            path.push(key.to_string());
            return Err(AspError::new(
                ErrorCode::CyclicDependency,
                format!("cyclic dependency: {}", path.join(" -> ")),
            )
            .with_context("path", path));
        }

        self.visiting.push(key.clone());

        let manifest = self
            .read_manifest(space_ref, &commit)
            .map_err(|e| wrap_dependency_failure(e, parent, &space_ref.to_ref_string()))?;

        let mut deps = Vec::with_capacity(manifest.deps.spaces.len());
        for dep_ref_str in &manifest.deps.spaces {
            let dep_ref = SpaceRef::parse(dep_ref_str).map_err(|e| {
                AspError::new(
                    ErrorCode::MissingDependency,
                    format!("{}: invalid dependency ref '{dep_ref_str}': {e}", space_ref.id),
                )
                .with_context("parent", space_ref.to_ref_string())
                .with_context("child", dep_ref_str.clone())
            })?;
            let dep_key = self.visit(&dep_ref, Some(&space_ref.to_ref_string()))?;
            deps.push(dep_key);
        }

        let path = self.filesystem_path(space_ref);

        self.spaces.insert(
            key.clone(),
            ResolvedSpace {
                key: key.clone(),
                id: space_ref.id.clone(),
                commit,
                path,
                manifest,
                resolved_from,
                deps,
                project_space: space_ref.project_space,
            },
        );
        self.load_order.push(key.clone());

        self.visiting.pop();
        self.visited.insert(key.clone());
        Ok(key)
    }

    fn determine_commit(&self, space_ref: &SpaceRef) -> Result<(CommitSha, ResolvedSelector)> {
        if space_ref.project_space {
            return Ok((CommitSha::Project, ResolvedSelector::Project));
        }
        if matches!(space_ref.selector, asp_refs::Selector::Dev) {
            return Ok((CommitSha::Dev, ResolvedSelector::Dev));
        }
        if let Some(pinned) = self.options.pinned_spaces.get(&space_ref.id) {
            return Ok((
                pinned.clone(),
                ResolvedSelector::GitPin {
                    sha: pinned.to_string(),
                },
            ));
        }
        let resolution = asp_resolve::resolve(self.options.repo, &space_ref.id, &space_ref.selector)?;
        Ok((resolution.commit, resolution.resolved_from))
    }

    fn read_manifest(&self, space_ref: &SpaceRef, commit: &CommitSha) -> Result<SpaceManifest> {
        match commit {
            CommitSha::Dev | CommitSha::Project => {
                let root = self.options.project_root.ok_or_else(|| {
                    AspError::new(
                        ErrorCode::ManifestInvalid,
                        format!("{} is a dev/project space but no project root was supplied", space_ref.id),
                    )
                })?;
                let path_override = space_ref.path.as_ref().map(PathBuf::from);
                Ok(asp_manifest::read_from_filesystem(root, space_ref.id.as_str(), path_override.as_deref())?.manifest)
            }
            CommitSha::Sha(sha) => {
                Ok(asp_manifest::read_from_git(self.options.repo, sha, space_ref.id.as_str())?.manifest)
            }
        }
    }

    fn filesystem_path(&self, space_ref: &SpaceRef) -> Option<PathBuf> {
        if !space_ref.project_space && !matches!(space_ref.selector, asp_refs::Selector::Dev) {
            return None;
        }
        if let Some(p) = &space_ref.path {
            return Some(PathBuf::from(p));
        }
        self.options
            .project_root
            .map(|root| root.join("spaces").join(space_ref.id.as_str()))
    }
}

fn wrap_dependency_failure(err: AspError, parent: Option<&str>, child_ref: &str) -> AspError {
    if err.code == ErrorCode::CyclicDependency {
        return err;
    }
    match parent {
        Some(parent) => AspError::new(
            ErrorCode::MissingDependency,
            format!("failed to resolve dependency '{child_ref}' of '{parent}': {}", err.message),
        )
        .with_context("parent", parent)
        .with_context("child", child_ref)
        .with_source(err),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn run(dir: &Path, args: &[&str]) {
        let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn write_manifest(dir: &Path, id: &str, body: &str) {
        let space_dir = dir.join("spaces").join(id);
        std::fs::create_dir_all(&space_dir).unwrap();
        std::fs::write(space_dir.join("space.toml"), body).unwrap();
    }

    fn commit_and_tag(dir: &Path, id: &str, version: &str) -> String {
        run(dir, &["add", "."]);
        run(dir, &["commit", "-q", "-m", &format!("{id} {version}")]);
        run(dir, &["tag", &format!("space/{id}/v{version}")]);
        String::from_utf8(
            Command::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(dir)
                .output()
                .unwrap()
                .stdout,
        )
        .unwrap()
        .trim()
        .to_string()
    }

    fn init() -> TempDir {
        let dir = TempDir::new().unwrap();
        run(dir.path(), &["init", "-q"]);
        run(dir.path(), &["config", "user.email", "test@example.com"]);
        run(dir.path(), &["config", "user.name", "test"]);
        dir
    }

    #[test]
    fn resolves_single_space_no_deps() {
        let dir = init();
        write_manifest(dir.path(), "base", "id = \"base\"\n");
        commit_and_tag(dir.path(), "base", "1.0.0");
        let repo = GitRepo::at(dir.path());

        let pinned = BTreeMap::new();
        let options = ClosureOptions {
            repo: &repo,
            pinned_spaces: &pinned,
            project_root: None,
        };
        let root = SpaceRef::parse("space:base@1.0.0").unwrap();
        let closure = compute(&[root], &options).unwrap();

        assert_eq!(closure.roots.len(), 1);
        assert_eq!(closure.load_order.len(), 1);
        assert_eq!(closure.spaces.len(), 1);
    }

    #[test]
    fn topological_order_respects_deps() {
        let dir = init();
        write_manifest(dir.path(), "leaf", "id = \"leaf\"\n");
        commit_and_tag(dir.path(), "leaf", "1.0.0");
        write_manifest(
            dir.path(),
            "root",
            "id = \"root\"\n\n[deps]\nspaces = [\"space:leaf@1.0.0\"]\n",
        );
        commit_and_tag(dir.path(), "root", "1.0.0");
        let repo = GitRepo::at(dir.path());

        let pinned = BTreeMap::new();
        let options = ClosureOptions {
            repo: &repo,
            pinned_spaces: &pinned,
            project_root: None,
        };
        let root = SpaceRef::parse("space:root@1.0.0").unwrap();
        let closure = compute(&[root], &options).unwrap();

        assert_eq!(closure.load_order.len(), 2);
        let leaf_pos = closure.load_order.iter().position(|k| k.as_str().starts_with("leaf@")).unwrap();
        let root_pos = closure.load_order.iter().position(|k| k.as_str().starts_with("root@")).unwrap();
        assert!(leaf_pos < root_pos, "leaf must load before root");
    }

    #[test]
    fn detects_cycle() {
        let dir = init();
        write_manifest(
            dir.path(),
            "a",
            "id = \"a\"\n\n[deps]\nspaces = [\"space:b@dev\"]\n",
        );
        write_manifest(
            dir.path(),
            "b",
            "id = \"b\"\n\n[deps]\nspaces = [\"space:a@dev\"]\n",
        );
        run(dir.path(), &["add", "."]);
        run(dir.path(), &["commit", "-q", "-m", "init"]);
        let repo = GitRepo::at(dir.path());

        let pinned = BTreeMap::new();
        let options = ClosureOptions {
            repo: &repo,
            pinned_spaces: &pinned,
            project_root: Some(dir.path()),
        };
        let root = SpaceRef::parse("space:a@dev").unwrap();
        let err = compute(&[root], &options).unwrap_err();
        assert_eq!(err.code, ErrorCode::CyclicDependency);
    }

    #[test]
    fn missing_dependency_is_wrapped() {
        let dir = init();
        write_manifest(
            dir.path(),
            "root",
            "id = \"root\"\n\n[deps]\nspaces = [\"space:missing@1.0.0\"]\n",
        );
        commit_and_tag(dir.path(), "root", "1.0.0");
        let repo = GitRepo::at(dir.path());

        let pinned = BTreeMap::new();
        let options = ClosureOptions {
            repo: &repo,
            pinned_spaces: &pinned,
            project_root: None,
        };
        let root = SpaceRef::parse("space:root@1.0.0").unwrap();
        let err = compute(&[root], &options).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingDependency);
    }

    #[test]
    fn pinned_space_skips_resolution() {
        let dir = init();
        write_manifest(dir.path(), "base", "id = \"base\"\n");
        let sha = commit_and_tag(dir.path(), "base", "1.0.0");
        write_manifest(dir.path(), "base", "id = \"base\"\nversion = \"2.0.0\"\n");
        commit_and_tag(dir.path(), "base", "2.0.0");
        let repo = GitRepo::at(dir.path());

        let id = SpaceId::parse("base").unwrap();
        let mut pinned = BTreeMap::new();
        pinned.insert(id, CommitSha::parse(&sha).unwrap());
        let options = ClosureOptions {
            repo: &repo,
            pinned_spaces: &pinned,
            project_root: None,
        };
        // Selector says 2.0.0, but the pin should win.
        let root = SpaceRef::parse("space:base@2.0.0").unwrap();
        let closure = compute(&[root], &options).unwrap();
        let resolved = closure.spaces.values().next().unwrap();
        assert_eq!(resolved.manifest.version, None);
        assert_eq!(resolved.commit, CommitSha::Sha(sha));
    }
}
