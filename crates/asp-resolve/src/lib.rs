#![doc = include_str!("../README.md")]
//! asp-resolve
#![deny(unsafe_code)]
#![warn(missing_docs)]

use asp_error::{AspError, ErrorCode};
use asp_git::GitRepo;
use asp_refs::{CommitSha, Selector, SpaceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// Record of which concrete value a selector resolved to, retained on the
/// [`asp_refs::SpaceKey`]'s `ResolvedSpace` for provenance/debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResolvedSelector {
    /// Resolved via `registry/dist-tags.json`.
    DistTag {
        /// The tag name that was looked up.
        name: String,
        /// The version string the tag pointed at.
        version: String,
    },
    /// Resolved via an exact semver tag match.
    SemverExact {
        /// The matched version.
        version: String,
    },
    /// Resolved by selecting the greatest version satisfying a range.
    SemverRange {
        /// The original range expression.
        range: String,
        /// The version selected out of all candidates.
        matched_version: String,
    },
    /// A git commit sha used verbatim.
    GitPin {
        /// The sha, as verified against the registry.
        sha: String,
    },
    /// The reserved `dev` marker; no git lookup performed.
    Dev,
    /// The reserved `project` marker; no git lookup performed.
    Project,
}

/// The outcome of resolving a selector: a concrete commit plus provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The resolved commit (or reserved marker).
    pub commit: CommitSha,
    /// How that commit was arrived at.
    pub resolved_from: ResolvedSelector,
}

/// `registry/dist-tags.json`: `{ "<spaceId>": { "<tagName>": "<vX.Y.Z>" } }`.
type DistTags = BTreeMap<String, BTreeMap<String, String>>;

/// Resolve `selector` for `id` against `repo`, per spec §4.4.
pub fn resolve(repo: &GitRepo, id: &SpaceId, selector: &Selector) -> Result<Resolution> {
    match selector {
        Selector::Dev => Ok(Resolution {
            commit: CommitSha::Dev,
            resolved_from: ResolvedSelector::Dev,
        }),
        Selector::Project => Ok(Resolution {
            commit: CommitSha::Project,
            resolved_from: ResolvedSelector::Project,
        }),
        Selector::GitPin { sha } => resolve_git_pin(repo, sha),
        Selector::DistTag { name } => resolve_dist_tag(repo, id, name),
        Selector::SemverExact { version } => resolve_semver_exact(repo, id, version),
        Selector::SemverRange { range } => resolve_semver_range(repo, id, range),
    }
}

fn resolve_git_pin(repo: &GitRepo, sha: &str) -> Result<Resolution> {
    let commit = repo
        .resolve_ref(sha)
        .map_err(asp_git::GitAccessError::into_asp_error)?;
    Ok(Resolution {
        commit: CommitSha::parse(&commit)?,
        resolved_from: ResolvedSelector::GitPin { sha: commit },
    })
}

fn resolve_dist_tag(repo: &GitRepo, id: &SpaceId, tag_name: &str) -> Result<Resolution> {
    let bytes = repo
        .show("HEAD", "registry/dist-tags.json")
        .map_err(asp_git::GitAccessError::into_asp_error)?
        .ok_or_else(|| {
            AspError::new(
                ErrorCode::DistTagNotFound,
                "registry/dist-tags.json does not exist at HEAD",
            )
        })?;
    let tags: DistTags = serde_json::from_slice(&bytes)
        .map_err(|e| AspError::new(ErrorCode::DistTagNotFound, format!("registry/dist-tags.json: {e}")))?;

    let version = tags
        .get(id.as_str())
        .and_then(|by_tag| by_tag.get(tag_name))
        .ok_or_else(|| {
            AspError::new(
                ErrorCode::DistTagNotFound,
                format!("no dist-tag '{tag_name}' for space '{id}'"),
            )
        })?;
    let version = normalize_v_prefix(version);

    let commit = resolve_version_tag(repo, id, &version).map_err(|_| {
        AspError::new(
            ErrorCode::DistTagNotFound,
            format!("dist-tag '{tag_name}' for '{id}' points at missing tag space/{id}/{version}"),
        )
    })?;

    Ok(Resolution {
        commit: CommitSha::parse(&commit)?,
        resolved_from: ResolvedSelector::DistTag {
            name: tag_name.to_string(),
            version,
        },
    })
}

fn resolve_semver_exact(repo: &GitRepo, id: &SpaceId, version: &str) -> Result<Resolution> {
    let tag_version = normalize_v_prefix(version);
    let commit = resolve_version_tag(repo, id, &tag_version).map_err(|_| {
        AspError::new(
            ErrorCode::VersionNotFound,
            format!("no tag space/{id}/{tag_version}"),
        )
    })?;
    Ok(Resolution {
        commit: CommitSha::parse(&commit)?,
        resolved_from: ResolvedSelector::SemverExact {
            version: version.to_string(),
        },
    })
}

fn resolve_semver_range(repo: &GitRepo, id: &SpaceId, range: &str) -> Result<Resolution> {
    let req = semver::VersionReq::parse(range)
        .map_err(|e| AspError::new(ErrorCode::NoVersionMatches, format!("'{range}' is not a valid range: {e}")))?;
    let names_prereleases = range.contains('-');

    let pattern = format!("refs/tags/space/{id}/v*");
    let refs = repo
        .for_each_ref(&pattern)
        .map_err(asp_git::GitAccessError::into_asp_error)?;

    let mut best: Option<(semver::Version, String)> = None;
    for entry in refs {
        let Some(version_str) = entry.name.rsplit('/').next().and_then(|t| t.strip_prefix('v')) else {
            continue;
        };
        let Ok(version) = semver::Version::parse(version_str) else {
            continue;
        };
        if !version.pre.is_empty() && !names_prereleases {
            continue;
        }
        if !req.matches(&version) {
            continue;
        }
        let better = match &best {
            None => true,
            Some((current, _)) => version > *current,
        };
        if better {
            best = Some((version, entry.commit));
        }
    }

    let (version, commit) = best.ok_or_else(|| {
        AspError::new(
            ErrorCode::NoVersionMatches,
            format!("no tag for '{id}' satisfies range '{range}'"),
        )
    })?;

    Ok(Resolution {
        commit: CommitSha::parse(&commit)?,
        resolved_from: ResolvedSelector::SemverRange {
            range: range.to_string(),
            matched_version: version.to_string(),
        },
    })
}

fn resolve_version_tag(repo: &GitRepo, id: &SpaceId, tag_version: &str) -> std::result::Result<String, asp_git::GitAccessError> {
    repo.resolve_ref(&format!("refs/tags/space/{id}/{tag_version}"))
}

fn normalize_v_prefix(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}
