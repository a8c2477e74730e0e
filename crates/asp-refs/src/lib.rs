#![doc = include_str!("../README.md")]
//! asp-refs
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Data-model primitives (spec §3) and the reference/selector grammar
//! (spec §4.3) that every other Agent Spaces crate builds on.

use asp_error::{AspError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

const DEV_MARKER: &str = "dev";
const PROJECT_MARKER: &str = "project";

// ---------------------------------------------------------------------------
// SpaceId
// ---------------------------------------------------------------------------

/// A validated kebab-case Space identifier: `^[a-z0-9]+(?:-[a-z0-9]+)*$`,
/// at most 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpaceId(String);

impl SpaceId {
    /// Validate and wrap a string as a [`SpaceId`].
    pub fn parse(s: impl Into<String>) -> Result<Self, AspError> {
        let s = s.into();
        if s.is_empty() || s.len() > 64 {
            return Err(invalid_ref(format!(
                "space id '{s}' must be 1-64 characters"
            )));
        }
        let valid = s
            .split('-')
            .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        if !valid || s.starts_with('-') || s.ends_with('-') {
            return Err(invalid_ref(format!(
                "space id '{s}' must match ^[a-z0-9]+(?:-[a-z0-9]+)*$"
            )));
        }
        Ok(Self(s))
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SpaceId {
    type Error = AspError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SpaceId> for String {
    fn from(value: SpaceId) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// CommitSha
// ---------------------------------------------------------------------------

/// A commit identifier: 7-64 hex chars, or one of the reserved markers
/// `dev` (filesystem, mutable) / `project` (project-local space directory).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CommitSha {
    /// A concrete git commit SHA (or unambiguous prefix thereof).
    Sha(String),
    /// The reserved `dev` marker.
    Dev,
    /// The reserved `project` marker.
    Project,
}

impl CommitSha {
    /// Parse a commit sha string or reserved marker.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, AspError> {
        let s = s.as_ref();
        if s == DEV_MARKER {
            return Ok(Self::Dev);
        }
        if s == PROJECT_MARKER {
            return Ok(Self::Project);
        }
        if (7..=64).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self::Sha(s.to_ascii_lowercase()));
        }
        Err(invalid_ref(format!(
            "'{s}' is not a valid commit sha (7-64 hex chars) or reserved marker"
        )))
    }

    /// Short, stable prefix used inside a [`SpaceKey`] (12 hex chars, or the
    /// marker name for `dev`/`project`).
    #[must_use]
    pub fn key_prefix(&self) -> String {
        match self {
            Self::Sha(s) => s.chars().take(12).collect(),
            Self::Dev => DEV_MARKER.to_string(),
            Self::Project => PROJECT_MARKER.to_string(),
        }
    }

    /// Whether this marks a mutable, non-content-addressable space.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Dev | Self::Project)
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha(s) => f.write_str(s),
            Self::Dev => f.write_str(DEV_MARKER),
            Self::Project => f.write_str(PROJECT_MARKER),
        }
    }
}

impl TryFrom<String> for CommitSha {
    type Error = AspError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CommitSha> for String {
    fn from(value: CommitSha) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Sha256Integrity
// ---------------------------------------------------------------------------

/// A `sha256:<64-hex>` integrity string, or the reserved `sha256:dev` marker
/// used for mutable dev/project spaces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Sha256Integrity {
    /// A concrete content hash.
    Hash(String),
    /// The reserved marker for mutable filesystem-backed spaces.
    Dev,
}

impl Sha256Integrity {
    /// Parse a `sha256:...` integrity string.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, AspError> {
        let s = s.as_ref();
        let Some(rest) = s.strip_prefix("sha256:") else {
            return Err(invalid_ref(format!("'{s}' is missing the sha256: prefix")));
        };
        if rest == DEV_MARKER {
            return Ok(Self::Dev);
        }
        if rest.len() == 64 && rest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self::Hash(rest.to_ascii_lowercase()));
        }
        Err(invalid_ref(format!(
            "'{s}' is not sha256:<64-hex> or sha256:dev"
        )))
    }

    /// Construct the `sha256:<hex>` form directly from a 64-hex digest.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self::Hash(hex.into())
    }
}

impl fmt::Display for Sha256Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(h) => write!(f, "sha256:{h}"),
            Self::Dev => write!(f, "sha256:{DEV_MARKER}"),
        }
    }
}

impl TryFrom<String> for Sha256Integrity {
    type Error = AspError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Sha256Integrity> for String {
    fn from(value: Sha256Integrity) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// SpaceKey
// ---------------------------------------------------------------------------

/// `<SpaceId>@<CommitPrefix-or-marker>` — the unique identity of a resolved
/// node in a closure or lock file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpaceKey(String);

impl SpaceKey {
    /// Build a key from a space id and a resolved commit.
    #[must_use]
    pub fn new(id: &SpaceId, commit: &CommitSha) -> Self {
        Self(format!("{id}@{}", commit.key_prefix()))
    }

    /// Parse a raw `id@prefix` string (used when deserialising lock files).
    pub fn parse(s: impl Into<String>) -> Result<Self, AspError> {
        let s = s.into();
        let Some((id, prefix)) = s.split_once('@') else {
            return Err(invalid_ref(format!(
                "space key '{s}' must contain exactly one '@'"
            )));
        };
        SpaceId::parse(id)?;
        if prefix.is_empty() {
            return Err(invalid_ref(format!("space key '{s}' has an empty commit prefix")));
        }
        Ok(Self(s))
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SpaceKey {
    type Error = AspError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SpaceKey> for String {
    fn from(value: SpaceKey) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// A parsed selector token, per spec §3/§4.3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Selector {
    /// `{ kind: dist-tag, name }`
    DistTag {
        /// Tag name, e.g. `stable`, `latest`.
        name: String,
    },
    /// `{ kind: semver-exact, version }`
    SemverExact {
        /// Exact semver version (without a leading `v`).
        version: String,
    },
    /// `{ kind: semver-range, range }`
    SemverRange {
        /// A semver range expression.
        range: String,
    },
    /// `{ kind: git-pin, sha }`
    GitPin {
        /// Raw commit sha or `git:<sha>` form (prefix already stripped).
        sha: String,
    },
    /// `{ kind: dev }`
    Dev,
    /// `{ kind: project }`
    Project,
}

impl Selector {
    /// Parse a raw selector token per the priority order in spec §4.3:
    /// 1. exact `dev`
    /// 2. exact hex sha prefix (`git:<sha>` or raw 7-64 hex)
    /// 3. pure semver `X.Y.Z[-pre]`
    /// 4. semver range (`^`, `~`, `>=`, `<`, wildcard, or comma compound)
    /// 5. otherwise: dist-tag
    pub fn parse(token: &str) -> Result<Self, AspError> {
        if token.trim().is_empty() {
            return Err(invalid_ref("selector must not be empty"));
        }
        if token.chars().any(char::is_whitespace) {
            return Err(invalid_ref(format!("selector '{token}' contains whitespace")));
        }

        if token == DEV_MARKER {
            return Ok(Self::Dev);
        }

        if let Some(sha) = token.strip_prefix("git:") {
            return parse_hex_sha(sha).map(|sha| Self::GitPin { sha });
        }
        if is_hex_sha(token) {
            return Ok(Self::GitPin {
                sha: token.to_ascii_lowercase(),
            });
        }

        if is_pure_semver(token) {
            return Ok(Self::SemverExact {
                version: normalize_exact(token),
            });
        }

        if is_semver_range(token) {
            if semver::VersionReq::parse(token).is_err() {
                return Err(invalid_ref(format!("'{token}' looks like a semver range but failed to parse")));
            }
            return Ok(Self::SemverRange {
                range: token.to_string(),
            });
        }

        Ok(Self::DistTag {
            name: token.to_string(),
        })
    }

    /// Canonical token form, used when re-serialising a [`SpaceRef`].
    #[must_use]
    pub fn to_token(&self) -> String {
        match self {
            Self::DistTag { name } => name.clone(),
            Self::SemverExact { version } => version.clone(),
            Self::SemverRange { range } => range.clone(),
            Self::GitPin { sha } => sha.clone(),
            Self::Dev => DEV_MARKER.to_string(),
            Self::Project => PROJECT_MARKER.to_string(),
        }
    }
}

fn parse_hex_sha(s: &str) -> Result<String, AspError> {
    if is_hex_sha(s) {
        Ok(s.to_ascii_lowercase())
    } else {
        Err(invalid_ref(format!("'{s}' is not a valid 7-64 hex commit sha")))
    }
}

fn is_hex_sha(s: &str) -> bool {
    (7..=64).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_pure_semver(s: &str) -> bool {
    if s.chars().next().is_some_and(|c| !c.is_ascii_digit()) {
        return false;
    }
    semver::Version::parse(s.strip_prefix('=').unwrap_or(s)).is_ok()
}

fn normalize_exact(s: &str) -> String {
    s.strip_prefix('=').unwrap_or(s).to_string()
}

fn is_semver_range(s: &str) -> bool {
    s.contains('^')
        || s.contains('~')
        || s.contains(">=")
        || s.contains('<')
        || s.contains('>')
        || s.contains('*')
        || s.contains(',')
        || s.contains("||")
}

// ---------------------------------------------------------------------------
// SpaceRef
// ---------------------------------------------------------------------------

/// A parsed `space:<id>@<selector>` (or `space:project:<id>`) reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceRef {
    /// The referenced space's id.
    pub id: SpaceId,
    /// The parsed selector.
    pub selector: Selector,
    /// True for the `space:project:<id>` shorthand.
    pub project_space: bool,
    /// Optional filesystem path override (used by dev spaces).
    pub path: Option<String>,
}

impl SpaceRef {
    /// Parse a reference string. Grammar (spec §4.3):
    /// `space:<id>@<selector>` or `space:project:<id>`.
    pub fn parse(s: &str) -> Result<Self, AspError> {
        let Some(rest) = s.strip_prefix("space:") else {
            return Err(invalid_ref(format!("'{s}' does not start with 'space:'")));
        };

        if let Some(id) = rest.strip_prefix("project:") {
            let id = SpaceId::parse(id)?;
            return Ok(Self {
                id,
                selector: Selector::Project,
                project_space: true,
                path: None,
            });
        }

        let Some((id_part, selector_part)) = rest.split_once('@') else {
            return Err(invalid_ref(format!(
                "'{s}' must contain '@<selector>' (or use the space:project:<id> form)"
            )));
        };

        let id = SpaceId::parse(id_part)?;
        let selector = Selector::parse(selector_part)?;
        let project_space = matches!(selector, Selector::Project);

        Ok(Self {
            id,
            selector,
            project_space,
            path: None,
        })
    }

    /// Canonical serialization. For every valid ref string `R`,
    /// `SpaceRef::parse(R)?.to_ref_string()` reproduces `R` up to
    /// semantically equivalent forms (e.g. `1.2.3` vs `=1.2.3`), per spec §8
    /// property 1.
    #[must_use]
    pub fn to_ref_string(&self) -> String {
        if self.project_space {
            return format!("space:project:{}", self.id);
        }
        format!("space:{}@{}", self.id, self.selector.to_token())
    }
}

impl fmt::Display for SpaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ref_string())
    }
}

/// Total, side-effect-free check for whether `s` is a syntactically valid
/// Space reference string, per spec §4.3.
#[must_use]
pub fn is_space_ref_string(s: &str) -> bool {
    SpaceRef::parse(s).is_ok()
}

fn invalid_ref(message: impl Into<String>) -> AspError {
    AspError::new(ErrorCode::RefInvalid, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_dist_tag() {
        let r = SpaceRef::parse("space:base@stable").unwrap();
        assert_eq!(r.id.as_str(), "base");
        assert_eq!(r.selector, Selector::DistTag { name: "stable".into() });
        assert!(!r.project_space);
    }

    #[test]
    fn parses_semver_exact() {
        let r = SpaceRef::parse("space:base@1.2.3").unwrap();
        assert_eq!(
            r.selector,
            Selector::SemverExact { version: "1.2.3".into() }
        );
    }

    #[test]
    fn parses_semver_exact_with_equals_prefix() {
        let r = SpaceRef::parse("space:base@=1.2.3").unwrap();
        assert_eq!(
            r.selector,
            Selector::SemverExact { version: "1.2.3".into() }
        );
        // Semantically equivalent to the bare form.
        assert_eq!(r.to_ref_string(), "space:base@1.2.3");
    }

    #[test]
    fn parses_semver_range_caret() {
        let r = SpaceRef::parse("space:base@^1.0.0").unwrap();
        assert_eq!(r.selector, Selector::SemverRange { range: "^1.0.0".into() });
    }

    #[test]
    fn parses_semver_range_compound() {
        let r = SpaceRef::parse("space:base@>=1.0.0,<2.0.0").unwrap();
        assert!(matches!(r.selector, Selector::SemverRange { .. }));
    }

    #[test]
    fn parses_git_pin_raw_hex() {
        let r = SpaceRef::parse("space:base@abcdef1").unwrap();
        assert_eq!(r.selector, Selector::GitPin { sha: "abcdef1".into() });
    }

    #[test]
    fn parses_git_pin_with_prefix() {
        let r = SpaceRef::parse("space:base@git:abcdef1234").unwrap();
        assert_eq!(
            r.selector,
            Selector::GitPin { sha: "abcdef1234".into() }
        );
    }

    #[test]
    fn parses_dev() {
        let r = SpaceRef::parse("space:base@dev").unwrap();
        assert_eq!(r.selector, Selector::Dev);
    }

    #[test]
    fn parses_project_shorthand() {
        let r = SpaceRef::parse("space:project:base").unwrap();
        assert!(r.project_space);
        assert_eq!(r.selector, Selector::Project);
        assert_eq!(r.to_ref_string(), "space:project:base");
    }

    #[test]
    fn rejects_empty_selector() {
        assert!(SpaceRef::parse("space:base@").is_err());
    }

    #[test]
    fn rejects_whitespace_selector() {
        assert!(SpaceRef::parse("space:base@ stable").is_err());
    }

    #[test]
    fn rejects_bad_id() {
        assert!(SpaceRef::parse("space:Base@stable").is_err());
        assert!(SpaceRef::parse("space:-base@stable").is_err());
        assert!(SpaceRef::parse("space:base-@stable").is_err());
        assert!(SpaceRef::parse("space:ba_se@stable").is_err());
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(SpaceRef::parse("base@stable").is_err());
    }

    #[test]
    fn is_space_ref_string_is_total() {
        assert!(is_space_ref_string("space:base@stable"));
        assert!(!is_space_ref_string("not-a-ref"));
        assert!(!is_space_ref_string(""));
    }

    #[test]
    fn space_key_roundtrips() {
        let id = SpaceId::parse("base").unwrap();
        let commit = CommitSha::parse("abcdef1234567890abcdef1234567890abcdef12").unwrap();
        let key = SpaceKey::new(&id, &commit);
        assert_eq!(key.as_str(), "base@abcdef123456");
        let parsed = SpaceKey::parse(key.as_str().to_string()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn space_key_dev_marker() {
        let id = SpaceId::parse("base").unwrap();
        let key = SpaceKey::new(&id, &CommitSha::Dev);
        assert_eq!(key.as_str(), "base@dev");
    }

    #[test]
    fn sha256_integrity_roundtrip() {
        let hex = "a".repeat(64);
        let i = Sha256Integrity::parse(format!("sha256:{hex}")).unwrap();
        assert_eq!(i.to_string(), format!("sha256:{hex}"));
        let dev = Sha256Integrity::parse("sha256:dev").unwrap();
        assert_eq!(dev, Sha256Integrity::Dev);
    }

    // -- Property: reference round-trip (spec §8 property 1) ---------------

    fn arb_space_id() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}(-[a-z0-9]{1,8}){0,3}"
    }

    proptest! {
        #[test]
        fn prop_dist_tag_roundtrip(id in arb_space_id(), tag in "[a-z][a-z0-9_]{0,10}") {
            let s = format!("space:{id}@{tag}");
            if let Ok(r) = SpaceRef::parse(&s) {
                prop_assert_eq!(r.to_ref_string(), s);
            }
        }

        #[test]
        fn prop_semver_exact_roundtrip(id in arb_space_id(), major in 0u64..50, minor in 0u64..50, patch in 0u64..50) {
            let s = format!("space:{id}@{major}.{minor}.{patch}");
            let r = SpaceRef::parse(&s).unwrap();
            prop_assert_eq!(r.to_ref_string(), s);
        }

        #[test]
        fn prop_project_ref_roundtrip(id in arb_space_id()) {
            let s = format!("space:project:{id}");
            let r = SpaceRef::parse(&s).unwrap();
            prop_assert_eq!(r.to_ref_string(), s);
            prop_assert!(r.project_space);
        }
    }
}
