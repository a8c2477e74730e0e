#![doc = include_str!("../README.md")]
//! asp-error
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable error contract shared by every Agent Spaces crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to, per spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Parse errors: malformed refs, manifests, lock files.
    Parse,
    /// Resolution errors: selectors, dependencies, cycles.
    Resolution,
    /// I/O errors: git, registry, filesystem.
    Io,
    /// Integrity errors: content hash mismatches.
    Integrity,
    /// Lint errors: severity=error warnings at the install gate.
    Lint,
    /// Runtime/session errors from the turn driver.
    Runtime,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse",
            Self::Resolution => "resolution",
            Self::Io => "io",
            Self::Integrity => "integrity",
            Self::Lint => "lint",
            Self::Runtime => "runtime",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code (spec §7).
///
/// Each variant serialises to a `snake_case` string matching the codes named
/// in the specification, so these can be compared directly against
/// `RunResult.error.code` or CLI exit diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // -- Parse --
    /// A `space:<id>@<selector>` string failed to parse.
    RefInvalid,
    /// `space.toml` failed schema validation or had a missing/mismatched id.
    ManifestInvalid,
    /// `asp-lock.json` failed to parse or violates an invariant.
    LockInvalid,

    // -- Resolution --
    /// A dist-tag name has no entry in `dist-tags.json`.
    DistTagNotFound,
    /// An exact semver selector has no matching git tag.
    VersionNotFound,
    /// A semver range selector matched no tag.
    NoVersionMatches,
    /// A declared dependency ref could not be resolved.
    MissingDependency,
    /// The dependency graph contains a cycle.
    CyclicDependency,

    // -- I/O --
    /// The underlying git invocation failed.
    GitError,
    /// The registry clone could not be reached (e.g. fetch failed).
    RegistryUnavailable,
    /// A filesystem operation failed.
    FilesystemError,

    // -- Integrity --
    /// A computed content hash did not match the expected integrity value.
    IntegrityMismatch,

    // -- Lint --
    /// A severity=error lint warning blocked installation.
    LintError,

    // -- Runtime / session --
    /// Static validation or session setup failed before a session started.
    ResolveFailed,
    /// The requested model is not in the frontend's allowed set.
    ModelNotSupported,
    /// The frontend does not match the continuation's provider.
    ProviderMismatch,
    /// A continuation key does not point to an existing session directory.
    ContinuationNotFound,
    /// The requested frontend has no registered harness adapter.
    UnsupportedFrontend,
    /// The run was cancelled via `stop()` before the harness ended the turn.
    Cancelled,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RefInvalid | Self::ManifestInvalid | Self::LockInvalid => ErrorCategory::Parse,

            Self::DistTagNotFound
            | Self::VersionNotFound
            | Self::NoVersionMatches
            | Self::MissingDependency
            | Self::CyclicDependency => ErrorCategory::Resolution,

            Self::GitError | Self::RegistryUnavailable | Self::FilesystemError => {
                ErrorCategory::Io
            }

            Self::IntegrityMismatch => ErrorCategory::Integrity,

            Self::LintError => ErrorCategory::Lint,

            Self::ResolveFailed
            | Self::ModelNotSupported
            | Self::ProviderMismatch
            | Self::ContinuationNotFound
            | Self::UnsupportedFrontend
            | Self::Cancelled => ErrorCategory::Runtime,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation (e.g. `"cyclic_dependency"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefInvalid => "ref_invalid",
            Self::ManifestInvalid => "manifest_invalid",
            Self::LockInvalid => "lock_invalid",
            Self::DistTagNotFound => "dist_tag_not_found",
            Self::VersionNotFound => "version_not_found",
            Self::NoVersionMatches => "no_version_matches",
            Self::MissingDependency => "missing_dependency",
            Self::CyclicDependency => "cyclic_dependency",
            Self::GitError => "git_error",
            Self::RegistryUnavailable => "registry_unavailable",
            Self::FilesystemError => "filesystem_error",
            Self::IntegrityMismatch => "integrity_mismatch",
            Self::LintError => "lint_error",
            Self::ResolveFailed => "resolve_failed",
            Self::ModelNotSupported => "model_not_supported",
            Self::ProviderMismatch => "provider_mismatch",
            Self::ContinuationNotFound => "continuation_not_found",
            Self::UnsupportedFrontend => "unsupported_frontend",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AspError
// ---------------------------------------------------------------------------

/// Unified Agent Spaces error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Examples
///
/// ```
/// use asp_error::{AspError, ErrorCode};
///
/// let err = AspError::new(ErrorCode::CyclicDependency, "dependency cycle detected")
///     .with_context("path", "a@dev -> b@dev -> a@dev");
/// assert_eq!(err.code, ErrorCode::CyclicDependency);
/// ```
pub struct AspError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl AspError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for AspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("AspError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for AspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for AspError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience alias used throughout the library crates.
pub type Result<T> = std::result::Result<T, AspError>;

// ---------------------------------------------------------------------------
// Serialization support — carried across the session driver's event stream
// and the CLI's diagnostic output.
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`AspError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AspErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&AspError> for AspErrorDto {
    fn from(err: &AspError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<AspErrorDto> for AspError {
    fn from(dto: AspErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}
