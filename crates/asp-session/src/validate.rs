//! Static validation performed before any session is created, per spec
//! §4.14 step 1 and the phase split documented in `DESIGN.md`.

use crate::capability::{self, Provider};
use crate::continuation::ContinuationRef;
use crate::spec::ComposeSpec;
use asp_error::{AspError, ErrorCode};
use asp_harness_core::HarnessId;
use std::path::Path;

/// Result alias for this module's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// Phase A checks (spec §4.14 step 1, first half): spec shape and an
/// absolute `cwd`. Failures here precede any event emission — the driver
/// emits only `state=error` then `complete`.
pub fn validate_shape(spec: &ComposeSpec, cwd: &Path) -> Result<()> {
    if !spec.is_well_formed() {
        return Err(AspError::new(ErrorCode::ResolveFailed, "run spec names neither a compose list nor a project target"));
    }
    if !cwd.is_absolute() {
        return Err(AspError::new(ErrorCode::ResolveFailed, format!("cwd must be absolute, got '{}'", cwd.display())));
    }
    Ok(())
}

/// Phase B checks (spec §4.14 step 1, second half, reordered per the
/// concrete scenario in spec §8 scenario 5): frontend support, frontend ↔
/// provider agreement, continuation ↔ provider agreement, and the model
/// being in the frontend's allowed set.
pub fn validate_capabilities(
    frontend: HarnessId,
    expected_provider: Option<Provider>,
    model: Option<&str>,
    continuation: Option<&ContinuationRef>,
) -> Result<()> {
    let Some(row) = capability::capability_of(frontend) else {
        return Err(AspError::new(ErrorCode::UnsupportedFrontend, format!("'{frontend}' has no registered harness adapter")));
    };

    if let Some(expected) = expected_provider {
        if expected != row.provider {
            return Err(AspError::new(
                ErrorCode::ProviderMismatch,
                format!("frontend '{frontend}' talks to {:?}, not the requested {expected:?}", row.provider),
            ));
        }
    }

    if let Some(continuation) = continuation {
        if continuation.harness_id != frontend {
            return Err(AspError::new(
                ErrorCode::ProviderMismatch,
                format!("continuation belongs to '{}', not the requested frontend '{frontend}'", continuation.harness_id),
            ));
        }
    }

    if !capability::model_is_allowed(frontend, model) {
        return Err(AspError::new(
            ErrorCode::ModelNotSupported,
            format!("model '{}' is not supported by frontend '{frontend}'", model.unwrap_or("")),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_cwd() {
        let spec = ComposeSpec::Spaces { compose: vec!["space:base@stable".to_string()] };
        let err = validate_shape(&spec, Path::new("relative/path")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ResolveFailed);
    }

    #[test]
    fn rejects_empty_compose_list() {
        let spec = ComposeSpec::Spaces { compose: vec![] };
        let err = validate_shape(&spec, Path::new("/abs")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ResolveFailed);
    }

    #[test]
    fn accepts_well_formed_target_spec() {
        let spec = ComposeSpec::Target { project_root: std::path::PathBuf::from("/work/proj"), target_name: "default".to_string() };
        validate_shape(&spec, Path::new("/work/proj")).unwrap();
    }

    #[test]
    fn rejects_unsupported_model() {
        let err = validate_capabilities(HarnessId::ClaudeCli, None, Some("not-a-real-model"), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotSupported);
    }

    #[test]
    fn rejects_mismatched_provider() {
        let err = validate_capabilities(HarnessId::ClaudeCli, Some(Provider::OpenAi), None, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderMismatch);
    }

    #[test]
    fn rejects_continuation_for_a_different_frontend() {
        let continuation = ContinuationRef { harness_id: HarnessId::PiSdk, key: "abc".to_string() };
        let err = validate_capabilities(HarnessId::ClaudeCli, None, None, Some(&continuation)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderMismatch);
    }

    #[test]
    fn accepts_matching_everything() {
        let continuation = ContinuationRef { harness_id: HarnessId::ClaudeCli, key: "abc".to_string() };
        validate_capabilities(HarnessId::ClaudeCli, Some(Provider::Anthropic), Some("claude-3-5-sonnet-latest"), Some(&continuation)).unwrap();
    }
}
