//! The provider-typed harness capability table (spec §4.14, final paragraph).
//!
//! Used by static validation (frontend/provider/model agreement) and by
//! clients that want to discover what a frontend supports before calling
//! [`crate::run_turn_non_interactive`].

use asp_harness_core::HarnessId;
use serde::{Deserialize, Serialize};

/// The upstream model provider a frontend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Anthropic's API, used by the Claude CLI and Claude Agent SDK frontends.
    Anthropic,
    /// OpenAI's API, used by the Codex CLI frontend.
    OpenAi,
    /// Pi's multi-provider dialect layer, used by the Pi CLI and Pi SDK frontends.
    Pi,
}

/// One row of the frontend capability table: which provider a harness
/// speaks to, and which model ids it accepts.
#[derive(Debug, Clone)]
pub struct FrontendCapability {
    /// The harness this row describes.
    pub harness_id: HarnessId,
    /// The provider this harness's models are validated against.
    pub provider: Provider,
    /// Model ids this frontend accepts, in the order clients should display them.
    pub allowed_models: &'static [&'static str],
}

const CLAUDE_MODELS: &[&str] = &["claude-3-5-sonnet-latest", "claude-3-5-haiku-latest", "claude-3-opus-latest"];
const CODEX_MODELS: &[&str] = &["gpt-4.1", "gpt-4.1-mini", "o3"];
const PI_MODELS: &[&str] = &["claude-3-5-sonnet-latest", "gpt-4.1", "gemini-1.5-pro"];

/// The full capability table, one row per [`HarnessId`].
pub const FRONTENDS: &[FrontendCapability] = &[
    FrontendCapability { harness_id: HarnessId::ClaudeCli, provider: Provider::Anthropic, allowed_models: CLAUDE_MODELS },
    FrontendCapability { harness_id: HarnessId::ClaudeSdk, provider: Provider::Anthropic, allowed_models: CLAUDE_MODELS },
    FrontendCapability { harness_id: HarnessId::CodexCli, provider: Provider::OpenAi, allowed_models: CODEX_MODELS },
    FrontendCapability { harness_id: HarnessId::PiCli, provider: Provider::Pi, allowed_models: PI_MODELS },
    FrontendCapability { harness_id: HarnessId::PiSdk, provider: Provider::Pi, allowed_models: PI_MODELS },
];

/// Look up the capability row for a frontend.
#[must_use]
pub fn capability_of(harness_id: HarnessId) -> Option<&'static FrontendCapability> {
    FRONTENDS.iter().find(|row| row.harness_id == harness_id)
}

/// Whether `model` is in `harness_id`'s allowed set. An empty/absent model
/// is always accepted (the harness falls back to its own default).
#[must_use]
pub fn model_is_allowed(harness_id: HarnessId, model: Option<&str>) -> bool {
    let Some(model) = model else { return true };
    capability_of(harness_id).is_some_and(|row| row.allowed_models.contains(&model))
}

/// Whether a session directory is required for resuming this frontend
/// across turns (spec §4.14 step 2: "for such frontends"). Subprocess CLI
/// frontends and the Claude Agent SDK persist session state to disk; the
/// Pi SDK keeps continuation entirely in the caller's process and so has
/// no filesystem session directory to verify.
#[must_use]
pub fn requires_session_directory(harness_id: HarnessId) -> bool {
    !matches!(harness_id, HarnessId::PiSdk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_harness_id_has_a_capability_row() {
        for id in [HarnessId::ClaudeCli, HarnessId::ClaudeSdk, HarnessId::CodexCli, HarnessId::PiCli, HarnessId::PiSdk] {
            assert!(capability_of(id).is_some(), "{id} missing from FRONTENDS");
        }
    }

    #[test]
    fn model_rejection_is_exact_match() {
        assert!(model_is_allowed(HarnessId::ClaudeCli, Some("claude-3-5-sonnet-latest")));
        assert!(!model_is_allowed(HarnessId::ClaudeCli, Some("not-a-real-model")));
        assert!(model_is_allowed(HarnessId::ClaudeCli, None));
    }

    #[test]
    fn cross_provider_models_are_rejected() {
        assert!(!model_is_allowed(HarnessId::ClaudeCli, Some("gpt-4.1")));
        assert!(!model_is_allowed(HarnessId::CodexCli, Some("claude-3-5-sonnet-latest")));
    }
}
