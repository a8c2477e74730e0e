//! The terminal outcome of a run, per spec §4.14 step 8 and §6.

use asp_error::ErrorCode;
use serde::{Deserialize, Serialize};

/// A coded error attached to a failed [`RunResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    /// The closed code, per spec §6.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

/// The outcome of one call to [`crate::run_turn_non_interactive`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether the turn completed without error or cancellation.
    pub success: bool,
    /// The assistant's final output text, when the run succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    /// The failure reason, when `success` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunResult {
    /// A successful result carrying the assistant's final text.
    #[must_use]
    pub fn success(final_output: Option<String>) -> Self {
        Self { success: true, final_output, error: None }
    }

    /// A failed result carrying a coded error.
    #[must_use]
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { success: false, final_output: None, error: Some(RunError { code, message: message.into() }) }
    }

    /// The cancellation result synthesized by [`crate::RunHandle::stop`]
    /// when cancellation lands before the harness's own end-of-turn.
    #[must_use]
    pub fn cancelled(reason: &str) -> Self {
        Self::failure(ErrorCode::Cancelled, format!("run cancelled: {reason}"))
    }
}
