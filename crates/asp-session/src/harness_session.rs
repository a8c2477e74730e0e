//! The common harness session surface, per spec §4.14 step 5.

use crate::event::Event;
use asp_error::AspError;
use async_trait::async_trait;
use std::sync::Arc;

/// Result alias for this module's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// A tool invocation awaiting a permission decision.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// The tool being invoked.
    pub tool_name: String,
    /// JSON input passed to the tool.
    pub input: serde_json::Value,
}

/// A permission decision returned by a [`PermissionHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Allow the tool invocation to proceed.
    Allow,
    /// Deny the tool invocation.
    Deny,
}

/// Decides whether a tool invocation may proceed.
pub trait PermissionHandler: Send + Sync {
    /// Decide a pending tool invocation.
    fn decide(&self, request: &PermissionRequest) -> PermissionDecision;
}

/// The default handler (spec §4.14 step 5: "auto-allows all tool invocations").
pub struct AutoAllowHandler;

impl PermissionHandler for AutoAllowHandler {
    fn decide(&self, _request: &PermissionRequest) -> PermissionDecision {
        PermissionDecision::Allow
    }
}

/// Extra attachments accompanying a prompt.
#[derive(Debug, Clone, Default)]
pub struct SendPromptOptions {
    /// Paths to files attached to this prompt.
    pub attachments: Vec<std::path::PathBuf>,
    /// The caller's run id, echoed back on emitted events.
    pub run_id: String,
}

/// The common surface every harness-specific session implementation
/// provides, per spec §4.14 step 5.
#[async_trait]
pub trait HarnessSession: Send + Sync {
    /// Start the underlying harness process or SDK session.
    async fn start(&mut self) -> Result<()>;

    /// Send a prompt for the harness to act on.
    async fn send_prompt(&mut self, text: &str, options: &SendPromptOptions) -> Result<()>;

    /// Register the callback invoked for every harness-native event,
    /// already mapped to the unified [`Event`] shape by the adapter.
    fn on_event(&mut self, callback: Arc<dyn Fn(Event) + Send + Sync>);

    /// Install a permission handler; defaults to [`AutoAllowHandler`] if
    /// never called.
    fn set_permission_handler(&mut self, handler: Arc<dyn PermissionHandler>);

    /// Stop the session. `reason` is a human-readable description used in
    /// logs and in the synthesized cancellation [`crate::RunResult`].
    async fn stop(&mut self, reason: &str) -> Result<()>;
}
