//! Generic process-backed [`SessionFactory`], built from one
//! [`HarnessAdapter`]'s own `detect`/`build_run_args`/`get_run_env`.
//!
//! Each harness's actual event wire format is adapter-specific and this
//! crate does not reimplement it (that stays out of scope, same as the
//! library crates); [`PassthroughMapper`] only recognizes a handful of
//! common shapes so `asp run` produces *something* to look at during
//! manual testing.

use asp_error::{AspError, ErrorCode};
use asp_harness_core::{ComposedTargetBundle, HarnessAdapter, HarnessId, RunOptions};
use asp_session::{EventKind, EventMapper, MessageRole, ProcessHarnessSession, ProcessSessionSpec, SessionFactory};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Builds a [`ProcessHarnessSession`] from one harness adapter.
pub struct ProcessSessionFactory {
    adapter: Arc<dyn HarnessAdapter>,
}

impl ProcessSessionFactory {
    /// Wrap `adapter` as a session factory.
    #[must_use]
    pub fn new(adapter: Arc<dyn HarnessAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl SessionFactory for ProcessSessionFactory {
    fn harness_id(&self) -> HarnessId {
        self.adapter.id()
    }

    async fn create_session(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> asp_session::Result<Box<dyn asp_session::HarnessSession>> {
        let detected = self.adapter.detect().await;
        let command = detected
            .path
            .ok_or_else(|| AspError::new(ErrorCode::UnsupportedFrontend, format!("'{}' binary not found: {}", self.adapter.id(), detected.error.unwrap_or_default())))?;

        let args = self.adapter.build_run_args(bundle, run_options);
        let env = self.adapter.get_run_env(bundle, run_options);
        let cwd = run_options.cwd.clone().unwrap_or_else(|| bundle.root_dir.clone());

        let spec = ProcessSessionSpec { command, args, env, cwd };
        Ok(Box::new(ProcessHarnessSession::new(spec, Arc::new(PassthroughMapper))))
    }
}

/// Recognizes `{"type": "message"|"turn_end"|"agent_end", ...}` lines.
/// Anything else is dropped rather than guessed at.
struct PassthroughMapper;

impl EventMapper for PassthroughMapper {
    fn map_line(&self, line: &Value) -> Vec<EventKind> {
        match line.get("type").and_then(Value::as_str) {
            Some("turn_end") => vec![EventKind::TurnEnd],
            Some("agent_end") => vec![EventKind::AgentEnd],
            Some("message") => {
                let role = match line.get("role").and_then(Value::as_str) {
                    Some("user") => MessageRole::User,
                    _ => MessageRole::Assistant,
                };
                let text = line.get("text").and_then(Value::as_str).map(str::to_string);
                vec![EventKind::MessageEnd { role, text }]
            }
            _ => Vec::new(),
        }
    }
}
