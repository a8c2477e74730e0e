//! A generic subprocess-backed [`HarnessSession`], for harnesses driven as
//! a CLI subprocess (spec §1: "we drive them as subprocesses or via SDK
//! calls but do not reimplement them").
//!
//! Each concrete harness's wire format is pluggable via [`EventMapper`];
//! this module only owns process lifecycle and line-oriented JSON framing,
//! grounded on the teacher's sidecar process tracking (`abp-host::process`).

use crate::event::{Event, EventKind};
use crate::harness_session::{AutoAllowHandler, HarnessSession, PermissionHandler, SendPromptOptions};
use asp_error::{AspError, ErrorCode};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Result alias for this module's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// Translates one harness's line-oriented JSON event protocol into the
/// unified [`EventKind`] stream.
pub trait EventMapper: Send + Sync {
    /// Map a single decoded JSON line to zero or more unified event kinds.
    fn map_line(&self, line: &serde_json::Value) -> Vec<EventKind>;

    /// Whether `kind` marks the end of the turn (spec §4.14 step 7:
    /// "either `turn_end` or `agent_end`").
    fn is_turn_end(&self, kind: &EventKind) -> bool {
        matches!(kind, EventKind::TurnEnd | EventKind::AgentEnd)
    }
}

/// Launch parameters for one subprocess session.
#[derive(Debug, Clone)]
pub struct ProcessSessionSpec {
    /// The harness binary to invoke.
    pub command: PathBuf,
    /// Arguments, as produced by `HarnessAdapter::build_run_args`.
    pub args: Vec<String>,
    /// Environment overlay, as produced by `HarnessAdapter::get_run_env`.
    pub env: BTreeMap<String, String>,
    /// Working directory for the child process.
    pub cwd: PathBuf,
}

/// A [`HarnessSession`] backed by a spawned CLI subprocess communicating
/// newline-delimited JSON on stdin/stdout.
pub struct ProcessHarnessSession {
    spec: ProcessSessionSpec,
    mapper: Arc<dyn EventMapper>,
    child: Option<Child>,
    callback: Arc<Mutex<Option<Arc<dyn Fn(Event) + Send + Sync>>>>,
    permission_handler: Arc<Mutex<Arc<dyn PermissionHandler>>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
    turn_ended: Arc<tokio::sync::Notify>,
}

impl ProcessHarnessSession {
    /// Create a session that has not yet spawned its subprocess.
    #[must_use]
    pub fn new(spec: ProcessSessionSpec, mapper: Arc<dyn EventMapper>) -> Self {
        Self {
            spec,
            mapper,
            child: None,
            callback: Arc::new(Mutex::new(None)),
            permission_handler: Arc::new(Mutex::new(Arc::new(AutoAllowHandler))),
            reader_task: None,
            turn_ended: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Resolves once the mapper has reported turn end, so the driver (step
    /// 7) can await in-flight emissions before finalizing.
    #[must_use]
    pub fn turn_ended(&self) -> Arc<tokio::sync::Notify> {
        Arc::clone(&self.turn_ended)
    }

}

#[async_trait]
impl HarnessSession for ProcessHarnessSession {
    async fn start(&mut self) -> Result<()> {
        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .current_dir(&self.spec.cwd)
            .envs(&self.spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| AspError::new(ErrorCode::ResolveFailed, format!("spawning '{}': {e}", self.spec.command.display())))?;

        let stdout = child.stdout.take().ok_or_else(|| AspError::new(ErrorCode::Internal, "child stdout not piped"))?;
        let mapper = Arc::clone(&self.mapper);
        let callback = Arc::clone(&self.callback);
        let turn_ended = Arc::clone(&self.turn_ended);

        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else { continue };
                        for kind in mapper.map_line(&value) {
                            let is_end = mapper.is_turn_end(&kind);
                            if let Some(cb) = callback.lock().expect("callback lock poisoned").as_ref() {
                                cb(Event {
                                    timestamp: chrono::Utc::now(),
                                    sequence: 0,
                                    cp_session_id: String::new(),
                                    run_id: String::new(),
                                    continuation: None,
                                    kind,
                                });
                            }
                            if is_end {
                                turn_ended.notify_waiters();
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        });

        self.child = Some(child);
        self.reader_task = Some(reader_task);
        Ok(())
    }

    async fn send_prompt(&mut self, text: &str, options: &SendPromptOptions) -> Result<()> {
        let child = self.child.as_mut().ok_or_else(|| AspError::new(ErrorCode::Internal, "session not started"))?;
        let stdin = child.stdin.as_mut().ok_or_else(|| AspError::new(ErrorCode::Internal, "child stdin not piped"))?;
        let payload = serde_json::json!({
            "prompt": text,
            "attachments": options.attachments,
            "run_id": options.run_id,
        });
        let mut line = serde_json::to_string(&payload).map_err(|e| AspError::new(ErrorCode::Internal, e.to_string()))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AspError::new(ErrorCode::ResolveFailed, format!("writing prompt to harness stdin: {e}")))?;
        Ok(())
    }

    fn on_event(&mut self, callback: Arc<dyn Fn(Event) + Send + Sync>) {
        *self.callback.lock().expect("callback lock poisoned") = Some(callback);
    }

    fn set_permission_handler(&mut self, handler: Arc<dyn PermissionHandler>) {
        *self.permission_handler.lock().expect("permission handler lock poisoned") = handler;
    }

    async fn stop(&mut self, _reason: &str) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoMapper;
    impl EventMapper for EchoMapper {
        fn map_line(&self, line: &serde_json::Value) -> Vec<EventKind> {
            if line.get("done").is_some() {
                vec![EventKind::TurnEnd]
            } else {
                vec![]
            }
        }
    }

    #[tokio::test]
    async fn start_spawns_a_real_process_and_reads_stdout() {
        let spec = ProcessSessionSpec {
            command: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), "echo '{\"done\":true}'".to_string()],
            env: BTreeMap::new(),
            cwd: std::env::temp_dir(),
        };
        let mut session = ProcessHarnessSession::new(spec, Arc::new(EchoMapper));
        let turn_ended = session.turn_ended();
        session.start().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), turn_ended.notified()).await.unwrap();
        session.stop("test complete").await.unwrap();
    }
}
