//! The non-interactive turn driver (spec §4.14): the single entry point
//! [`run_turn_non_interactive`] ties static validation, continuation
//! preparation, bundle materialization, session startup, and unified
//! event emission into one call.

use crate::cancel::RunHandle;
use crate::capability::Provider;
use crate::continuation::ContinuationRef;
use crate::event::{Event, EventKind, MessageRole, OnEvent, SequencedEmitter};
use crate::harness_session::SendPromptOptions;
use crate::result::RunResult;
use crate::session_registry::SessionRegistry;
use crate::spec::ComposeSpec;
use crate::validate;
use asp_error::ErrorCode;
use asp_git::GitRepo;
use asp_harness_core::{HarnessId, HarnessRegistry};
use asp_orchestrator::InstallOptions;
use asp_paths::AspHome;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Everything [`run_turn_non_interactive`] needs for one turn.
pub struct RunTurnInput {
    /// The coding-platform's own session identifier (stable across turns
    /// of the same logical conversation).
    pub cp_session_id: String,
    /// This call's unique run identifier.
    pub run_id: String,
    /// `ASP_HOME`, overlaid for the duration of this run (spec §4.14 step 4).
    pub asp_home: AspHome,
    /// The registry clone driving resolution.
    pub registry: GitRepo,
    /// The clone URL recorded in any lock file this run writes.
    pub registry_url: String,
    /// What to materialize: an ad hoc compose list or a project target.
    pub spec: ComposeSpec,
    /// Which harness frontend to run against.
    pub frontend: HarnessId,
    /// The provider the caller expects this frontend to speak to, if it
    /// wants that checked explicitly.
    pub provider: Option<Provider>,
    /// Requested model id, validated against the frontend's allowed set.
    pub model: Option<String>,
    /// Absolute working directory for the harness process.
    pub cwd: PathBuf,
    /// The user's prompt, emitted verbatim.
    pub prompt: String,
    /// File attachments accompanying the prompt.
    pub attachments: Vec<PathBuf>,
    /// A continuation from a prior turn, when resuming.
    pub continuation: Option<ContinuationRef>,
    /// Additional environment variables layered over the harness's own
    /// defaults.
    pub env: BTreeMap<String, String>,
    /// Callback invoked for every unified [`Event`].
    pub on_event: OnEvent,
}

/// Run one non-interactive turn against `input.frontend`, per spec §4.14.
///
/// `harnesses` composes the target bundle; `sessions` starts the harness
/// session against it. `handle` lets a concurrent task cancel the run via
/// [`RunHandle::stop`].
pub async fn run_turn_non_interactive(
    input: RunTurnInput,
    harnesses: &HarnessRegistry,
    sessions: &SessionRegistry,
    handle: &RunHandle,
) -> RunResult {
    let emitter = SequencedEmitter::new(input.cp_session_id.clone(), input.run_id.clone(), input.on_event.clone());

    // Step 1 (phase A): spec shape + absolute cwd. Failures here precede
    // any event emission beyond the terminal pair.
    if let Err(e) = validate::validate_shape(&input.spec, &input.cwd) {
        return fail_before_running(&emitter, e.code, &e.message).await;
    }

    // Step 2: prepare (but do not yet verify) the continuation key.
    let requires_dir = crate::capability::requires_session_directory(input.frontend);
    let (continuation, is_first_run) = match &input.continuation {
        Some(existing) => (Some(existing.clone()), false),
        None if requires_dir => (Some(ContinuationRef::derive_first_run(input.frontend, &input.cp_session_id)), true),
        None => (None, true),
    };
    if let Some(c) = &continuation {
        emitter.set_continuation(c.clone()).await;
    }

    // Step 3: running state, then the user's prompt, verbatim.
    emitter.emit(EventKind::State { state: crate::event::RunState::Running }).await;
    emitter
        .emit(EventKind::MessageStart { role: MessageRole::User, text: Some(input.prompt.clone()) })
        .await;

    // Step 1 (phase B, reordered per spec §8 scenario 5): frontend
    // capability, continuation ownership, and model agreement.
    if let Err(e) = validate::validate_capabilities(input.frontend, input.provider, input.model.as_deref(), continuation.as_ref()) {
        return fail_after_running(&emitter, e.code, &e.message).await;
    }

    // Continuation directory check now that we're past the cheap checks.
    if let Some(c) = &continuation {
        if let Err(e) = c.ensure_directory(&input.asp_home, is_first_run) {
            return fail_after_running(&emitter, e.code, &e.message).await;
        }
    }

    let Some(adapter) = harnesses.get(input.frontend) else {
        return fail_after_running(&emitter, ErrorCode::UnsupportedFrontend, format!("no harness adapter registered for '{}'", input.frontend)).await;
    };
    let Some(factory) = sessions.get(input.frontend) else {
        return fail_after_running(&emitter, ErrorCode::UnsupportedFrontend, format!("no session factory registered for '{}'", input.frontend)).await;
    };

    // Step 4: materialize the bundle for this frontend, scoped to one target.
    let (target_name, bundle) = match materialize_bundle(&input, harnesses).await {
        Ok(v) => v,
        Err(e) => return fail_after_running(&emitter, e.code, &e.message).await,
    };

    let mut run_options = adapter.get_default_run_options(&target_name);
    if input.model.is_some() {
        run_options.model = input.model.clone();
    }
    run_options.cwd = Some(input.cwd.clone());
    for (k, v) in &input.env {
        run_options.env.insert(k.clone(), v.clone());
    }

    // Step 5: start the session.
    let mut session = match factory.create_session(&bundle, &run_options).await {
        Ok(s) => s,
        Err(e) => return fail_after_running(&emitter, e.code, &e.message).await,
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<EventKind>();
    session.on_event(std::sync::Arc::new(move |ev: Event| {
        let _ = tx.send(ev.kind);
    }));

    if let Err(e) = session.start().await {
        return fail_after_running(&emitter, e.code, &e.message).await;
    }

    if let Err(e) = session.send_prompt(&input.prompt, &SendPromptOptions { attachments: input.attachments.clone(), run_id: input.run_id.clone() }).await
    {
        let _ = session.stop("send_prompt failed").await;
        return fail_after_running(&emitter, e.code, &e.message).await;
    }

    // Step 6/7: map and emit events until turn end, cancellation, or the
    // harness closing its event stream.
    let mut final_text: Option<String> = None;
    let result = loop {
        tokio::select! {
            biased;
            () = handle.stopped() => {
                let reason = handle.reason().unwrap_or_else(|| "stop() called".to_string());
                let _ = session.stop(&reason).await;
                break RunResult::cancelled(&reason);
            }
            maybe_kind = rx.recv() => {
                match maybe_kind {
                    Some(kind) => {
                        let is_end = matches!(kind, EventKind::TurnEnd | EventKind::AgentEnd);
                        if let EventKind::MessageEnd { role: MessageRole::Assistant, text: Some(text) } = &kind {
                            final_text = Some(text.clone());
                        }
                        emitter.emit(kind).await;
                        if is_end {
                            let _ = session.stop("turn ended").await;
                            break RunResult::success(final_text.clone());
                        }
                    }
                    None => {
                        let _ = session.stop("harness event stream closed").await;
                        break RunResult::success(final_text.clone());
                    }
                }
            }
        }
    };

    info!(cp_session_id = %input.cp_session_id, run_id = %input.run_id, success = result.success, "turn finished");
    let terminal_state = if result.success { crate::event::RunState::Complete } else { crate::event::RunState::Error };
    emitter.emit(EventKind::State { state: terminal_state }).await;
    emitter.emit(EventKind::Complete { result: result.clone() }).await;
    result
}

async fn fail_before_running(emitter: &SequencedEmitter, code: ErrorCode, message: &str) -> RunResult {
    warn!(%code, %message, "static validation failed before session start");
    let result = RunResult::failure(code, message);
    emitter.emit(EventKind::State { state: crate::event::RunState::Error }).await;
    emitter.emit(EventKind::Complete { result: result.clone() }).await;
    result
}

async fn fail_after_running(emitter: &SequencedEmitter, code: ErrorCode, message: impl Into<String>) -> RunResult {
    let message = message.into();
    warn!(%code, %message, "run failed after session setup began");
    let result = RunResult::failure(code, message);
    emitter.emit(EventKind::State { state: crate::event::RunState::Error }).await;
    emitter.emit(EventKind::Complete { result: result.clone() }).await;
    result
}

/// Materialize the target bundle for `input.frontend`, reusing the install
/// pipeline (spec §4.13) scoped to a single harness and a single target.
/// `ComposeSpec::Spaces` is written into a deterministic scratch project
/// under `asp_home`'s tmp directory so the orchestrator can treat it like
/// any other project.
async fn materialize_bundle(
    input: &RunTurnInput,
    harnesses: &HarnessRegistry,
) -> asp_orchestrator::Result<(String, asp_harness_core::ComposedTargetBundle)> {
    let (project_root, target_name, _scratch) = match &input.spec {
        ComposeSpec::Target { project_root, target_name } => (project_root.clone(), target_name.clone(), None),
        ComposeSpec::Spaces { compose } => {
            let target_name = "ad-hoc".to_string();
            let scratch = scratch_project_dir(&input.asp_home, compose);
            std::fs::create_dir_all(&scratch).map_err(|e| asp_error::AspError::new(ErrorCode::FilesystemError, e.to_string()))?;
            let manifest_path = asp_paths::project_manifest_path(&scratch);
            if !manifest_path.exists() {
                let toml = render_adhoc_manifest(&target_name, compose);
                std::fs::write(&manifest_path, toml).map_err(|e| asp_error::AspError::new(ErrorCode::FilesystemError, e.to_string()))?;
            }
            (scratch.clone(), target_name, Some(scratch))
        }
    };

    let mut scoped_registry = HarnessRegistry::new();
    if let Some(adapter) = harnesses.get(input.frontend) {
        scoped_registry.register(adapter)?;
    }

    let options = InstallOptions { project_root, registry_url: input.registry_url.clone(), targets: Some(vec![target_name.clone()]), ..Default::default() };

    let outcome = asp_orchestrator::install(&input.asp_home, &input.registry, &scoped_registry, &options)?;
    let bundle = outcome
        .bundles
        .get(&target_name)
        .and_then(|bundles| bundles.iter().find(|b| b.harness_id == input.frontend))
        .cloned()
        .ok_or_else(|| asp_error::AspError::new(ErrorCode::ResolveFailed, format!("'{}' composed no bundle for '{}'", target_name, input.frontend)))?;
    Ok((target_name, bundle))
}

fn scratch_project_dir(home: &AspHome, compose: &[String]) -> PathBuf {
    let mut hasher = Sha256::new();
    for entry in compose {
        hasher.update(entry.as_bytes());
        hasher.update(b"\0");
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    home.tmp().join("adhoc-runs").join(hex)
}

fn render_adhoc_manifest(target_name: &str, compose: &[String]) -> String {
    let mut out = String::from("schema = 1\n\n");
    out.push_str(&format!("[targets.{target_name}]\ncompose = [\n"));
    for entry in compose {
        out.push_str(&format!("  {:?},\n", entry));
    }
    out.push_str("]\n");
    out
}
