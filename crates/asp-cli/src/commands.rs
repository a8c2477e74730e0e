//! Command implementations, kept separate from argument parsing so they
//! can be read (and eventually tested) without going through `clap`.

use crate::session_factory::ProcessSessionFactory;
use anyhow::{bail, Context, Result};
use asp_git::GitRepo;
use asp_harness_core::{HarnessId, HarnessRegistry};
use asp_orchestrator::InstallOptions;
use asp_paths::AspHome;
use asp_session::{ContinuationRef, RunHandle, RunTurnInput, SessionRegistry};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

fn registry(home: &AspHome) -> GitRepo {
    GitRepo::at(home.repo())
}

fn harness_adapter(id: HarnessId) -> Arc<dyn asp_harness_core::HarnessAdapter> {
    match id {
        HarnessId::ClaudeCli => Arc::new(asp_harness_claude::ClaudeAdapter::cli()),
        HarnessId::ClaudeSdk => Arc::new(asp_harness_claude::ClaudeAdapter::sdk()),
        HarnessId::CodexCli => Arc::new(asp_harness_codex::CodexAdapter::default()),
        HarnessId::PiCli => Arc::new(asp_harness_pi::PiAdapter::default()),
        HarnessId::PiSdk => Arc::new(asp_harness_sdk::PiSdkAdapter::default()),
    }
}

fn full_harness_registry() -> HarnessRegistry {
    let mut registry = HarnessRegistry::new();
    for id in [HarnessId::ClaudeCli, HarnessId::ClaudeSdk, HarnessId::CodexCli, HarnessId::PiCli, HarnessId::PiSdk] {
        registry.register(harness_adapter(id)).expect("fresh registry never has duplicates");
    }
    registry
}

/// `asp install`: resolve, materialize, and compose every harness this
/// process knows about for the selected targets.
pub fn cmd_install(project_root: &Path, registry_url: &str, targets: Vec<String>, refresh: bool) -> Result<()> {
    let home = AspHome::from_env();
    let repo = registry(&home);
    let harnesses = full_harness_registry();
    let options = InstallOptions {
        project_root: project_root.to_path_buf(),
        registry_url: registry_url.to_string(),
        targets: if targets.is_empty() { None } else { Some(targets) },
        refresh,
        ..Default::default()
    };
    let outcome = asp_orchestrator::install(&home, &repo, &harnesses, &options).context("install")?;
    for (target, bundles) in &outcome.bundles {
        for bundle in bundles {
            println!("{target} -> {} ({})", bundle.harness_id, bundle.root_dir.display());
        }
    }
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// `asp build`: resolve and lock one target without materializing
/// artifacts.
pub fn cmd_build(project_root: &Path, registry_url: &str, target_name: &str, refresh: bool) -> Result<()> {
    let home = AspHome::from_env();
    let repo = registry(&home);
    let options = InstallOptions { project_root: project_root.to_path_buf(), registry_url: registry_url.to_string(), refresh, ..Default::default() };
    let lock = asp_orchestrator::build(&home, &repo, target_name, &options).context("build")?;
    println!("{}", lock.to_canonical_json().context("render lock")?);
    Ok(())
}

/// `asp lock`: alias for `build` that only prints the resulting lock's
/// path, for scripting.
pub fn cmd_lock(project_root: &Path, registry_url: &str, target_name: &str) -> Result<()> {
    let home = AspHome::from_env();
    let repo = registry(&home);
    let options = InstallOptions { project_root: project_root.to_path_buf(), registry_url: registry_url.to_string(), ..Default::default() };
    asp_orchestrator::build(&home, &repo, target_name, &options).context("build")?;
    println!("{}", asp_paths::project_lockfile_path(project_root).display());
    Ok(())
}

/// `asp lint`: resolve and report a target's non-fatal findings without
/// gating on them.
pub fn cmd_lint(project_root: &Path, registry_url: &str, target_name: &str) -> Result<()> {
    let home = AspHome::from_env();
    let repo = registry(&home);
    let options = InstallOptions { project_root: project_root.to_path_buf(), registry_url: registry_url.to_string(), ..Default::default() };
    match asp_orchestrator::build(&home, &repo, target_name, &options) {
        Ok(lock) => {
            let Some(locked) = lock.targets.get(target_name) else {
                bail!("'{target_name}' missing from generated lock");
            };
            if locked.warnings.is_empty() {
                println!("no findings");
            }
            for warning in &locked.warnings {
                println!("{warning}");
            }
        }
        Err(e) if e.code == asp_error::ErrorCode::LintError => {
            println!("{}", e.message);
        }
        Err(e) => return Err(e).context("lint"),
    }
    Ok(())
}

/// `asp run`: drive one non-interactive turn and print the unified event
/// stream as JSON lines to stdout.
pub async fn cmd_run(
    project_root: &Path,
    registry_url: &str,
    target_name: &str,
    frontend: HarnessId,
    model: Option<String>,
    prompt: String,
    cp_session_id: String,
    continuation_key: Option<String>,
) -> Result<()> {
    let home = AspHome::from_env();
    let repo = registry(&home);
    let harnesses = full_harness_registry();

    let mut sessions = SessionRegistry::new();
    if let Some(adapter) = harnesses.get(frontend) {
        sessions.register(Arc::new(ProcessSessionFactory::new(adapter))).context("register session factory")?;
    }

    let continuation = continuation_key.map(|key| ContinuationRef { harness_id: frontend, key });
    let run_id = uuid::Uuid::new_v4().to_string();
    let handle = RunHandle::new();

    let input = RunTurnInput {
        cp_session_id,
        run_id,
        asp_home: home,
        registry: repo,
        registry_url: registry_url.to_string(),
        spec: asp_session::ComposeSpec::Target { project_root: project_root.to_path_buf(), target_name: target_name.to_string() },
        frontend,
        provider: None,
        model,
        cwd: std::env::current_dir().context("current dir")?,
        prompt,
        attachments: Vec::new(),
        continuation,
        env: BTreeMap::new(),
        on_event: Arc::new(|event| {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
        }),
    };

    let result = asp_session::run_turn_non_interactive(input, &harnesses, &sessions, &handle).await;
    if !result.success {
        if let Some(error) = &result.error {
            bail!("{}: {}", error.code, error.message);
        }
        bail!("run did not succeed");
    }
    Ok(())
}

pub(crate) fn parse_harness_id(s: &str) -> std::result::Result<HarnessId, String> {
    match s {
        "claude-cli" => Ok(HarnessId::ClaudeCli),
        "claude-sdk" => Ok(HarnessId::ClaudeSdk),
        "codex-cli" => Ok(HarnessId::CodexCli),
        "pi-cli" => Ok(HarnessId::PiCli),
        "pi-sdk" => Ok(HarnessId::PiSdk),
        other => Err(format!("unknown harness '{other}', expected one of: claude-cli, claude-sdk, codex-cli, pi-cli, pi-sdk")),
    }
}
