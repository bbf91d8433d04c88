//! Orchestration for starting (or resuming) a run.
//!
//! A run is tied to one working directory. Starting it writes `.autoloop/`
//! with the run state, an empty task list, default config and the sandbox
//! declaration. Starting again with the same kind resumes the existing record.

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::auth::AuthorizationPolicy;
use crate::core::run::RunKind;
use crate::io::config::{LoopConfig, load_config, write_config};
use crate::io::init::{RunPaths, discard_run_dir, ensure_layout};
use crate::io::run_state::{RunState, load_run_state_or_none, write_run_state};
use crate::io::sandbox::{SandboxDeclaration, write_sandbox};
use crate::io::task_store::write_tasks;

/// Parameters of `autoloop start`.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub kind: RunKind,
    pub model: Option<String>,
    /// Preset plus explicit allow/deny; inferred programs are filled in here.
    pub policy: AuthorizationPolicy,
    /// Discard an existing run of a different kind.
    pub force: bool,
}

/// Outcome of `autoloop start`.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub paths: RunPaths,
    pub state: RunState,
    pub resumed: bool,
}

/// Start or resume a run in `workdir`.
///
/// Nothing is written unless `workdir` is an existing directory and the run
/// kind carries its specification.
pub fn start_run(workdir: &Path, request: StartRequest) -> Result<StartOutcome> {
    start_run_at(workdir, request, Utc::now())
}

pub(crate) fn start_run_at(
    workdir: &Path,
    request: StartRequest,
    now: DateTime<Utc>,
) -> Result<StartOutcome> {
    debug!(workdir = %workdir.display(), kind = %request.kind, "starting run");
    validate_request(workdir, &request)?;

    let paths = RunPaths::new(workdir);
    let existing = load_run_state_or_none(&paths.state_path);

    let StartRequest {
        kind,
        model,
        policy,
        force,
    } = request;
    let policy = policy.with_inferred_from(&kind.specification_text());

    let (state, resumed) = match existing {
        Some(existing) if existing.kind.label() != kind.label() => {
            if !force {
                bail!(
                    "{} already holds a {} run; pass --force to discard it",
                    paths.run_dir.display(),
                    existing.kind
                );
            }
            info!(previous = %existing.kind, "discarding existing run");
            discard_run_dir(&paths)?;
            (RunState::new(kind, workdir.to_path_buf(), model, Some(policy), now), false)
        }
        Some(mut existing) => {
            if existing.kind != kind {
                warn!(kind = %kind, "keeping the stored {} payload on resume", existing.kind);
            }
            info!(sessions = existing.session_count, "resuming run");
            if model.is_some() {
                existing.model = model;
            }
            existing.policy = Some(policy);
            existing.updated_at = now;
            (existing, true)
        }
        None => {
            info!(kind = %kind, "creating run");
            (RunState::new(kind, workdir.to_path_buf(), model, Some(policy), now), false)
        }
    };

    ensure_layout(&paths)?;
    write_run_state(&paths.state_path, &state).context("write state.json")?;

    if !paths.tasks_path.exists() {
        write_tasks(&paths.tasks_path, &[]).context("write tasks.json")?;
    }
    let config = if paths.config_path.exists() {
        load_config(&paths.config_path)?
    } else {
        let config = LoopConfig::default();
        write_config(&paths.config_path, &config).context("write config.toml")?;
        config
    };

    let preset = state.policy.as_ref().map(|p| p.preset).unwrap_or_default();
    let sandbox =
        SandboxDeclaration::for_run(workdir, &config.sandbox.read_only_paths, preset);
    write_sandbox(&paths.sandbox_path, &sandbox).context("write sandbox.json")?;

    Ok(StartOutcome {
        paths,
        state,
        resumed,
    })
}

fn validate_request(workdir: &Path, request: &StartRequest) -> Result<()> {
    if !workdir.is_dir() {
        bail!("invalid run directory: {} is not a directory", workdir.display());
    }
    if !request.kind.has_specification() {
        bail!("missing specification for {} run", request.kind);
    }
    if let RunKind::Migrator { source_dir, .. } = &request.kind {
        let source = workdir.join(source_dir);
        if !source.is_dir() {
            bail!("migration source {} is not a directory", source.display());
        }
    }
    Ok(())
}
