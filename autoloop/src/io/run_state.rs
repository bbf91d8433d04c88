//! Run state storage (`.autoloop/state.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::AuthorizationPolicy;
use crate::core::run::{RunKind, RunPhase};
use crate::io::atomic::write_json_atomic;

/// One record per orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    /// Run kind and its payload.
    pub kind: RunKind,
    /// Set once the initializer session has produced a task list.
    pub initialized: bool,
    /// Completed sessions so far. Transport-error retries do not count.
    pub session_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub workdir: PathBuf,
    /// Model identifier handed to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<AuthorizationPolicy>,
}

impl RunState {
    pub fn new(
        kind: RunKind,
        workdir: PathBuf,
        model: Option<String>,
        policy: Option<AuthorizationPolicy>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            initialized: false,
            session_count: 0,
            created_at: now,
            updated_at: now,
            workdir,
            model,
            policy,
        }
    }

    /// Phase implied by the stored flags and the current task list.
    pub fn phase(&self, has_tasks: bool, complete: bool) -> RunPhase {
        if complete {
            RunPhase::Complete
        } else if self.initialized && has_tasks {
            RunPhase::Working
        } else if self.session_count > 0 {
            RunPhase::Initializing
        } else {
            RunPhase::Fresh
        }
    }
}

/// Load run state from disk.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(kind = state.kind.label(), sessions = state.session_count, "run state loaded");
    Ok(state)
}

/// Load run state, treating a missing or unreadable file as "no run".
pub fn load_run_state_or_none(path: &Path) -> Option<RunState> {
    if !path.exists() {
        return None;
    }
    match load_run_state(path) {
        Ok(state) => Some(state),
        Err(err) => {
            warn!(path = %path.display(), err = %format!("{err:#}"), "ignoring malformed run state");
            None
        }
    }
}

/// Atomically write run state to disk.
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), sessions = state.session_count, "writing run state");
    write_json_atomic(path, state)
}
