//! Read-only views of a run: `autoloop status`, `next` and `validate`.
//!
//! Nothing here writes to `.autoloop/`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::core::reconcile::validate_tasks;
use crate::core::run::RunPhase;
use crate::core::scheduler::{Progress, blocked_ids, is_run_complete, progress};
use crate::io::config::load_config;
use crate::io::init::RunPaths;
use crate::io::run_state::{load_run_state, load_run_state_or_none};
use crate::io::task_store::{load_tasks, load_tasks_or_empty};
use crate::io::verification_store::{VerificationLedger, load_ledger_or_default};
use crate::looping::{Selection, select};
use crate::session::SessionTarget;

#[derive(Debug, Clone, Serialize)]
pub struct TaskAttempts {
    pub task_id: String,
    pub attempts: u32,
    pub passed: bool,
}

/// Snapshot of a run for operators.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub kind: String,
    pub phase: RunPhase,
    pub session_count: u32,
    pub progress: Progress,
    /// Task the next session would target; `None` before initialization.
    pub next_task: Option<String>,
    pub stuck: bool,
    pub blocked: Vec<String>,
    pub verification: Vec<TaskAttempts>,
}

impl StatusReport {
    pub fn is_complete(&self) -> bool {
        self.phase == RunPhase::Complete
    }

    pub fn render_text(&self) -> String {
        let mut buf = format!(
            "{} run, {} after {} session(s)\n{}\n",
            self.kind,
            self.phase.as_str(),
            self.session_count,
            self.progress.summary()
        );
        if let Some(next) = &self.next_task {
            buf.push_str(&format!("next: {next}\n"));
        }
        if self.stuck {
            buf.push_str("stuck: no task is in progress or eligible\n");
        }
        if !self.blocked.is_empty() {
            buf.push_str(&format!("blocked: {}\n", self.blocked.join(", ")));
        }
        for entry in &self.verification {
            let verdict = if entry.passed { "passed" } else { "failing" };
            buf.push_str(&format!(
                "verification {}: {} attempt(s), {verdict}\n",
                entry.task_id, entry.attempts
            ));
        }
        buf
    }
}

/// Build the status report for the run in `workdir`.
pub fn run_status(workdir: &Path) -> Result<StatusReport> {
    let paths = RunPaths::new(workdir);
    let state = load_run_state_or_none(&paths.state_path)
        .ok_or_else(|| anyhow!("run not started in {}", workdir.display()))?;
    let tasks = load_tasks_or_empty(&paths.tasks_path);
    let ledger = load_ledger_or_default(&paths.verification_path);

    let selection = select(state.initialized, &tasks);
    let (next_task, stuck) = match &selection {
        Selection::Next(SessionTarget::Task(id)) => (Some(id.clone()), false),
        Selection::Stuck { .. } => (None, true),
        _ => (None, false),
    };
    let verification = tasks
        .iter()
        .filter(|task| ledger.attempts(&task.id) > 0)
        .map(|task| TaskAttempts {
            task_id: task.id.clone(),
            attempts: ledger.attempts(&task.id),
            passed: ledger.latest(&task.id).is_some_and(|r| r.passed()),
        })
        .collect();

    let complete = state.initialized && is_run_complete(&tasks);
    Ok(StatusReport {
        kind: state.kind.label().to_string(),
        phase: state.phase(!tasks.is_empty(), complete),
        session_count: state.session_count,
        progress: progress(&tasks),
        next_task,
        stuck,
        blocked: blocked_ids(&tasks),
        verification,
    })
}

/// What `autoloop next` prints.
pub fn next_selection(workdir: &Path) -> Result<Selection> {
    let paths = RunPaths::new(workdir);
    let state = load_run_state_or_none(&paths.state_path)
        .ok_or_else(|| anyhow!("run not started in {}", workdir.display()))?;
    Ok(select(state.initialized, &load_tasks_or_empty(&paths.tasks_path)))
}

/// Problems found by `autoloop validate`; empty means the run directory is
/// usable. Unlike the loop, malformed files are reported rather than ignored.
pub fn validate_run(workdir: &Path) -> Result<Vec<String>> {
    let paths = RunPaths::new(workdir);
    let mut problems = Vec::new();

    if !paths.run_dir.is_dir() {
        return Ok(vec![format!("{} does not exist", paths.run_dir.display())]);
    }
    if let Err(err) = load_run_state(&paths.state_path) {
        problems.push(format!("state.json: {err:#}"));
    }
    if let Err(err) = load_config(&paths.config_path) {
        problems.push(format!("config.toml: {err:#}"));
    }

    match load_tasks(&paths.tasks_path) {
        Ok(tasks) => problems.extend(validate_tasks(&tasks)),
        Err(err) => problems.push(format!("tasks.json: {err:#}")),
    }

    if paths.verification_path.exists()
        && let Err(err) = read_ledger(&paths.verification_path)
    {
        problems.push(format!("verification.json: {err:#}"));
    }
    Ok(problems)
}

fn read_ledger(path: &Path) -> Result<VerificationLedger> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
