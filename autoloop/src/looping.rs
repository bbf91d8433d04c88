//! Multi-session loop for `autoloop run`.

use std::path::Path;
use std::thread;

use anyhow::{Result, anyhow};
use tracing::{debug, info};

use crate::core::reconcile::reconcile_tasks;
use crate::core::scheduler::{
    Progress, blocked_ids, is_run_complete, next_eligible, progress, resumable,
};
use crate::core::task::Task;
use crate::io::checks::CheckRunner;
use crate::io::config::load_config;
use crate::io::executor::Executor;
use crate::io::init::RunPaths;
use crate::io::run_state::load_run_state_or_none;
use crate::io::task_store::load_tasks_or_empty;
use crate::io::verification_store::load_ledger_or_default;
use crate::session::{SessionContext, SessionEvent, SessionTarget, run_session};

/// What the next session should do, decided from the stored flags and tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Complete,
    Next(SessionTarget),
    /// Nothing in progress, nothing eligible, and the run is not complete.
    Stuck { blocked: Vec<String> },
}

/// Pick the next session target: the initializer until tasks exist, then the
/// first in-progress task, then the first eligible one.
pub fn select(initialized: bool, tasks: &[Task]) -> Selection {
    if initialized && is_run_complete(tasks) {
        return Selection::Complete;
    }
    if !initialized || tasks.is_empty() {
        return Selection::Next(SessionTarget::Initialize);
    }
    match resumable(tasks).or_else(|| next_eligible(tasks)) {
        Some(task) => Selection::Next(SessionTarget::Task(task.id.clone())),
        None => Selection::Stuck {
            blocked: blocked_ids(tasks),
        },
    }
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every task is completed or skipped, or the executor declared success.
    Complete { declared: Option<String> },
    Stuck { blocked: Vec<String> },
    /// The session bound for this invocation was reached.
    MaxSessions { max_sessions: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub started_at_session: u32,
    pub sessions_executed: u32,
    pub transport_errors: u32,
    pub progress: Progress,
    pub stop: LoopStop,
}

#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    /// Overrides `max_sessions` from config for this invocation.
    pub max_sessions: Option<u32>,
}

/// Run sessions until the run completes, gets stuck, or the session bound is
/// reached.
///
/// A complete or stuck run returns before anything is written. Transport
/// failures are retried inside the session; any other error stops the loop
/// with state as last persisted.
pub fn run_loop<E: Executor, C: CheckRunner, F: FnMut(&SessionEvent<'_>)>(
    workdir: &Path,
    executor: &E,
    checks: &C,
    options: &LoopOptions,
    mut on_event: F,
) -> Result<LoopOutcome> {
    let paths = RunPaths::new(workdir);
    let mut state = load_run_state_or_none(&paths.state_path).ok_or_else(|| {
        anyhow!(
            "run not started in {} (run `autoloop start` first)",
            workdir.display()
        )
    })?;
    let config = load_config(&paths.config_path)?;
    let max_sessions = options.max_sessions.or(config.max_sessions);
    let ctx = SessionContext {
        paths: &paths,
        config: &config,
        executor,
        checks,
    };

    let started_at_session = state.session_count;
    let mut sessions_executed = 0u32;
    let mut transport_errors = 0u32;
    let mut tasks: Vec<Task> = Vec::new();
    let mut ledger = load_ledger_or_default(&paths.verification_path);

    let finish = |stop: LoopStop, tasks: &[Task], executed: u32, errors: u32| LoopOutcome {
        started_at_session,
        sessions_executed: executed,
        transport_errors: errors,
        progress: progress(tasks),
        stop,
    };

    loop {
        // Authoritative reload: the executor may have rewritten the file.
        let reloaded = load_tasks_or_empty(&paths.tasks_path);
        tasks = if sessions_executed == 0 {
            reloaded
        } else {
            reconcile_tasks(&tasks, reloaded, &ledger.exhausted_tasks(), chrono::Utc::now()).0
        };

        let target = match select(state.initialized, &tasks) {
            Selection::Complete => {
                info!(sessions_executed, "run complete");
                let stop = LoopStop::Complete { declared: None };
                return Ok(finish(stop, &tasks, sessions_executed, transport_errors));
            }
            Selection::Stuck { blocked } => {
                info!(?blocked, "no eligible task; run is stuck");
                let stop = LoopStop::Stuck { blocked };
                return Ok(finish(stop, &tasks, sessions_executed, transport_errors));
            }
            Selection::Next(target) => target,
        };

        if let Some(max) = max_sessions.filter(|max| sessions_executed >= *max) {
            info!(max_sessions = max, "session bound reached");
            let stop = LoopStop::MaxSessions { max_sessions: max };
            return Ok(finish(stop, &tasks, sessions_executed, transport_errors));
        }

        let (report, reconciled) =
            run_session(&ctx, &mut state, tasks, &mut ledger, target, &mut on_event)?;
        tasks = reconciled;
        sessions_executed += 1;
        transport_errors += report.transport_errors;

        if state.initialized && is_run_complete(&tasks) {
            info!(sessions_executed, "run complete");
            let stop = LoopStop::Complete { declared: None };
            return Ok(finish(stop, &tasks, sessions_executed, transport_errors));
        }
        let declared = match (&report.target, &report.completion_phrase) {
            (SessionTarget::Task(_), Some(phrase)) if !report.verification_failed() => Some(phrase),
            _ => None,
        };
        if let Some(phrase) = declared {
            info!(phrase = %phrase, "executor declared completion");
            let stop = LoopStop::Complete {
                declared: Some(phrase.clone()),
            };
            return Ok(finish(stop, &tasks, sessions_executed, transport_errors));
        }

        debug!(delay_secs = config.session_delay_secs, "sleeping before next session");
        thread::sleep(config.session_delay());
    }
}
