//! One executor session: prompt, execute (retrying transport failures),
//! reload and reconcile the task file, verify newly completed tasks, and
//! persist state, session artifacts and the progress note.

use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::auth::ToolGate;
use crate::core::completion::{DEFAULT_COMPLETION_PHRASES, find_completion_phrase};
use crate::core::reconcile::{ReconcileReport, reconcile_tasks, validate_tasks};
use crate::core::run::RunPhase;
use crate::core::scheduler::{Progress, progress};
use crate::core::task::{Task, TaskStatus, find_task, find_task_mut};
use crate::io::checks::CheckRunner;
use crate::io::config::LoopConfig;
use crate::io::executor::{ExecEvent, ExecRequest, Executor, Transcript};
use crate::io::init::{RUN_DIR_NAME, RunPaths};
use crate::io::progress_log::{ProgressEntry, append_progress};
use crate::io::prompt::{CodingInputs, InitializerInputs, PromptBuilder};
use crate::io::run_state::{RunState, write_run_state};
use crate::io::sandbox::SandboxDeclaration;
use crate::io::session_log::{SessionMeta, SessionWriteRequest, append_session_error, write_session};
use crate::io::task_store::{load_tasks_or_empty, write_tasks};
use crate::io::verification_store::{VerificationLedger, write_ledger};
use crate::verify::{VerifyContext, VerifyOutcome, apply_outcome, verify_task};

/// What a session works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// Write the task list.
    Initialize,
    Task(String),
}

impl SessionTarget {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            SessionTarget::Initialize => None,
            SessionTarget::Task(id) => Some(id),
        }
    }

    fn phase(&self) -> RunPhase {
        match self {
            SessionTarget::Initialize => RunPhase::Initializing,
            SessionTarget::Task(_) => RunPhase::Working,
        }
    }
}

/// Collaborators shared by every session of a loop.
pub struct SessionContext<'a> {
    pub paths: &'a RunPaths,
    pub config: &'a LoopConfig,
    pub executor: &'a dyn Executor,
    pub checks: &'a dyn CheckRunner,
}

/// Observer notifications, in order of occurrence.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    Started {
        session: u32,
        target: &'a SessionTarget,
    },
    Exec(&'a ExecEvent),
    TransportError {
        session: u32,
        attempt: u32,
        error: &'a str,
    },
    Finished(&'a SessionReport),
}

/// Result of one successful session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: u32,
    pub target: SessionTarget,
    pub transcript: Transcript,
    pub transport_errors: u32,
    pub completion_phrase: Option<String>,
    pub reconcile: ReconcileReport,
    pub verifications: Vec<(String, VerifyOutcome)>,
    /// Problems in the task list the executor wrote.
    pub task_problems: Vec<String>,
    pub progress: Progress,
}

impl SessionReport {
    pub fn verification_failed(&self) -> bool {
        self.verifications.iter().any(|(_, outcome)| !outcome.passed())
    }
}

/// Run one session against `tasks` (the freshly reloaded list) and return the
/// report plus the reconciled list that was persisted.
///
/// Transport failures are retried after the configured backoff without
/// advancing the session number; only persistence failures are returned.
pub fn run_session(
    ctx: &SessionContext<'_>,
    state: &mut RunState,
    mut tasks: Vec<Task>,
    ledger: &mut VerificationLedger,
    target: SessionTarget,
    on_event: &mut dyn FnMut(&SessionEvent<'_>),
) -> Result<(SessionReport, Vec<Task>)> {
    let session = state.session_count + 1;
    let started_at = Utc::now();
    let policy = state.policy.clone().unwrap_or_default();
    let workdir = ctx.paths.workdir.clone();

    if let SessionTarget::Task(id) = &target {
        let claimed = match find_task_mut(&mut tasks, id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::InProgress;
                true
            }
            _ => false,
        };
        if claimed {
            write_tasks(&ctx.paths.tasks_path, &tasks).context("mark target in progress")?;
        }
    }

    let prompt = build_prompt(ctx, state, &tasks, ledger, &target, session)?;
    let request = ExecRequest {
        session,
        workdir: workdir.clone(),
        prompt: prompt.clone(),
        model: state.model.clone(),
        sandbox: SandboxDeclaration::for_run(
            &workdir,
            &ctx.config.sandbox.read_only_paths,
            policy.preset,
        ),
        timeout: ctx.config.session_timeout(),
        output_limit_bytes: ctx.config.executor.output_limit_bytes,
    };
    let gate = ToolGate::new(policy, workdir.clone());

    info!(session, target = ?target, "session started");
    on_event(&SessionEvent::Started {
        session,
        target: &target,
    });

    let mut transport_errors = 0u32;
    let transcript = loop {
        let result = ctx.executor.exec(&request, &gate, &mut |event| {
            on_event(&SessionEvent::Exec(event));
        });
        match result {
            Ok(transcript) => break transcript,
            Err(err) => {
                transport_errors += 1;
                let message = format!("{err:#}");
                error!(session, attempt = transport_errors, err = %message, "executor transport failure");
                append_session_error(&ctx.paths.session_dir(session), Utc::now(), &message)?;
                on_event(&SessionEvent::TransportError {
                    session,
                    attempt: transport_errors,
                    error: &message,
                });
                thread::sleep(ctx.config.error_backoff());
            }
        }
    };
    let ended_at = Utc::now();

    let reloaded = load_tasks_or_empty(&ctx.paths.tasks_path);
    let (mut tasks, reconcile) =
        reconcile_tasks(&tasks, reloaded, &ledger.exhausted_tasks(), ended_at);
    if !reconcile.is_clean() {
        debug!(?reconcile, "reconciled executor edits");
    }

    let task_problems = validate_tasks(&tasks);
    for problem in &task_problems {
        warn!(session, problem = %problem, "task list problem");
    }
    if target == SessionTarget::Initialize && !tasks.is_empty() {
        state.initialized = true;
    }

    let verify_ctx = VerifyContext {
        workdir: &workdir,
        config: &ctx.config.verification,
        checks: ctx.checks,
    };
    let mut verifications = Vec::new();
    for id in &reconcile.newly_completed {
        let Some(task) = find_task_mut(&mut tasks, id) else {
            continue;
        };
        if task.verification_command.is_none() {
            continue;
        }
        let outcome = verify_task(task, ledger, &verify_ctx, Utc::now());
        apply_outcome(task, &outcome);
        verifications.push((id.clone(), outcome));
    }

    let completion_phrase =
        find_completion_phrase(&transcript.narration(), &ctx.config.completion_phrases)
            .map(str::to_string);
    let progress = progress(&tasks);

    write_tasks(&ctx.paths.tasks_path, &tasks).context("write tasks.json")?;
    if !verifications.is_empty() {
        write_ledger(&ctx.paths.verification_path, ledger).context("write verification.json")?;
    }
    state.session_count = session;
    state.updated_at = ended_at;
    write_run_state(&ctx.paths.state_path, state).context("write state.json")?;

    let meta = SessionMeta {
        session,
        phase: target.phase(),
        task_id: target.task_id().map(str::to_string),
        started_at,
        ended_at,
        duration_ms: u64::try_from((ended_at - started_at).num_milliseconds()).unwrap_or(0),
        is_error: transcript.is_error,
        tool_uses: transcript.tool_uses,
        tool_denials: transcript.tool_denials,
        completion_phrase: completion_phrase.clone(),
    };
    write_session(&SessionWriteRequest {
        dir: ctx.paths.session_dir(session),
        meta: &meta,
        prompt: &prompt,
        transcript: &transcript.text,
    })?;

    let report = SessionReport {
        session,
        target,
        transcript,
        transport_errors,
        completion_phrase,
        reconcile,
        verifications,
        task_problems,
        progress,
    };
    let (headline, details) = progress_note(&report, &tasks);
    append_progress(
        &ctx.paths.progress_path,
        &ProgressEntry {
            session,
            timestamp: ended_at,
            headline: &headline,
            progress: &report.progress,
            details: &details,
        },
    )?;

    info!(session, progress = %report.progress.summary(), "session finished");
    on_event(&SessionEvent::Finished(&report));
    Ok((report, tasks))
}

fn build_prompt(
    ctx: &SessionContext<'_>,
    state: &RunState,
    tasks: &[Task],
    ledger: &VerificationLedger,
    target: &SessionTarget,
    session: u32,
) -> Result<String> {
    let builder = PromptBuilder::new(ctx.config.prompt_budget_bytes)?;
    let policy = state.policy.clone().unwrap_or_default();
    let tasks_path = format!("{RUN_DIR_NAME}/tasks.json");
    match target {
        SessionTarget::Initialize => builder.build_initializer(&InitializerInputs {
            kind: &state.kind,
            policy: &policy,
            tasks_path: &tasks_path,
        }),
        SessionTarget::Task(id) => {
            let task = find_task(tasks, id)
                .with_context(|| format!("target task '{id}' is not in the task list"))?;
            let completion_phrase = ctx
                .config
                .completion_phrases
                .first()
                .map(String::as_str)
                .unwrap_or(DEFAULT_COMPLETION_PHRASES[0]);
            builder.build_coding(&CodingInputs {
                session,
                kind: &state.kind,
                policy: &policy,
                tasks_path: &tasks_path,
                task,
                tasks,
                progress: &progress(tasks).summary(),
                guidance: ledger.pending_guidance(id),
                completion_phrase,
            })
        }
    }
}

fn progress_note(report: &SessionReport, tasks: &[Task]) -> (String, Vec<String>) {
    let headline = match &report.target {
        SessionTarget::Initialize => format!("Initialization wrote {} tasks.", tasks.len()),
        SessionTarget::Task(id) => {
            let status = find_task(tasks, id).map_or("missing", |t| t.status.as_str());
            format!("Worked on task `{id}` (now {status}).")
        }
    };

    let mut details = Vec::new();
    if report.transport_errors > 0 {
        details.push(format!(
            "{} executor transport error(s) before this session succeeded",
            report.transport_errors
        ));
    }
    for id in &report.reconcile.newly_completed {
        details.push(format!("`{id}` marked completed"));
    }
    for (id, outcome) in &report.verifications {
        details.push(format!("`{id}`: {}", outcome.describe()));
    }
    if !report.reconcile.restored.is_empty() {
        details.push(format!(
            "restored tasks removed by the executor: {}",
            report.reconcile.restored.join(", ")
        ));
    }
    if !report.reconcile.reverted.is_empty() {
        details.push(format!(
            "reverted transitions with unmet dependencies: {}",
            report.reconcile.reverted.join(", ")
        ));
    }
    details.extend(report.task_problems.iter().cloned());
    if report.transcript.tool_denials > 0 {
        details.push(format!(
            "{} of {} tool uses denied",
            report.transcript.tool_denials, report.transcript.tool_uses
        ));
    }
    if let Some(phrase) = &report.completion_phrase {
        details.push(format!("executor declared: \"{phrase}\""));
    }
    (headline, details)
}
