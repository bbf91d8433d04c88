//! Verification retry controller.
//!
//! Runs a task's behavior check and the configured quality checks, records
//! the attempt in the ledger and decides what happens to the task. After
//! [`MAX_VERIFICATION_ATTEMPTS`] failed attempts no further check is run and
//! the task stays blocked.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{info, warn};

use crate::core::task::{Task, TaskStatus, find_task_mut};
use crate::core::verification::{
    Failure, FailureKind, MAX_VERIFICATION_ATTEMPTS, TestOutcome, VerificationRecord,
    classify_outcome, synthesize_guidance,
};
use crate::io::checks::CheckRunner;
use crate::io::config::{LoopConfig, VerificationConfig};
use crate::io::init::RunPaths;
use crate::io::task_store::{load_tasks, write_tasks};
use crate::io::verification_store::{VerificationLedger, load_ledger_or_default, write_ledger};

/// What verification decided for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The task has no verification command.
    Skipped,
    Passed { attempt: u32 },
    /// Failed below the ceiling; the task goes back to `pending`.
    Failed { attempt: u32, guidance: String },
    /// The ceiling is reached; the task is `blocked`.
    Blocked { attempts: u32, guidance: String },
}

impl VerifyOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, VerifyOutcome::Skipped | VerifyOutcome::Passed { .. })
    }

    /// Short label for progress notes.
    pub fn describe(&self) -> String {
        match self {
            VerifyOutcome::Skipped => "no verification command".to_string(),
            VerifyOutcome::Passed { attempt } => format!("verified on attempt {attempt}"),
            VerifyOutcome::Failed { attempt, .. } => {
                format!("verification failed (attempt {attempt}/{MAX_VERIFICATION_ATTEMPTS})")
            }
            VerifyOutcome::Blocked { attempts, .. } => {
                format!("blocked after {attempts} failed verification attempts")
            }
        }
    }
}

/// Where and how checks run.
pub struct VerifyContext<'a> {
    pub workdir: &'a Path,
    pub config: &'a VerificationConfig,
    pub checks: &'a dyn CheckRunner,
}

/// Verify `task`, appending the attempt to `ledger`.
///
/// Never fails: a check that cannot be spawned counts as a failed check.
pub fn verify_task(
    task: &Task,
    ledger: &mut VerificationLedger,
    ctx: &VerifyContext<'_>,
    now: DateTime<Utc>,
) -> VerifyOutcome {
    let Some(command) = task.verification_command.as_deref() else {
        return VerifyOutcome::Skipped;
    };

    if ledger.is_exhausted(&task.id) {
        return match ledger.latest(&task.id) {
            Some(record) if record.passed() => VerifyOutcome::Passed {
                attempt: record.attempt,
            },
            latest => VerifyOutcome::Blocked {
                attempts: ledger.attempts(&task.id),
                guidance: latest.map(|r| r.guidance.clone()).unwrap_or_default(),
            },
        };
    }

    let attempt = ledger.next_attempt(&task.id);
    let mut failures = Vec::new();

    let (behavior_passed, outcome) = run_behavior_check(
        command,
        task.verification_pattern.as_deref(),
        ctx,
        &mut failures,
    );
    let quality_passed = run_quality_checks(ctx, &mut failures);

    let guidance = synthesize_guidance(
        &task.id,
        attempt,
        outcome,
        &failures,
        ctx.config.guidance_max_lines,
    );
    let record = VerificationRecord {
        task_id: task.id.clone(),
        attempt,
        behavior_passed,
        quality_passed,
        outcome,
        failures,
        guidance: guidance.clone(),
        timestamp: now,
    };
    let passed = record.passed();
    ledger.push(record);

    info!(task_id = %task.id, attempt, behavior_passed, quality_passed, outcome = outcome.as_str(), "verification attempt recorded");

    if passed {
        VerifyOutcome::Passed { attempt }
    } else if attempt >= MAX_VERIFICATION_ATTEMPTS {
        warn!(task_id = %task.id, attempts = attempt, "verification ceiling reached");
        VerifyOutcome::Blocked {
            attempts: attempt,
            guidance,
        }
    } else {
        VerifyOutcome::Failed { attempt, guidance }
    }
}

fn run_behavior_check(
    command: &str,
    pattern: Option<&str>,
    ctx: &VerifyContext<'_>,
    failures: &mut Vec<Failure>,
) -> (bool, TestOutcome) {
    let timeout = ctx.config.test_timeout();
    let output = match ctx.checks.run_check(command, ctx.workdir, timeout) {
        Ok(output) => output,
        Err(err) => {
            failures.push(Failure {
                kind: FailureKind::Test,
                summary: format!("could not run `{command}`: {err:#}"),
                output: None,
            });
            return (false, TestOutcome::None);
        }
    };

    if output.timed_out {
        failures.push(Failure {
            kind: FailureKind::Test,
            summary: format!("`{command}` timed out after {}s", timeout.as_secs()),
            output: Some(output.output),
        });
        return (false, TestOutcome::None);
    }

    let mut passed = output.success;
    let mut summary = format!("`{command}` exited unsuccessfully");
    if let (true, Some(pattern)) = (passed, pattern) {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(&output.output) => {}
            Ok(_) => {
                passed = false;
                summary = format!("output of `{command}` did not match /{pattern}/");
            }
            Err(err) => {
                passed = false;
                summary = format!("invalid success pattern /{pattern}/: {err}");
            }
        }
    }

    let outcome = classify_outcome(passed, &output.output);
    if !passed {
        failures.push(Failure {
            kind: FailureKind::Test,
            summary,
            output: Some(output.output),
        });
    }
    (passed, outcome)
}

fn run_quality_checks(ctx: &VerifyContext<'_>, failures: &mut Vec<Failure>) -> bool {
    let timeout = ctx.config.build_timeout();
    let mut all_passed = true;
    for check in &ctx.config.quality {
        let failure = match ctx.checks.run_check(&check.command, ctx.workdir, timeout) {
            Ok(output) if output.success => None,
            Ok(output) if output.timed_out => Some(Failure {
                kind: check.kind,
                summary: format!("`{}` timed out after {}s", check.command, timeout.as_secs()),
                output: Some(output.output),
            }),
            Ok(output) => Some(Failure {
                kind: check.kind,
                summary: format!("`{}` failed", check.command),
                output: Some(output.output),
            }),
            Err(err) => Some(Failure {
                kind: check.kind,
                summary: format!("could not run `{}`: {err:#}", check.command),
                output: None,
            }),
        };
        if let Some(failure) = failure {
            all_passed = false;
            failures.push(failure);
        }
    }
    all_passed
}

/// Apply the runner-owned status transition for `outcome`.
pub fn apply_outcome(task: &mut Task, outcome: &VerifyOutcome) {
    match outcome {
        VerifyOutcome::Skipped | VerifyOutcome::Passed { .. } => {}
        VerifyOutcome::Failed { .. } => {
            task.status = TaskStatus::Pending;
            task.completed_at = None;
        }
        VerifyOutcome::Blocked { .. } => {
            task.status = TaskStatus::Blocked;
            task.completed_at = None;
        }
    }
}

/// `autoloop verify <task-id>`: verify one task outside the loop and persist
/// the ledger and task list.
pub fn verify_and_record(
    paths: &RunPaths,
    config: &LoopConfig,
    checks: &dyn CheckRunner,
    task_id: &str,
) -> Result<VerifyOutcome> {
    let mut tasks = load_tasks(&paths.tasks_path).context("load tasks.json")?;
    let mut ledger = load_ledger_or_default(&paths.verification_path);
    let ctx = VerifyContext {
        workdir: &paths.workdir,
        config: &config.verification,
        checks,
    };

    let task = find_task_mut(&mut tasks, task_id)
        .ok_or_else(|| anyhow!("unknown task id '{task_id}'"))?;
    let outcome = verify_task(task, &mut ledger, &ctx, Utc::now());
    if outcome == VerifyOutcome::Skipped {
        return Ok(outcome);
    }
    apply_outcome(task, &outcome);

    write_ledger(&paths.verification_path, &ledger).context("write verification.json")?;
    write_tasks(&paths.tasks_path, &tasks).context("write tasks.json")?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::checks::CheckOutput;
    use crate::io::config::QualityCheck;
    use crate::test_support::{ScriptedCheckRunner, check_fail, check_pass, task};

    fn verifiable(id: &str) -> Task {
        task(id, &[])
            .with_status(TaskStatus::Completed)
            .with_verification("cargo test")
    }

    fn run(
        task: &Task,
        ledger: &mut VerificationLedger,
        config: &VerificationConfig,
        checks: &ScriptedCheckRunner,
    ) -> VerifyOutcome {
        let ctx = VerifyContext {
            workdir: Path::new("."),
            config,
            checks,
        };
        verify_task(task, ledger, &ctx, Utc::now())
    }

    #[test]
    fn task_without_command_is_skipped() {
        let checks = ScriptedCheckRunner::default();
        let mut ledger = VerificationLedger::default();
        let outcome = run(&task("a", &[]), &mut ledger, &VerificationConfig::default(), &checks);
        assert_eq!(outcome, VerifyOutcome::Skipped);
        assert!(ledger.is_empty());
        assert!(checks.calls().is_empty());
    }

    #[test]
    fn passing_check_records_attempt() {
        let checks = ScriptedCheckRunner::new(vec![check_pass("test result: ok. 4 passed")]);
        let mut ledger = VerificationLedger::default();
        let outcome = run(&verifiable("a"), &mut ledger, &VerificationConfig::default(), &checks);
        assert_eq!(outcome, VerifyOutcome::Passed { attempt: 1 });
        assert!(ledger.latest("a").expect("record").passed());
    }

    #[test]
    fn failed_attempt_carries_guidance() {
        let checks = ScriptedCheckRunner::new(vec![check_fail(
            "error[E0425]: cannot find value `x` in this scope",
        )]);
        let mut ledger = VerificationLedger::default();
        let outcome = run(&verifiable("a"), &mut ledger, &VerificationConfig::default(), &checks);

        let VerifyOutcome::Failed { attempt, guidance } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(attempt, 1);
        assert!(guidance.contains("E0425"));
        assert_eq!(
            ledger.latest("a").expect("record").outcome,
            TestOutcome::CompilationError
        );
    }

    #[test]
    fn third_failure_blocks_and_fourth_never_runs() {
        let checks = ScriptedCheckRunner::new(vec![
            check_fail("assertion failed"),
            check_fail("assertion failed"),
            check_fail("assertion failed"),
        ]);
        let mut ledger = VerificationLedger::default();
        let config = VerificationConfig::default();
        let task = verifiable("a");

        assert!(matches!(run(&task, &mut ledger, &config, &checks), VerifyOutcome::Failed { attempt: 1, .. }));
        assert!(matches!(run(&task, &mut ledger, &config, &checks), VerifyOutcome::Failed { attempt: 2, .. }));
        assert!(matches!(run(&task, &mut ledger, &config, &checks), VerifyOutcome::Blocked { attempts: 3, .. }));

        let outcome = run(&task, &mut ledger, &config, &checks);
        assert!(matches!(outcome, VerifyOutcome::Blocked { attempts: 3, .. }));
        assert_eq!(checks.calls().len(), 3);
        assert_eq!(ledger.attempts("a"), 3);
    }

    #[test]
    fn pattern_must_match_output() {
        let checks = ScriptedCheckRunner::new(vec![check_pass("0 passed")]);
        let mut ledger = VerificationLedger::default();
        let mut task = verifiable("a");
        task.verification_pattern = Some(r"[1-9]\d* passed".to_string());

        let outcome = run(&task, &mut ledger, &VerificationConfig::default(), &checks);
        assert!(matches!(outcome, VerifyOutcome::Failed { .. }));
        let record = ledger.latest("a").expect("record");
        assert!(!record.behavior_passed);
        assert!(record.failures[0].summary.contains("did not match"));
    }

    #[test]
    fn timeout_is_a_failed_attempt() {
        let checks = ScriptedCheckRunner::new(vec![CheckOutput {
            success: false,
            timed_out: true,
            output: "[timed out]".to_string(),
        }]);
        let mut ledger = VerificationLedger::default();
        let outcome = run(&verifiable("a"), &mut ledger, &VerificationConfig::default(), &checks);
        assert!(matches!(outcome, VerifyOutcome::Failed { .. }));
        let record = ledger.latest("a").expect("record");
        assert_eq!(record.outcome, TestOutcome::None);
        assert!(record.failures[0].summary.contains("timed out"));
    }

    #[test]
    fn quality_failure_fails_attempt_independently() {
        let checks = ScriptedCheckRunner::new(vec![
            check_pass("ok"),
            check_fail("warning: unused variable: `y`"),
        ]);
        let config = VerificationConfig {
            quality: vec![QualityCheck {
                kind: FailureKind::Lint,
                command: "cargo clippy".to_string(),
            }],
            ..VerificationConfig::default()
        };
        let mut ledger = VerificationLedger::default();
        let outcome = run(&verifiable("a"), &mut ledger, &config, &checks);

        assert!(matches!(outcome, VerifyOutcome::Failed { .. }));
        let record = ledger.latest("a").expect("record");
        assert!(record.behavior_passed);
        assert!(!record.quality_passed);
        assert_eq!(checks.calls(), vec!["cargo test", "cargo clippy"]);
    }

    #[test]
    fn apply_outcome_moves_status() {
        let mut t = verifiable("a");
        t.completed_at = Some(Utc::now());
        apply_outcome(
            &mut t,
            &VerifyOutcome::Failed {
                attempt: 1,
                guidance: String::new(),
            },
        );
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.completed_at.is_none());

        apply_outcome(
            &mut t,
            &VerifyOutcome::Blocked {
                attempts: 3,
                guidance: String::new(),
            },
        );
        assert_eq!(t.status, TaskStatus::Blocked);
    }
}
