use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use autoloop::auth::{AuthorizationPolicy, Decision, Preset, authorize};
use autoloop::core::run::RunKind;
use autoloop::exit_codes;
use autoloop::io::checks::ShellCheckRunner;
use autoloop::io::config::load_config;
use autoloop::io::executor::{BridgeExecutor, ExecEvent};
use autoloop::io::init::RunPaths;
use autoloop::logging;
use autoloop::looping::{LoopOptions, LoopStop, Selection, run_loop};
use autoloop::session::{SessionEvent, SessionTarget};
use autoloop::start::{StartRequest, start_run};
use autoloop::status::{next_selection, run_status, validate_run};
use autoloop::verify::{VerifyOutcome, verify_and_record};

#[derive(Parser)]
#[command(
    name = "autoloop",
    version,
    about = "Resumable multi-session orchestrator for a code-editing agent"
)]
struct Cli {
    /// Working directory of the run.
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.autoloop/` for a new run, or resume the existing one.
    Start(StartArgs),
    /// Run sessions until the run completes, gets stuck, or hits the bound.
    Run {
        #[arg(long)]
        max_sessions: Option<u32>,
    },
    /// Show phase, progress and blocked tasks.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print what the next session would target.
    Next,
    /// Check state, config and the task file.
    Validate,
    /// Decide whether a shell command would be allowed.
    Authorize {
        #[arg(allow_hyphen_values = true)]
        command: String,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Run verification for one task and record the attempt.
    Verify { task_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Builder,
    Migrator,
    Scaffold,
    Bugfix,
    Feature,
    Refactor,
    PlanExecution,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PresetArg {
    Readonly,
    Dev,
    Full,
}

impl From<PresetArg> for Preset {
    fn from(value: PresetArg) -> Self {
        match value {
            PresetArg::Readonly => Preset::Readonly,
            PresetArg::Dev => Preset::Dev,
            PresetArg::Full => Preset::Full,
        }
    }
}

#[derive(clap::Args, Debug)]
struct PolicyArgs {
    #[arg(long, value_enum, default_value_t = PresetArg::Dev)]
    preset: PresetArg,
    /// Program to allow on top of the preset (repeatable).
    #[arg(long)]
    allow: Vec<String>,
    /// Program or phrase to deny; always wins (repeatable).
    #[arg(long)]
    deny: Vec<String>,
}

impl PolicyArgs {
    fn policy(&self) -> AuthorizationPolicy {
        AuthorizationPolicy::new(self.preset.into())
            .with_allow(self.allow.iter().cloned())
            .with_deny(self.deny.iter().cloned())
    }
}

#[derive(clap::Args, Debug)]
struct StartArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    /// Specification, issue, goal or plan text.
    #[arg(long, conflicts_with = "spec_file")]
    spec: Option<String>,
    #[arg(long)]
    spec_file: Option<PathBuf>,
    #[arg(long)]
    source_dir: Option<PathBuf>,
    #[arg(long)]
    target_dir: Option<PathBuf>,
    /// Technology stack for scaffold runs.
    #[arg(long)]
    stack: Option<String>,
    /// Reproduction steps for bugfix runs.
    #[arg(long)]
    reproduction: Option<String>,
    /// Paths in scope for refactor runs (repeatable).
    #[arg(long)]
    scope: Vec<String>,
    #[command(flatten)]
    policy: PolicyArgs,
    #[arg(long)]
    model: Option<String>,
    /// Discard an existing run of a different kind.
    #[arg(long)]
    force: bool,
}

impl StartArgs {
    fn run_kind(&self) -> Result<RunKind> {
        let text = match (&self.spec, &self.spec_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("read spec file {}", path.display()))?,
            (None, None) => String::new(),
        };
        Ok(match self.kind {
            KindArg::Builder => RunKind::Builder { spec: text },
            KindArg::Feature => RunKind::Feature { spec: text },
            KindArg::Migrator => RunKind::Migrator {
                source_dir: self.source_dir.clone().unwrap_or_default(),
                target_dir: self.target_dir.clone().unwrap_or_default(),
                notes: Some(text).filter(|t| !t.trim().is_empty()),
            },
            KindArg::Scaffold => RunKind::Scaffold {
                description: text,
                stack: self.stack.clone(),
            },
            KindArg::Bugfix => RunKind::Bugfix {
                issue: text,
                reproduction: self.reproduction.clone(),
            },
            KindArg::Refactor => RunKind::Refactor {
                goal: text,
                scope: self.scope.clone(),
            },
            KindArg::PlanExecution => RunKind::PlanExecution { plan: text },
        })
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let dir = std::path::absolute(&cli.dir)
        .with_context(|| format!("resolve {}", cli.dir.display()))?;
    let dir = dir.as_path();
    match cli.command {
        Command::Start(args) => cmd_start(dir, &args),
        Command::Run { max_sessions } => cmd_run(dir, max_sessions),
        Command::Status { json } => cmd_status(dir, json),
        Command::Next => cmd_next(dir),
        Command::Validate => cmd_validate(dir),
        Command::Authorize { command, policy } => Ok(cmd_authorize(&command, &policy)),
        Command::Verify { task_id } => cmd_verify(dir, &task_id),
    }
}

fn cmd_start(dir: &Path, args: &StartArgs) -> Result<i32> {
    let outcome = start_run(
        dir,
        StartRequest {
            kind: args.run_kind()?,
            model: args.model.clone(),
            policy: args.policy.policy(),
            force: args.force,
        },
    )?;
    let verb = if outcome.resumed { "resumed" } else { "started" };
    println!(
        "{verb} {} run in {}",
        outcome.state.kind,
        outcome.paths.run_dir.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_run(dir: &Path, max_sessions: Option<u32>) -> Result<i32> {
    let config = load_config(&RunPaths::new(dir).config_path)?;
    let executor = BridgeExecutor::new(config.executor.command.clone());
    let checks = ShellCheckRunner {
        output_limit_bytes: config.verification.output_limit_bytes,
    };

    let outcome = run_loop(
        dir,
        &executor,
        &checks,
        &LoopOptions { max_sessions },
        print_event,
    )?;

    println!(
        "{} session(s) this invocation; {}",
        outcome.sessions_executed,
        outcome.progress.summary()
    );
    Ok(match outcome.stop {
        LoopStop::Complete { declared } => {
            match declared {
                Some(phrase) => println!("complete (declared: \"{phrase}\")"),
                None => println!("complete"),
            }
            exit_codes::OK
        }
        LoopStop::MaxSessions { max_sessions } => {
            println!("stopped after {max_sessions} session(s); run `autoloop run` to resume");
            exit_codes::INCOMPLETE
        }
        LoopStop::Stuck { blocked } => {
            println!("stuck: no eligible task (blocked: {})", blocked.join(", "));
            exit_codes::STUCK
        }
    })
}

fn print_event(event: &SessionEvent<'_>) {
    match event {
        SessionEvent::Started { session, target } => match target {
            SessionTarget::Initialize => println!("== session {session}: initialize tasks"),
            SessionTarget::Task(id) => println!("== session {session}: task {id}"),
        },
        SessionEvent::Exec(ExecEvent::Text(text)) => println!("{text}"),
        SessionEvent::Exec(ExecEvent::ToolUse { name, decision, .. }) => match decision {
            Decision::Allow => println!("[{name}]"),
            Decision::Deny { reason } => println!("[{name} denied: {reason}]"),
        },
        SessionEvent::Exec(ExecEvent::Result { is_error, text }) => {
            let label = if *is_error { "error" } else { "result" };
            println!("[{label}] {text}");
        }
        SessionEvent::TransportError {
            session,
            attempt,
            error,
        } => eprintln!("session {session} transport error (attempt {attempt}): {error}"),
        SessionEvent::Finished(report) => {
            for (id, outcome) in &report.verifications {
                println!("   {id}: {}", outcome.describe());
            }
            println!("== session {} done: {}", report.session, report.progress.summary());
        }
    }
}

fn cmd_status(dir: &Path, json: bool) -> Result<i32> {
    let report = run_status(dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(exit_codes::OK)
}

fn cmd_next(dir: &Path) -> Result<i32> {
    Ok(match next_selection(dir)? {
        Selection::Next(SessionTarget::Initialize) => {
            println!("initialize");
            exit_codes::OK
        }
        Selection::Next(SessionTarget::Task(id)) => {
            println!("{id}");
            exit_codes::OK
        }
        Selection::Complete => {
            println!("complete");
            exit_codes::INCOMPLETE
        }
        Selection::Stuck { blocked } => {
            println!("stuck (blocked: {})", blocked.join(", "));
            exit_codes::STUCK
        }
    })
}

fn cmd_validate(dir: &Path) -> Result<i32> {
    let problems = validate_run(dir)?;
    if problems.is_empty() {
        println!("ok");
        return Ok(exit_codes::OK);
    }
    for problem in &problems {
        println!("- {problem}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_authorize(command: &str, args: &PolicyArgs) -> i32 {
    match authorize(command, &args.policy()) {
        Decision::Allow => {
            println!("allow");
            exit_codes::OK
        }
        Decision::Deny { reason } => {
            println!("deny: {reason}");
            exit_codes::DENIED
        }
    }
}

fn cmd_verify(dir: &Path, task_id: &str) -> Result<i32> {
    let paths = RunPaths::new(dir);
    let config = load_config(&paths.config_path)?;
    let checks = ShellCheckRunner {
        output_limit_bytes: config.verification.output_limit_bytes,
    };
    let outcome = verify_and_record(&paths, &config, &checks, task_id)?;
    println!("{task_id}: {}", outcome.describe());
    Ok(match outcome {
        VerifyOutcome::Skipped | VerifyOutcome::Passed { .. } => exit_codes::OK,
        VerifyOutcome::Failed { guidance, .. } => {
            println!("{guidance}");
            exit_codes::INCOMPLETE
        }
        VerifyOutcome::Blocked { guidance, .. } => {
            println!("{guidance}");
            exit_codes::STUCK
        }
    })
}
