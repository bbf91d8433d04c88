//! Test-only builders, scripted doubles and a started-run fixture.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::auth::{AuthorizationPolicy, Preset, ToolAuthorizer};
use crate::core::run::RunKind;
use crate::core::task::Task;
use crate::io::checks::{CheckOutput, CheckRunner};
use crate::io::config::{LoopConfig, load_config, write_config};
use crate::io::executor::{ExecEvent, ExecRequest, Executor, Transcript};
use crate::io::init::RunPaths;
use crate::io::run_state::{RunState, load_run_state, write_run_state};
use crate::io::task_store::{load_tasks_or_empty, write_tasks};
use crate::io::verification_store::{VerificationLedger, load_ledger_or_default};
use crate::start::{StartRequest, start_run};

/// Pending task with a deterministic description.
pub fn task(id: &str, dependencies: &[&str]) -> Task {
    Task::new(id, format!("{id} description")).with_dependencies(dependencies.iter().copied())
}

pub fn check_pass(output: &str) -> CheckOutput {
    CheckOutput {
        success: true,
        timed_out: false,
        output: output.to_string(),
    }
}

pub fn check_fail(output: &str) -> CheckOutput {
    CheckOutput {
        success: false,
        timed_out: false,
        output: output.to_string(),
    }
}

/// Replays check outputs in order and records the commands it was asked to run.
#[derive(Debug, Default)]
pub struct ScriptedCheckRunner {
    script: RefCell<VecDeque<CheckOutput>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedCheckRunner {
    pub fn new(script: Vec<CheckOutput>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CheckRunner for ScriptedCheckRunner {
    fn run_check(&self, command: &str, _workdir: &Path, _timeout: Duration) -> Result<CheckOutput> {
        self.calls.borrow_mut().push(command.to_string());
        self.script
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted check output left for `{command}`"))
    }
}

/// What one scripted executor session does.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    pub tool_uses: Vec<(String, Value)>,
    pub text: Vec<String>,
    pub result: Option<String>,
    /// Replaces `tasks.json` before the session ends, as the agent would.
    pub tasks: Option<Vec<Task>>,
    pub transport_error: Option<String>,
}

impl ScriptedSession {
    pub fn reply(text: &str) -> Self {
        Self {
            text: vec![text.to_string()],
            result: Some("done".to_string()),
            ..Self::default()
        }
    }

    pub fn transport_error(message: &str) -> Self {
        Self {
            transport_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn writing_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_tool(mut self, name: &str, input: Value) -> Self {
        self.tool_uses.push((name.to_string(), input));
        self
    }
}

/// Executor double: replays sessions in order and asks the authorizer about
/// every scripted tool use.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    sessions: RefCell<VecDeque<ScriptedSession>>,
    requests: RefCell<Vec<ExecRequest>>,
    events: RefCell<Vec<ExecEvent>>,
}

impl ScriptedExecutor {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: RefCell::new(sessions.into()),
            ..Self::default()
        }
    }

    /// Every request received, including ones that failed in transport.
    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.borrow().clone()
    }

    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.sessions.borrow().len()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(
        &self,
        request: &ExecRequest,
        authorizer: &dyn ToolAuthorizer,
        on_event: &mut dyn FnMut(&ExecEvent),
    ) -> Result<Transcript> {
        self.requests.borrow_mut().push(request.clone());
        let session = self
            .sessions
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted session left for session {}", request.session))?;
        if let Some(message) = session.transport_error {
            return Err(anyhow!(message));
        }

        let mut transcript = Transcript::default();
        let mut emit = |event: ExecEvent| {
            transcript.record(&event, request.output_limit_bytes);
            on_event(&event);
            self.events.borrow_mut().push(event);
        };

        for (i, (name, input)) in session.tool_uses.into_iter().enumerate() {
            let decision = authorizer.authorize_tool(&name, &input);
            emit(ExecEvent::ToolUse {
                id: format!("tool-{i}"),
                name,
                input,
                decision,
            });
        }
        for text in session.text {
            emit(ExecEvent::Text(text));
        }
        if let Some(tasks) = &session.tasks {
            write_tasks(&RunPaths::new(&request.workdir).tasks_path, tasks)?;
        }
        if let Some(result) = session.result {
            emit(ExecEvent::Result {
                is_error: false,
                text: result,
            });
        }
        Ok(transcript)
    }
}

/// A started builder run in a temp directory with zero delays.
pub struct TestRun {
    pub dir: TempDir,
    pub paths: RunPaths,
}

impl TestRun {
    pub fn builder(spec: &str) -> Self {
        Self::start(
            RunKind::Builder {
                spec: spec.to_string(),
            },
            Preset::Dev,
        )
    }

    pub fn start(kind: RunKind, preset: Preset) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let outcome = start_run(
            dir.path(),
            StartRequest {
                kind,
                model: None,
                policy: AuthorizationPolicy::new(preset),
                force: false,
            },
        )
        .expect("start run");
        let run = Self {
            dir,
            paths: outcome.paths,
        };
        run.update_config(|config| {
            config.session_delay_secs = 0;
            config.error_backoff_secs = 0;
        });
        run
    }

    pub fn workdir(&self) -> &Path {
        self.dir.path()
    }

    pub fn update_config(&self, edit: impl FnOnce(&mut LoopConfig)) {
        let mut config = self.config();
        edit(&mut config);
        write_config(&self.paths.config_path, &config).expect("write config");
    }

    pub fn config(&self) -> LoopConfig {
        load_config(&self.paths.config_path).expect("load config")
    }

    pub fn state(&self) -> RunState {
        load_run_state(&self.paths.state_path).expect("load state")
    }

    /// Write `tasks` and mark the run initialized, skipping the first session.
    pub fn seed_tasks(&self, tasks: &[Task]) {
        write_tasks(&self.paths.tasks_path, tasks).expect("write tasks");
        let mut state = self.state();
        state.initialized = true;
        write_run_state(&self.paths.state_path, &state).expect("write state");
    }

    pub fn tasks(&self) -> Vec<Task> {
        load_tasks_or_empty(&self.paths.tasks_path)
    }

    pub fn ledger(&self) -> VerificationLedger {
        load_ledger_or_default(&self.paths.verification_path)
    }
}
