//! Executor abstraction for agent sessions.
//!
//! The [`Executor`] trait decouples the session loop from the agent backend.
//! [`BridgeExecutor`] talks to an external bridge process over JSON lines;
//! tests use scripted executors that replay predetermined events.
//!
//! Bridge protocol:
//! - autoloop writes one `{"type":"session", ...}` line to the bridge's stdin;
//! - the bridge writes `text`, `tool_use` and `result` lines to stdout
//!   (non-JSON lines are treated as text);
//! - every `tool_use` is answered on stdin with a `tool_decision` line.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::auth::{Decision, ToolAuthorizer};
use crate::io::process::{join_output, read_stream_limited};
use crate::io::sandbox::SandboxDeclaration;

/// Parameters for one executor session.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub session: u32,
    pub workdir: PathBuf,
    pub prompt: String,
    pub model: Option<String>,
    pub sandbox: SandboxDeclaration,
    /// Wall-clock budget for the whole session.
    pub timeout: Duration,
    /// Transcript text beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

/// Something the executor did, forwarded to observers as it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
        decision: Decision,
    },
    Result {
        is_error: bool,
        text: String,
    },
}

/// Accumulated view of a finished session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub result: Option<String>,
    pub is_error: bool,
    pub tool_uses: usize,
    pub tool_denials: usize,
    pub truncated_bytes: usize,
}

impl Transcript {
    pub fn record(&mut self, event: &ExecEvent, limit: usize) {
        let line = match event {
            ExecEvent::Text(text) => text.clone(),
            ExecEvent::ToolUse {
                name,
                input,
                decision,
                ..
            } => {
                self.tool_uses += 1;
                match decision {
                    Decision::Allow => format!("[tool {name}] {input}"),
                    Decision::Deny { reason } => {
                        self.tool_denials += 1;
                        format!("[tool {name} denied: {reason}] {input}")
                    }
                }
            }
            ExecEvent::Result { is_error, text } => {
                self.is_error = *is_error;
                self.result = Some(text.clone());
                if *is_error {
                    format!("[result error] {text}")
                } else {
                    format!("[result] {text}")
                }
            }
        };
        self.push_bounded(&line, limit);
    }

    fn push_bounded(&mut self, line: &str, limit: usize) {
        let needed = line.len() + 1;
        let remaining = limit.saturating_sub(self.text.len());
        if needed <= remaining {
            self.text.push_str(line);
            self.text.push('\n');
        } else {
            self.truncated_bytes += needed;
        }
    }

    /// Everything the executor said, for completion-phrase detection.
    pub fn narration(&self) -> String {
        match &self.result {
            Some(result) => format!("{}\n{}", self.text, result),
            None => self.text.clone(),
        }
    }
}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Run one session. Tool uses are decided by `authorizer`; events are
    /// forwarded to `on_event` as they arrive. `Err` means a transport failure.
    fn exec(
        &self,
        request: &ExecRequest,
        authorizer: &dyn ToolAuthorizer,
        on_event: &mut dyn FnMut(&ExecEvent),
    ) -> Result<Transcript>;
}

/// A line the bridge writes to stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        text: String,
    },
}

/// Parse one stdout line. Anything that is not a known message is text.
pub fn parse_bridge_line(line: &str) -> BridgeMessage {
    serde_json::from_str(line).unwrap_or_else(|_| BridgeMessage::Text {
        text: line.to_string(),
    })
}

#[derive(Debug, Serialize)]
struct ToolDecisionLine<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    behavior: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Wire form of a decision.
pub fn decision_line(id: &str, decision: &Decision) -> Result<String> {
    let line = ToolDecisionLine {
        kind: "tool_decision",
        id,
        behavior: if decision.is_allowed() { "allow" } else { "deny" },
        message: decision.reason(),
    };
    serde_json::to_string(&line).context("serialize tool decision")
}

fn session_line(request: &ExecRequest) -> Result<String> {
    serde_json::to_string(&json!({
        "type": "session",
        "session": request.session,
        "prompt": request.prompt,
        "model": request.model,
        "workdir": request.workdir,
        "sandbox": request.sandbox,
    }))
    .context("serialize session line")
}

/// Executor that spawns a bridge command speaking the JSON-lines protocol.
#[derive(Debug, Clone)]
pub struct BridgeExecutor {
    pub command: Vec<String>,
}

impl BridgeExecutor {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Executor for BridgeExecutor {
    #[instrument(skip_all, fields(session = request.session, timeout_secs = request.timeout.as_secs()))]
    fn exec(
        &self,
        request: &ExecRequest,
        authorizer: &dyn ToolAuthorizer,
        on_event: &mut dyn FnMut(&ExecEvent),
    ) -> Result<Transcript> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("executor command is empty"))?;
        info!(program = %program, workdir = %request.workdir.display(), "starting executor bridge");

        let deadline = Instant::now() + request.timeout;
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn executor bridge {program}"))?;

        let mut stdin: Option<ChildStdin> = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let (tx, rx) = mpsc::channel::<std::io::Result<String>>();
        let stdout_handle = thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr_limit = request.output_limit_bytes;
        let stderr_handle = thread::spawn(move || read_stream_limited(stderr, stderr_limit));

        let outcome = drive_session(request, authorizer, on_event, &mut stdin, &rx, deadline);
        // Closing stdin tells the bridge no more decisions are coming.
        drop(stdin.take());

        let outcome = match outcome {
            Ok(transcript) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match child.wait_timeout(remaining).context("wait for bridge")? {
                    Some(status) => Ok((transcript, status)),
                    None => Err(anyhow!("bridge did not exit after its result")),
                }
            }
            Err(err) => Err(err),
        };

        let (transcript, status) = match outcome {
            Ok(done) => done,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "executor session failed, killing bridge");
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout_handle.join();
                return Err(err);
            }
        };

        let _ = stdout_handle.join();
        let stderr_text = join_output(stderr_handle)
            .map(|(bytes, _)| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        if !status.success() && transcript.result.is_none() {
            bail!(
                "executor bridge exited with status {:?}: {}",
                status.code(),
                stderr_text.trim()
            );
        }
        debug!(
            tool_uses = transcript.tool_uses,
            tool_denials = transcript.tool_denials,
            is_error = transcript.is_error,
            "executor session finished"
        );
        Ok(transcript)
    }
}

fn drive_session(
    request: &ExecRequest,
    authorizer: &dyn ToolAuthorizer,
    on_event: &mut dyn FnMut(&ExecEvent),
    stdin: &mut Option<ChildStdin>,
    rx: &mpsc::Receiver<std::io::Result<String>>,
    deadline: Instant,
) -> Result<Transcript> {
    let mut transcript = Transcript::default();
    send_line(stdin, &session_line(request)?);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let line = match rx.recv_timeout(remaining) {
            Ok(line) => line.context("read bridge stdout")?,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                bail!("executor session timed out after {:?}", request.timeout)
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match parse_bridge_line(&line) {
            BridgeMessage::Text { text } => ExecEvent::Text(text),
            BridgeMessage::ToolUse { id, name, input } => {
                let decision = authorizer.authorize_tool(&name, &input);
                debug!(tool = %name, allowed = decision.is_allowed(), "tool decision");
                send_line(stdin, &decision_line(&id, &decision)?);
                ExecEvent::ToolUse {
                    id,
                    name,
                    input,
                    decision,
                }
            }
            BridgeMessage::Result { is_error, text } => {
                // No decisions follow a result.
                drop(stdin.take());
                ExecEvent::Result { is_error, text }
            }
        };
        transcript.record(&event, request.output_limit_bytes);
        on_event(&event);
    }
    Ok(transcript)
}

/// Write one line to the bridge. A bridge that already closed stdin has exited
/// or is about to; its exit status is the error worth reporting, so the pipe is
/// just dropped here.
fn send_line(stdin: &mut Option<ChildStdin>, line: &str) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let written = writeln!(pipe, "{line}").and_then(|()| pipe.flush());
    if let Err(err) = written {
        warn!(err = %err, "bridge stdin closed");
        drop(stdin.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationPolicy, Preset, ToolGate};

    #[test]
    fn parses_known_messages_and_falls_back_to_text() {
        assert_eq!(
            parse_bridge_line(r#"{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}"#),
            BridgeMessage::ToolUse {
                id: "t1".to_string(),
                name: "Bash".to_string(),
                input: json!({"command": "ls"}),
            }
        );
        assert_eq!(
            parse_bridge_line(r#"{"type":"result","text":"done"}"#),
            BridgeMessage::Result {
                is_error: false,
                text: "done".to_string()
            }
        );
        assert_eq!(
            parse_bridge_line("plain progress output"),
            BridgeMessage::Text {
                text: "plain progress output".to_string()
            }
        );
        assert_eq!(
            parse_bridge_line(r#"{"type":"usage","tokens":3}"#),
            BridgeMessage::Text {
                text: r#"{"type":"usage","tokens":3}"#.to_string()
            }
        );
    }

    #[test]
    fn decision_line_wire_format() {
        let allow: Value =
            serde_json::from_str(&decision_line("a", &Decision::Allow).expect("line")).expect("json");
        assert_eq!(allow, json!({"type": "tool_decision", "id": "a", "behavior": "allow"}));

        let deny: Value = serde_json::from_str(
            &decision_line("b", &Decision::deny("not permitted")).expect("line"),
        )
        .expect("json");
        assert_eq!(deny["behavior"], "deny");
        assert_eq!(deny["message"], "not permitted");
    }

    #[test]
    fn transcript_counts_denials_and_bounds_text() {
        let mut transcript = Transcript::default();
        transcript.record(&ExecEvent::Text("hello".to_string()), 20);
        transcript.record(
            &ExecEvent::ToolUse {
                id: "1".to_string(),
                name: "Bash".to_string(),
                input: json!({"command": "rm -rf /"}),
                decision: Decision::deny("blocked"),
            },
            20,
        );
        transcript.record(
            &ExecEvent::Result {
                is_error: false,
                text: "All tasks complete".to_string(),
            },
            20,
        );
        assert_eq!(transcript.text, "hello\n");
        assert_eq!(transcript.tool_uses, 1);
        assert_eq!(transcript.tool_denials, 1);
        assert!(transcript.truncated_bytes > 0);
        assert!(transcript.narration().contains("All tasks complete"));
    }

    #[cfg(unix)]
    fn bridge_request(workdir: &std::path::Path, timeout: Duration) -> ExecRequest {
        ExecRequest {
            session: 1,
            workdir: workdir.to_path_buf(),
            prompt: "work".to_string(),
            model: None,
            sandbox: SandboxDeclaration::for_run(workdir, &[], Preset::Dev),
            timeout,
            output_limit_bytes: 10_000,
        }
    }

    #[cfg(unix)]
    #[test]
    fn bridge_round_trip_answers_tool_use() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Reads the session line, asks for one tool, echoes the decision back as text.
        let script = r#"read session
echo "starting"
echo '{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"rm -rf /"}}'
read decision
echo "got $decision"
echo '{"type":"result","is_error":false,"text":"all tasks complete"}'
"#;
        let executor = BridgeExecutor::new(vec!["sh".into(), "-c".into(), script.into()]);
        let gate = ToolGate::new(AuthorizationPolicy::new(Preset::Dev), temp.path());
        let mut events = Vec::new();
        let transcript = executor
            .exec(
                &bridge_request(temp.path(), Duration::from_secs(20)),
                &gate,
                &mut |event| events.push(event.clone()),
            )
            .expect("exec");

        assert_eq!(transcript.tool_denials, 1);
        assert_eq!(transcript.result.as_deref(), Some("all tasks complete"));
        assert!(transcript.text.contains(r#""behavior":"deny""#));
        assert_eq!(events.len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn bridge_failure_without_result_is_transport_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = BridgeExecutor::new(vec![
            "sh".into(),
            "-c".into(),
            "echo 'bridge unavailable' >&2; exit 2".into(),
        ]);
        let gate = ToolGate::new(AuthorizationPolicy::new(Preset::Dev), temp.path());
        let err = executor
            .exec(
                &bridge_request(temp.path(), Duration::from_secs(20)),
                &gate,
                &mut |_| {},
            )
            .unwrap_err();
        assert!(err.to_string().contains("bridge unavailable"), "{err:#}");
    }

    #[cfg(unix)]
    #[test]
    fn bridge_timeout_is_transport_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = BridgeExecutor::new(vec!["sh".into(), "-c".into(), "exec sleep 5".into()]);
        let gate = ToolGate::new(AuthorizationPolicy::new(Preset::Dev), temp.path());
        let err = executor
            .exec(
                &bridge_request(temp.path(), Duration::from_millis(300)),
                &gate,
                &mut |_| {},
            )
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err:#}");
    }
}
