//! Tool-authorization callback handed to the executor.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tracing::info;

use crate::auth::policy::{AuthorizationPolicy, Decision, authorize};

const READ_TOOLS: &[&str] = &["Read", "Grep", "Glob", "LS"];
const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];
const SHELL_TOOL: &str = "Bash";

/// Decides whether the executor may use a tool with the given input.
pub trait ToolAuthorizer {
    fn authorize_tool(&self, tool: &str, input: &Value) -> Decision;
}

/// Policy-backed authorizer scoped to one working directory.
#[derive(Debug, Clone)]
pub struct ToolGate {
    policy: AuthorizationPolicy,
    workdir: PathBuf,
}

impl ToolGate {
    pub fn new(policy: AuthorizationPolicy, workdir: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            workdir: workdir.into(),
        }
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    fn authorize_write(&self, tool: &str, input: &Value) -> Decision {
        if !self.policy.preset.allows_writes() {
            return Decision::deny(format!(
                "{tool} is not permitted under preset '{}'",
                self.policy.preset
            ));
        }
        let Some(target) = ["file_path", "notebook_path", "path"]
            .iter()
            .find_map(|key| input.get(key).and_then(Value::as_str))
        else {
            return Decision::deny(format!("{tool} input has no target path"));
        };
        if is_within(&self.workdir, Path::new(target)) {
            Decision::Allow
        } else {
            Decision::deny(format!(
                "{tool} target '{target}' is outside the working directory"
            ))
        }
    }
}

impl ToolAuthorizer for ToolGate {
    fn authorize_tool(&self, tool: &str, input: &Value) -> Decision {
        let decision = if READ_TOOLS.contains(&tool) {
            Decision::Allow
        } else if tool == SHELL_TOOL {
            match input.get("command").and_then(Value::as_str) {
                Some(command) => authorize(command, &self.policy),
                None => Decision::deny("Bash input has no command"),
            }
        } else if WRITE_TOOLS.contains(&tool) {
            self.authorize_write(tool, input)
        } else {
            Decision::deny(format!("unknown tool '{tool}'"))
        };
        if let Decision::Deny { reason } = &decision {
            info!(tool, reason = %reason, "tool use denied");
        }
        decision
    }
}

/// Lexical containment check; the target need not exist yet.
fn is_within(root: &Path, target: &Path) -> bool {
    let joined = if target.is_absolute() {
        target.to_path_buf()
    } else {
        root.join(target)
    };
    match (normalize(root), normalize(&joined)) {
        (Some(root), Some(target)) => target.starts_with(root),
        _ => false,
    }
}

/// Resolve `.` and `..` without touching the filesystem. `None` when `..` escapes the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
