//! Task model for the orchestrated task graph.
//!
//! The task list is written by the executor during the initializer session and
//! edited directly on disk by later sessions. The runner re-reads it at every
//! session boundary, so these types must round-trip whatever the executor
//! writes without losing fields it does not understand.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// True when dependents may start. A skipped prerequisite counts as satisfied.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    /// True for statuses that require every dependency to be satisfied first.
    pub fn requires_dependencies(self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of dependency-ordered work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Fields written by the executor that the runner does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            verification_command: None,
            verification_pattern: None,
            completed_at: None,
            notes: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_verification(mut self, command: impl Into<String>) -> Self {
        self.verification_command = Some(command.into());
        self
    }
}

/// Look up a task by id.
pub fn find_task<'a>(tasks: &'a [Task], id: &str) -> Option<&'a Task> {
    tasks.iter().find(|task| task.id == id)
}

pub fn find_task_mut<'a>(tasks: &'a mut [Task], id: &str) -> Option<&'a mut Task> {
    tasks.iter_mut().find(|task| task.id == id)
}

/// True when every dependency of `task` exists and is completed or skipped.
///
/// A dependency id that does not resolve to a task is treated as unsatisfied.
pub fn dependencies_satisfied(task: &Task, tasks: &[Task]) -> bool {
    task.dependencies.iter().all(|dep| {
        find_task(tasks, dep)
            .map(|dep_task| dep_task.status.satisfies_dependents())
            .unwrap_or(false)
    })
}
