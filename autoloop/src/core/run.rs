//! Run kinds and their payloads.
//!
//! Every run shares the same task/session shape; what differs is the payload
//! handed to the executor. Kinds are a closed set dispatched by `match`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunKind {
    /// Build a project from a written specification.
    Builder { spec: String },
    /// Port code from one directory tree to another.
    Migrator {
        source_dir: PathBuf,
        target_dir: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    /// Generate a new project skeleton.
    Scaffold {
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    Bugfix {
        issue: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reproduction: Option<String>,
    },
    Feature { spec: String },
    Refactor {
        goal: String,
        #[serde(default)]
        scope: Vec<String>,
    },
    /// Execute an externally written plan step by step.
    PlanExecution { plan: String },
}

impl RunKind {
    pub fn label(&self) -> &'static str {
        match self {
            RunKind::Builder { .. } => "builder",
            RunKind::Migrator { .. } => "migrator",
            RunKind::Scaffold { .. } => "scaffold",
            RunKind::Bugfix { .. } => "bugfix",
            RunKind::Feature { .. } => "feature",
            RunKind::Refactor { .. } => "refactor",
            RunKind::PlanExecution { .. } => "plan_execution",
        }
    }

    /// Free text describing the work; used for prompts and permission inference.
    pub fn specification_text(&self) -> String {
        match self {
            RunKind::Builder { spec } | RunKind::Feature { spec } => spec.clone(),
            RunKind::Migrator {
                source_dir,
                target_dir,
                notes,
            } => {
                let mut text = format!(
                    "Migrate {} to {}",
                    source_dir.display(),
                    target_dir.display()
                );
                if let Some(notes) = notes {
                    text.push('\n');
                    text.push_str(notes);
                }
                text
            }
            RunKind::Scaffold { description, stack } => match stack {
                Some(stack) => format!("{description}\nStack: {stack}"),
                None => description.clone(),
            },
            RunKind::Bugfix {
                issue,
                reproduction,
            } => match reproduction {
                Some(repro) => format!("{issue}\nReproduction: {repro}"),
                None => issue.clone(),
            },
            RunKind::Refactor { goal, scope } => {
                if scope.is_empty() {
                    goal.clone()
                } else {
                    format!("{goal}\nScope: {}", scope.join(", "))
                }
            }
            RunKind::PlanExecution { plan } => plan.clone(),
        }
    }

    /// The primary text that must be present for the run to make sense.
    pub fn has_specification(&self) -> bool {
        let primary = match self {
            RunKind::Builder { spec } | RunKind::Feature { spec } => spec.as_str(),
            RunKind::Migrator {
                source_dir,
                target_dir,
                ..
            } => {
                return !source_dir.as_os_str().is_empty() && !target_dir.as_os_str().is_empty();
            }
            RunKind::Scaffold { description, .. } => description.as_str(),
            RunKind::Bugfix { issue, .. } => issue.as_str(),
            RunKind::Refactor { goal, .. } => goal.as_str(),
            RunKind::PlanExecution { plan } => plan.as_str(),
        };
        !primary.trim().is_empty()
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a run is in its lifecycle, derived from the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No state and no tasks yet.
    Fresh,
    /// The next session must produce the task list.
    Initializing,
    /// Sessions work through eligible tasks.
    Working,
    Complete,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Fresh => "fresh",
            RunPhase::Initializing => "initializing",
            RunPhase::Working => "working",
            RunPhase::Complete => "complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_with_type_tag() {
        let kind = RunKind::Migrator {
            source_dir: PathBuf::from("old"),
            target_dir: PathBuf::from("new"),
            notes: None,
        };
        let value = serde_json::to_value(&kind).expect("serialize");
        assert_eq!(value["type"], "migrator");
        assert_eq!(value["source_dir"], "old");
        assert!(value.get("notes").is_none());

        let back: RunKind = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, kind);
    }

    #[test]
    fn plan_execution_tag_is_snake_case() {
        let kind: RunKind =
            serde_json::from_str(r#"{"type":"plan_execution","plan":"1. do it"}"#).expect("parse");
        assert_eq!(kind.label(), "plan_execution");
    }

    #[test]
    fn blank_specification_is_detected() {
        assert!(!RunKind::Feature { spec: "  ".into() }.has_specification());
        assert!(RunKind::Bugfix {
            issue: "crash on start".into(),
            reproduction: None
        }
        .has_specification());
    }
}
