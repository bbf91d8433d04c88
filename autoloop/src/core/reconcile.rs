//! Reload-then-merge of the task list at session boundaries.
//!
//! The executor edits `tasks.json` directly. The reloaded file is authoritative
//! for descriptions, notes, new tasks and ordinary status changes, but the runner
//! owns three things: tasks are never deleted, the dependency gate on
//! `in_progress`/`completed`, and tasks blocked by the verification ceiling.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::core::task::{Task, TaskStatus, dependencies_satisfied, find_task};

/// What reconciliation changed relative to the reloaded file.
///
/// Lists are sorted by task id so reports are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tasks missing from the reloaded list that were restored.
    pub restored: Vec<String>,
    /// Tasks whose status change violated the dependency gate and was reverted.
    pub reverted: Vec<String>,
    /// Tasks kept `blocked` because their verification attempts are exhausted.
    pub kept_blocked: Vec<String>,
    /// Tasks that became `completed` during this session.
    pub newly_completed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.restored.is_empty() && self.reverted.is_empty() && self.kept_blocked.is_empty()
    }
}

/// Merge `reloaded` against the `previous` in-memory list.
///
/// `exhausted` names tasks whose verification ceiling was reached; those stay
/// blocked whatever the executor wrote.
pub fn reconcile_tasks(
    previous: &[Task],
    reloaded: Vec<Task>,
    exhausted: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> (Vec<Task>, ReconcileReport) {
    let mut report = ReconcileReport::default();
    let mut merged = reloaded;

    let present: HashSet<String> = merged.iter().map(|t| t.id.clone()).collect();
    for task in previous {
        if !present.contains(&task.id) {
            report.restored.push(task.id.clone());
            merged.push(task.clone());
        }
    }

    let prev_status: HashMap<&str, TaskStatus> = previous
        .iter()
        .map(|t| (t.id.as_str(), t.status))
        .collect();

    for id in exhausted {
        if let Some(task) = merged.iter_mut().find(|t| &t.id == id)
            && task.status != TaskStatus::Blocked
        {
            task.status = TaskStatus::Blocked;
            task.completed_at = None;
            report.kept_blocked.push(id.clone());
        }
    }

    // Revert gate violations until stable: reverting one task can invalidate a dependent.
    loop {
        let snapshot = merged.clone();
        let mut changed = false;
        for task in &mut merged {
            if !task.status.requires_dependencies() || dependencies_satisfied(task, &snapshot) {
                continue;
            }
            let fallback = prev_status
                .get(task.id.as_str())
                .copied()
                .filter(|status| !status.requires_dependencies())
                .unwrap_or(TaskStatus::Pending);
            task.status = fallback;
            task.completed_at = None;
            if !report.reverted.contains(&task.id) {
                report.reverted.push(task.id.clone());
            }
            changed = true;
        }
        if !changed {
            break;
        }
    }

    for task in &mut merged {
        match task.status {
            TaskStatus::Completed => {
                if task.completed_at.is_none() {
                    task.completed_at = Some(now);
                }
                let was_completed = prev_status.get(task.id.as_str()) == Some(&TaskStatus::Completed);
                if !was_completed {
                    report.newly_completed.push(task.id.clone());
                }
            }
            _ => task.completed_at = None,
        }
    }

    report.restored.sort();
    report.reverted.sort();
    report.kept_blocked.sort();
    report.newly_completed.sort();
    (merged, report)
}

/// Semantic checks the JSON schema cannot express.
///
/// Reports duplicate ids, dangling dependency ids and dependency cycles.
pub fn validate_tasks(tasks: &[Task]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in tasks {
        if task.id.trim().is_empty() {
            errors.push("task with empty id".to_string());
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
        for dep in &task.dependencies {
            if dep == &task.id {
                errors.push(format!("task '{}' depends on itself", task.id));
            } else if find_task(tasks, dep).is_none() {
                errors.push(format!("task '{}' depends on unknown task '{}'", task.id, dep));
            }
        }
    }
    if let Some(cycle) = find_cycle(tasks) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }
    errors
}

fn find_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        tasks: &'a [Task],
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            None => {}
        }
        let task = find_task(tasks, id)?;
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        for dep in &task.dependencies {
            if dep == id {
                continue;
            }
            if let Some(cycle) = visit(dep, tasks, marks, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for task in tasks {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(&task.id, tasks, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}
