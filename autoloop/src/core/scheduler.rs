//! Deterministic task selection and progress aggregation.

use serde::Serialize;

use crate::core::task::{Task, TaskStatus, dependencies_satisfied};

/// Return the first pending task (in list order) whose dependencies are all satisfied.
pub fn next_eligible(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .find(|task| task.status == TaskStatus::Pending && dependencies_satisfied(task, tasks))
}

/// First task left `in_progress`, typically by a session that was interrupted.
pub fn resumable(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .find(|task| task.status == TaskStatus::InProgress)
}

/// True when the list is non-empty and every task is completed or skipped.
pub fn is_run_complete(tasks: &[Task]) -> bool {
    !tasks.is_empty() && tasks.iter().all(|task| task.status.satisfies_dependents())
}

/// Aggregate counts over a task list. Always recomputed, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub percentage: f64,
}

impl Progress {
    /// One-line summary used in notes and status output.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} completed ({:.1}%), {} pending, {} in progress, {} blocked, {} skipped",
            self.completed,
            self.total,
            self.percentage,
            self.pending,
            self.in_progress,
            self.blocked,
            self.skipped
        )
    }
}

pub fn progress(tasks: &[Task]) -> Progress {
    let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
    let total = tasks.len();
    let completed = count(TaskStatus::Completed);
    let percentage = if total == 0 {
        0.0
    } else {
        completed as f64 * 100.0 / total as f64
    };
    Progress {
        total,
        completed,
        pending: count(TaskStatus::Pending),
        in_progress: count(TaskStatus::InProgress),
        blocked: count(TaskStatus::Blocked),
        skipped: count(TaskStatus::Skipped),
        percentage,
    }
}

/// Ids of blocked tasks, in list order.
pub fn blocked_ids(tasks: &[Task]) -> Vec<String> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Blocked)
        .map(|task| task.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[test]
    fn next_eligible_respects_list_order() {
        let tasks = vec![task("a", &[]), task("b", &[])];
        assert_eq!(next_eligible(&tasks).map(|t| t.id.as_str()), Some("a"));
    }

    #[test]
    fn next_eligible_skips_tasks_with_open_dependencies() {
        let mut tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &[])];
        tasks[0].status = TaskStatus::InProgress;
        assert_eq!(next_eligible(&tasks).map(|t| t.id.as_str()), Some("c"));
    }

    #[test]
    fn next_eligible_never_returns_task_with_incomplete_dependency() {
        let open = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
        ];
        for dep_status in open {
            let mut tasks = vec![task("dep", &[]), task("child", &["dep"])];
            tasks[0].status = dep_status;
            if let Some(selected) = next_eligible(&tasks) {
                assert_ne!(selected.id, "child", "dep status {dep_status}");
            }
        }
    }

    #[test]
    fn skipped_dependency_unblocks_dependents() {
        let mut tasks = vec![task("a", &[]), task("b", &["a"])];
        tasks[0].status = TaskStatus::Skipped;
        assert_eq!(next_eligible(&tasks).map(|t| t.id.as_str()), Some("b"));
    }

    #[test]
    fn empty_list_is_not_complete() {
        assert!(!is_run_complete(&[]));
    }

    #[test]
    fn run_complete_accepts_mix_of_completed_and_skipped() {
        let mut tasks = vec![task("a", &[]), task("b", &[])];
        tasks[0].status = TaskStatus::Completed;
        tasks[1].status = TaskStatus::Skipped;
        assert!(is_run_complete(&tasks));
        tasks[1].status = TaskStatus::Blocked;
        assert!(!is_run_complete(&tasks));
    }

    #[test]
    fn progress_counts_each_status() {
        let mut tasks = vec![
            task("a", &[]),
            task("b", &[]),
            task("c", &[]),
            task("d", &[]),
        ];
        tasks[0].status = TaskStatus::Completed;
        tasks[1].status = TaskStatus::Blocked;
        tasks[2].status = TaskStatus::InProgress;

        let p = progress(&tasks);
        assert_eq!(p.total, 4);
        assert_eq!(p.completed, 1);
        assert_eq!(p.blocked, 1);
        assert_eq!(p.in_progress, 1);
        assert_eq!(p.pending, 1);
        assert_eq!(p.skipped, 0);
        assert!((p.percentage - 25.0).abs() < f64::EPSILON);
        assert!(p.summary().starts_with("1/4 completed (25.0%)"));
    }
}
