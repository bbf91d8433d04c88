//! Task list load/save (`.autoloop/tasks.json`) with schema validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::task::Task;
use crate::io::atomic::write_json_atomic;

pub const TASKS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/tasks.schema.json"
));

static TASKS_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(TASKS_SCHEMA).expect("tasks schema is valid JSON");
    validator_for(&schema).expect("tasks schema compiles")
});

/// Executors sometimes wrap the array as `{"tasks": [...]}`; accept both.
fn unwrap_task_array(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("tasks") => {
            map.remove("tasks").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Schema violations in a parsed task file, as human-readable messages.
pub fn schema_errors(value: &Value) -> Vec<String> {
    TASKS_VALIDATOR
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect()
}

/// Load and schema-validate the task list.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tasks {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse tasks {}", path.display()))?;
    let value = unwrap_task_array(value);
    let errors = schema_errors(&value);
    if !errors.is_empty() {
        return Err(anyhow!(
            "tasks schema validation failed: {}",
            errors.join("; ")
        ));
    }
    let tasks: Vec<Task> = serde_json::from_value(value)
        .with_context(|| format!("deserialize tasks {}", path.display()))?;
    debug!(path = %path.display(), count = tasks.len(), "tasks loaded");
    Ok(tasks)
}

/// Load the task list, treating a missing or malformed file as empty.
pub fn load_tasks_or_empty(path: &Path) -> Vec<Task> {
    if !path.exists() {
        return Vec::new();
    }
    match load_tasks(path) {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(path = %path.display(), err = %format!("{err:#}"), "treating malformed task list as empty");
            Vec::new()
        }
    }
}

/// Atomically replace the task list on disk.
pub fn write_tasks(path: &Path, tasks: &[Task]) -> Result<()> {
    debug!(path = %path.display(), count = tasks.len(), "writing tasks");
    write_json_atomic(path, tasks)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::task::TaskStatus;

    #[test]
    fn write_then_load_preserves_unknown_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(
            &path,
            r#"[{"id":"a","description":"first","status":"completed","priority":2},
               {"id":"b","description":"second","dependencies":["a"]}]"#,
        )
        .expect("write");

        let tasks = load_tasks(&path).expect("load");
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[1].status, TaskStatus::Pending);
        assert_eq!(tasks[0].extra.get("priority"), Some(&json!(2)));

        write_tasks(&path, &tasks).expect("write");
        let reloaded = load_tasks(&path).expect("reload");
        assert_eq!(reloaded, tasks);
    }

    #[test]
    fn accepts_wrapped_array() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(&path, r#"{"tasks":[{"id":"a","description":"x"}]}"#).expect("write");
        assert_eq!(load_tasks(&path).expect("load").len(), 1);
    }

    #[test]
    fn schema_errors_name_the_offending_value() {
        let errors = schema_errors(&json!([{"id": "a", "description": "x", "status": "done"}]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("done"), "{errors:?}");
        assert!(schema_errors(&json!([{"id": "a", "description": "x"}])).is_empty());
    }

    #[test]
    fn malformed_file_loads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        assert!(load_tasks_or_empty(&path).is_empty());
        fs::write(&path, "[{\"id\": \"a\",").expect("write truncated");
        assert!(load_tasks_or_empty(&path).is_empty());
        fs::write(&path, r#"[{"description":"no id"}]"#).expect("write invalid");
        assert!(load_tasks(&path).is_err());
    }
}
