//! Per-session artifacts under `.autoloop/sessions/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::run::RunPhase;

#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub session: u32,
    pub phase: RunPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Executor reported an error result (the session itself still ran).
    pub is_error: bool,
    pub tool_uses: usize,
    pub tool_denials: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_phrase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub transcript_path: PathBuf,
    pub error_path: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            transcript_path: dir.join("transcript.log"),
            error_path: dir.join("error.log"),
            dir,
        }
    }
}

pub struct SessionWriteRequest<'a> {
    pub dir: PathBuf,
    pub meta: &'a SessionMeta,
    pub prompt: &'a str,
    pub transcript: &'a str,
}

pub fn write_session(request: &SessionWriteRequest<'_>) -> Result<SessionPaths> {
    let paths = SessionPaths::new(request.dir.clone());
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;

    write_text(&paths.prompt_path, request.prompt)?;
    write_text(&paths.transcript_path, request.transcript)?;
    let mut buf = serde_json::to_string_pretty(request.meta)?;
    buf.push('\n');
    write_text(&paths.meta_path, &buf)?;
    Ok(paths)
}

/// Append a transport error; several retries of one session share the file.
pub fn append_session_error(dir: &Path, timestamp: DateTime<Utc>, error: &str) -> Result<()> {
    let paths = SessionPaths::new(dir.to_path_buf());
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;
    let mut existing = if paths.error_path.exists() {
        fs::read_to_string(&paths.error_path)
            .with_context(|| format!("read {}", paths.error_path.display()))?
    } else {
        String::new()
    };
    existing.push_str(&format!("[{}] {}\n", timestamp.to_rfc3339(), error.trim_end()));
    write_text(&paths.error_path, &existing)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
