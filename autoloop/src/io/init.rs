//! Canonical paths within `.autoloop/` and directory scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const RUN_DIR_NAME: &str = ".autoloop";

/// All canonical paths within `.autoloop/` for a working directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub workdir: PathBuf,
    pub run_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub state_path: PathBuf,
    pub tasks_path: PathBuf,
    pub verification_path: PathBuf,
    pub progress_path: PathBuf,
    pub config_path: PathBuf,
    pub sandbox_path: PathBuf,
}

impl RunPaths {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        let run_dir = workdir.join(RUN_DIR_NAME);
        Self {
            workdir: workdir.clone(),
            run_dir: run_dir.clone(),
            sessions_dir: run_dir.join("sessions"),
            gitignore_path: run_dir.join(".gitignore"),
            state_path: run_dir.join("state.json"),
            tasks_path: run_dir.join("tasks.json"),
            verification_path: run_dir.join("verification.json"),
            progress_path: run_dir.join("progress.md"),
            config_path: run_dir.join("config.toml"),
            sandbox_path: run_dir.join("sandbox.json"),
        }
    }

    /// Per-session artifact directory (`sessions/<n>/`).
    pub fn session_dir(&self, session: u32) -> PathBuf {
        self.sessions_dir.join(session.to_string())
    }
}

const RUN_GITIGNORE: &str = "sessions/\n";

/// Create `.autoloop/` and `sessions/`, and write `.gitignore` if absent.
pub fn ensure_layout(paths: &RunPaths) -> Result<()> {
    create_dir(&paths.run_dir)?;
    create_dir(&paths.sessions_dir)?;
    if !paths.gitignore_path.exists() {
        fs::write(&paths.gitignore_path, RUN_GITIGNORE)
            .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    }
    Ok(())
}

/// Remove everything under `.autoloop/` (used by `start --force`).
pub fn discard_run_dir(paths: &RunPaths) -> Result<()> {
    if paths.run_dir.exists() {
        fs::remove_dir_all(&paths.run_dir)
            .with_context(|| format!("remove {}", paths.run_dir.display()))?;
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
