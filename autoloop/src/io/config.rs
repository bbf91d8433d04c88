//! Loop configuration stored under `.autoloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::completion::DEFAULT_COMPLETION_PHRASES;
use crate::core::verification::FailureKind;
use crate::io::atomic::write_atomic;

/// Loop configuration (TOML).
///
/// Edited by humans between runs. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause between successful sessions.
    pub session_delay_secs: u64,

    /// Pause before retrying a session after an executor transport error.
    pub error_backoff_secs: u64,

    /// Stop after this many sessions in one invocation. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<u32>,

    /// Wall-clock budget for one executor session.
    pub session_timeout_secs: u64,

    /// Prompt size budget in bytes; droppable sections are removed first.
    pub prompt_budget_bytes: usize,

    /// Textual completion signals accepted from executor output.
    pub completion_phrases: Vec<String>,

    pub executor: ExecutorConfig,
    pub verification: VerificationConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Bridge command line (e.g. `["agent-bridge", "--verbose"]`).
    pub command: Vec<String>,
    /// Transcript capture limit.
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec!["agent-bridge".to_string()],
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    pub test_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Salient lines kept per failure kind in retry guidance.
    pub guidance_max_lines: usize,
    pub output_limit_bytes: usize,
    pub quality: Vec<QualityCheck>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            test_timeout_secs: 120,
            build_timeout_secs: 180,
            guidance_max_lines: 12,
            output_limit_bytes: 100_000,
            quality: Vec::new(),
        }
    }
}

impl VerificationConfig {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

/// A lint/type/build/review command run after the behavior check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityCheck {
    pub kind: FailureKind,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Paths outside the workdir the sandbox may read.
    pub read_only_paths: Vec<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            session_delay_secs: 3,
            error_backoff_secs: 10,
            max_sessions: None,
            session_timeout_secs: 60 * 60,
            prompt_budget_bytes: 40_000,
            completion_phrases: DEFAULT_COMPLETION_PHRASES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            executor: ExecutorConfig::default(),
            verification: VerificationConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.max_sessions == Some(0) {
            return Err(anyhow!("max_sessions must be > 0 when set"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.verification.test_timeout_secs == 0 || self.verification.build_timeout_secs == 0 {
            return Err(anyhow!("verification timeouts must be > 0"));
        }
        if self.verification.output_limit_bytes == 0 {
            return Err(anyhow!("verification.output_limit_bytes must be > 0"));
        }
        if let Some(check) = self
            .verification
            .quality
            .iter()
            .find(|c| c.command.trim().is_empty())
        {
            return Err(anyhow!(
                "verification.quality entry of kind {} has an empty command",
                check.kind
            ));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn session_delay(&self) -> Duration {
        Duration::from_secs(self.session_delay_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
        assert_eq!(cfg.max_sessions, None);
        assert_eq!(cfg.verification.test_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = LoopConfig {
            max_sessions: Some(4),
            ..LoopConfig::default()
        };
        cfg.verification.quality.push(QualityCheck {
            kind: FailureKind::Lint,
            command: "cargo clippy".to_string(),
        });
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "session_delay_secs = 0\n\n[[verification.quality]]\nkind = \"type\"\ncommand = \"tsc --noEmit\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.session_delay_secs, 0);
        assert_eq!(cfg.error_backoff_secs, 10);
        assert_eq!(cfg.verification.quality[0].kind, FailureKind::Type);
    }

    #[test]
    fn rejects_empty_executor_command() {
        let cfg = LoopConfig {
            executor: ExecutorConfig {
                command: Vec::new(),
                ..ExecutorConfig::default()
            },
            ..LoopConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("executor.command"));
    }
}
