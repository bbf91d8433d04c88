//! Verification check runner abstraction.
//!
//! [`CheckRunner`] decouples the verification controller from process
//! spawning; tests use scripted runners.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument};

use crate::io::process::{run_command_with_timeout, shell_command};

/// Result of one check command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    pub success: bool,
    pub timed_out: bool,
    pub output: String,
}

pub trait CheckRunner {
    /// Run `command` in `workdir`. A failing or timed-out command is `Ok` with
    /// `success == false`; `Err` is reserved for being unable to run it at all.
    fn run_check(&self, command: &str, workdir: &Path, timeout: Duration) -> Result<CheckOutput>;
}

/// Runs checks through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellCheckRunner {
    pub output_limit_bytes: usize,
}

impl CheckRunner for ShellCheckRunner {
    #[instrument(skip_all, fields(command = %command, timeout_secs = timeout.as_secs()))]
    fn run_check(&self, command: &str, workdir: &Path, timeout: Duration) -> Result<CheckOutput> {
        let output = run_command_with_timeout(
            shell_command(command, workdir),
            timeout,
            self.output_limit_bytes,
        )?;
        let success = output.succeeded();
        info!(success, timed_out = output.timed_out, "check finished");
        Ok(CheckOutput {
            success,
            timed_out: output.timed_out,
            output: output.combined_text(),
        })
    }
}
