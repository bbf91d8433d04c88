//! Append-only operator notes (`.autoloop/progress.md`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::scheduler::Progress;

const HEADER: &str = "# Progress\n";

/// One timestamped entry, written once per session.
#[derive(Debug, Clone)]
pub struct ProgressEntry<'a> {
    pub session: u32,
    pub timestamp: DateTime<Utc>,
    pub headline: &'a str,
    pub progress: &'a Progress,
    pub details: &'a [String],
}

fn render(entry: &ProgressEntry<'_>) -> String {
    let mut buf = format!(
        "\n## Session {} ({})\n\n{}\n\nProgress: {}\n",
        entry.session,
        entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        entry.headline.trim(),
        entry.progress.summary(),
    );
    if !entry.details.is_empty() {
        buf.push('\n');
        for line in entry.details {
            buf.push_str("- ");
            buf.push_str(line.trim());
            buf.push('\n');
        }
    }
    buf
}

/// Append an entry, creating the file with a header on first use.
pub fn append_progress(path: &Path, entry: &ProgressEntry<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let is_new = !path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    if is_new {
        file.write_all(HEADER.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
    }
    file.write_all(render(entry).as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    Ok(())
}
