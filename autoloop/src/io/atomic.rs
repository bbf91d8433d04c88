//! Whole-file replacement writes (temp file + rename).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Write `contents` to a sibling temp file, then rename over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Pretty JSON with a trailing newline, written atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file_and_leaves_no_temp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("state.json");
        write_atomic(&path, "one").expect("first write");
        write_json_atomic(&path, &vec![1, 2]).expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read"), "[\n  1,\n  2\n]\n");
        assert!(!temp.path().join("nested").join("state.json.tmp").exists());
    }
}
