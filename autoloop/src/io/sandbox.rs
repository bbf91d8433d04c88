//! Declarative sandbox configuration for an external OS-level sandbox.
//!
//! Generated only; nothing here enforces it.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::auth::Preset;
use crate::io::atomic::write_json_atomic;

/// What a tool may do when the authorization callback is not consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Every tool use must be decided by the callback; anything else is denied.
    Deny,
    /// As `Deny`, and file edits are never allowed.
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemScope {
    pub read_write: Vec<PathBuf>,
    pub read_only: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxDeclaration {
    pub enabled: bool,
    pub filesystem: FilesystemScope,
    pub default_permission: PermissionMode,
}

impl SandboxDeclaration {
    /// Scope the sandbox to `workdir` plus the whitelisted read-only paths.
    pub fn for_run(workdir: &Path, read_only_paths: &[String], preset: Preset) -> Self {
        let read_only = read_only_paths
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        let (read_write, default_permission) = if preset.allows_writes() {
            (vec![workdir.to_path_buf()], PermissionMode::Deny)
        } else {
            (Vec::new(), PermissionMode::ReadOnly)
        };
        let mut filesystem = FilesystemScope {
            read_write,
            read_only,
        };
        if !preset.allows_writes() {
            filesystem.read_only.insert(0, workdir.to_path_buf());
        }
        Self {
            enabled: true,
            filesystem,
            default_permission,
        }
    }
}

pub fn write_sandbox(path: &Path, declaration: &SandboxDeclaration) -> Result<()> {
    write_json_atomic(path, declaration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_run_writes_only_inside_workdir() {
        let decl = SandboxDeclaration::for_run(
            Path::new("/work"),
            &["/opt/sdk".to_string(), " ".to_string()],
            Preset::Dev,
        );
        assert_eq!(decl.filesystem.read_write, vec![PathBuf::from("/work")]);
        assert_eq!(decl.filesystem.read_only, vec![PathBuf::from("/opt/sdk")]);
        assert_eq!(decl.default_permission, PermissionMode::Deny);
    }

    #[test]
    fn readonly_run_has_no_writable_paths() {
        let decl = SandboxDeclaration::for_run(Path::new("/work"), &[], Preset::Readonly);
        assert!(decl.filesystem.read_write.is_empty());
        assert_eq!(decl.filesystem.read_only, vec![PathBuf::from("/work")]);

        let json = serde_json::to_value(&decl).expect("serialize");
        assert_eq!(json["default_permission"], "read_only");
    }
}
