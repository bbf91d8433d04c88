//! Stable exit codes for autoloop CLI commands.

/// Command succeeded, the run is complete, or a command was authorized.
pub const OK: i32 = 0;
/// Invalid run directory, configuration or task file, or any other error.
pub const INVALID: i32 = 1;
/// The run stopped before completion and can be resumed, or `next` found no
/// eligible task.
pub const INCOMPLETE: i32 = 2;
/// `authorize` denied the command, or `run` stopped on a stuck task graph.
pub const DENIED: i32 = 3;
/// Alias of [`DENIED`] for the stuck-loop outcome.
pub const STUCK: i32 = DENIED;
