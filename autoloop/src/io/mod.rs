//! I/O: run directory stores, process spawning, prompts and the executor bridge.

pub mod atomic;
pub mod checks;
pub mod config;
pub mod executor;
pub mod init;
pub mod process;
pub mod progress_log;
pub mod prompt;
pub mod run_state;
pub mod sandbox;
pub mod session_log;
pub mod task_store;
pub mod verification_store;
