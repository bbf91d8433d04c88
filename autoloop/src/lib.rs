//! Resumable multi-session orchestrator for an external code-editing agent.
//!
//! A run lives in one working directory. Each session hands the agent a
//! prompt for one task, answers its tool-use requests through the
//! authorization engine, and afterwards reloads the task file the agent edited.
//! Verification checks gate completed tasks, with a bounded retry budget.
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, reconciliation,
//!   verification classification). No I/O, fully testable in isolation.
//! - **[`auth`]**: Command authorization: tokenizer, blocklist, per-program
//!   validators and presets. Decisions are values, never errors.
//! - **[`io`]**: Side-effecting operations (run directory files, processes,
//!   prompts, the executor bridge). Isolated behind traits for tests.
//!
//! Orchestration modules ([`start`], [`session`], [`looping`], [`verify`],
//! [`status`]) coordinate core logic with I/O to implement CLI commands.

pub mod auth;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod start;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
