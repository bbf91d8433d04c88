//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod completion;
pub mod reconcile;
pub mod run;
pub mod scheduler;
pub mod task;
pub mod verification;
