//! Command and tool authorization.
//!
//! Decisions are synchronous and side-effect free. A denial is a `Decision`
//! value carrying a reason, never an error.

pub mod blocklist;
pub mod gate;
pub mod policy;
pub mod segment;
pub mod tokenizer;
pub mod validators;

pub use gate::{ToolAuthorizer, ToolGate};
pub use policy::{AuthorizationPolicy, Decision, Preset, authorize, infer_programs};
