//! Data Transfer Objects for the HTTP surface
//!
//! Request and response bodies exchanged between the orchestrator's API and
//! its callers (pipeline tooling and the check execution engine).

pub mod build;
pub mod check;
pub mod pipeline;
