//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the API handlers and the storage traits.

pub mod admission;
pub mod build;
pub mod check;
pub mod pipeline;
pub mod scanner;

// Re-export for convenience
pub use build as build_service;
pub use check as check_service;
pub use pipeline as pipeline_service;
