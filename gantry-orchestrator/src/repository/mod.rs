//! Repository Module
//!
//! PostgreSQL data access layer for the orchestrator.
//! Each repository handles database operations for a specific domain entity.

pub mod build;
pub mod pipeline;
pub mod resource;
pub mod scope;

// Re-export for convenience
pub use build as build_repository;
pub use pipeline as pipeline_repository;
pub use resource as resource_repository;
pub use scope as scope_repository;
