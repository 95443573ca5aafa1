//! Core domain types
//!
//! This module contains the core domain structures used across Gantry services.
//! These types describe what a pipeline declares (config), what the store keeps
//! active (resources and resource types), and what admission produces (check builds).

pub mod build;
pub mod check_every;
pub mod pipeline;
pub mod plan;
pub mod resource;
pub mod source;
