//! Gantry Core
//!
//! Core types and abstractions for the Gantry check scheduler.
//!
//! This crate contains:
//! - Domain types: pipelines, resources, resource types, check builds and plans
//! - The resource type resolver (`ResourceTypes`) and base type defaults
//! - Admission policy and pipeline config validation
//! - DTOs: request/response bodies shared with the HTTP surface

pub mod admission;
pub mod defaults;
pub mod domain;
pub mod dto;
pub mod resolver;
pub mod scope;
pub mod validate;
