//! Check plans
//!
//! A plan is what the execution engine receives for a check build. It is
//! persisted with the build, so everything needed to run the check
//! (including the fully resolved type chain) is embedded in it.

use serde::{Deserialize, Serialize};

use super::pipeline::ResourceTypeConfig;
use super::source::{Source, Version};

/// A resource type with defaults merged in and its latest version attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceType {
    #[serde(flatten)]
    pub resource_type: ResourceTypeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

/// Plan of a single check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckPlan {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<Version>,
    pub interval: String,
    /// Resolved ancestors, closest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versioned_resource_types: Vec<VersionedResourceType>,
    /// Name of the resource being checked, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Name of the resource type being checked, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

/// Top-level build plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub check: CheckPlan,
}
