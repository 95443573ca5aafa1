//! Resource config scope identity
//!
//! Checkables with the same effective configuration (type, defaults-merged
//! source, and resolved type chain) share one scope and therefore one
//! discovered-version history.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::defaults::DefaultsSnapshot;
use crate::domain::pipeline::ResourceTypeConfig;
use crate::domain::resource::Checkable;
use crate::domain::source::Source;
use crate::resolver::ResourceTypes;

/// Effective configuration a scope is keyed on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeKey {
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    /// Resolved ancestors without their versions
    pub resource_types: Vec<ResourceTypeConfig>,
}

impl ScopeKey {
    pub fn for_checkable(
        checkable: &Checkable,
        resource_types: &ResourceTypes,
        base_defaults: &DefaultsSnapshot,
    ) -> Self {
        let defaults = resource_types.defaults_for(checkable, base_defaults);
        let resource_types = resource_types
            .filter(checkable)
            .deserialize(base_defaults)
            .into_iter()
            .map(|vrt| vrt.resource_type)
            .collect();

        Self {
            type_: checkable.type_name().to_string(),
            source: defaults.merge(checkable.source()),
            resource_types,
        }
    }

    /// Hex-encoded SHA-256 of the key's canonical JSON form.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        // Source and config maps are ordered, so serialization is stable.
        let encoded = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }
}
