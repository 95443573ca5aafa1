//! Resource and resource type domain types
//!
//! Both are "checkables": entities whose versions are discovered by running
//! a check build. `Checkable` gives the scanner and admission a single view
//! over either kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::check_every::CheckEvery;
use super::pipeline::{InstanceVars, ResourceTypeConfig};
use super::plan::{CheckPlan, VersionedResourceType};
use super::source::{Params, Source, Version};
use crate::defaults::DefaultsSnapshot;
use crate::resolver::ResourceTypes;

/// An active resource of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub pipeline_instance_vars: Option<InstanceVars>,
    pub team_id: Uuid,
    pub team_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    pub tags: Vec<String>,
    pub check_every: Option<CheckEvery>,
    pub pinned_version: Option<Version>,
    pub icon: Option<String>,
    pub resource_config_scope_id: Option<Uuid>,
}

/// An active custom resource type of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub pipeline_instance_vars: Option<InstanceVars>,
    pub team_id: Uuid,
    pub team_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub source: Source,
    pub defaults: Option<Source>,
    pub privileged: bool,
    pub params: Option<Params>,
    pub tags: Vec<String>,
    pub check_every: Option<CheckEvery>,
    pub pinned_version: Option<Version>,
    /// Latest version discovered for this type's scope
    pub version: Option<Version>,
    pub resource_config_scope_id: Option<Uuid>,
}

impl ResourceType {
    /// Whether this declaration names itself as its own type.
    pub fn is_self_referential(&self) -> bool {
        self.name == self.type_
    }

    /// Converts the stored type back into its declared form.
    pub fn to_config(&self) -> ResourceTypeConfig {
        ResourceTypeConfig {
            name: self.name.clone(),
            type_: self.type_.clone(),
            source: self.source.clone(),
            defaults: self.defaults.clone(),
            privileged: self.privileged,
            params: self.params.clone(),
            tags: self.tags.clone(),
            check_every: self.check_every,
            version: self.pinned_version.clone(),
        }
    }
}

/// Identity of a checkable; the unit of exactly-once admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CheckableKey {
    Resource(Uuid),
    ResourceType(Uuid),
}

impl fmt::Display for CheckableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckableKey::Resource(id) => write!(f, "resource:{id}"),
            CheckableKey::ResourceType(id) => write!(f, "resource-type:{id}"),
        }
    }
}

/// A resource or a resource type
#[derive(Debug, Clone, PartialEq)]
pub enum Checkable {
    Resource(Resource),
    ResourceType(ResourceType),
}

impl From<Resource> for Checkable {
    fn from(resource: Resource) -> Self {
        Checkable::Resource(resource)
    }
}

impl From<ResourceType> for Checkable {
    fn from(resource_type: ResourceType) -> Self {
        Checkable::ResourceType(resource_type)
    }
}

impl Checkable {
    pub fn key(&self) -> CheckableKey {
        match self {
            Checkable::Resource(r) => CheckableKey::Resource(r.id),
            Checkable::ResourceType(t) => CheckableKey::ResourceType(t.id),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Checkable::Resource(r) => r.id,
            Checkable::ResourceType(t) => t.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Checkable::Resource(r) => &r.name,
            Checkable::ResourceType(t) => &t.name,
        }
    }

    /// The declared `type` field.
    pub fn type_name(&self) -> &str {
        match self {
            Checkable::Resource(r) => &r.type_,
            Checkable::ResourceType(t) => &t.type_,
        }
    }

    pub fn source(&self) -> &Source {
        match self {
            Checkable::Resource(r) => &r.source,
            Checkable::ResourceType(t) => &t.source,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Checkable::Resource(r) => &r.tags,
            Checkable::ResourceType(t) => &t.tags,
        }
    }

    pub fn check_every(&self) -> Option<CheckEvery> {
        match self {
            Checkable::Resource(r) => r.check_every,
            Checkable::ResourceType(t) => t.check_every,
        }
    }

    pub fn pipeline_id(&self) -> Uuid {
        match self {
            Checkable::Resource(r) => r.pipeline_id,
            Checkable::ResourceType(t) => t.pipeline_id,
        }
    }

    pub fn pipeline_name(&self) -> &str {
        match self {
            Checkable::Resource(r) => &r.pipeline_name,
            Checkable::ResourceType(t) => &t.pipeline_name,
        }
    }

    pub fn team_id(&self) -> Uuid {
        match self {
            Checkable::Resource(r) => r.team_id,
            Checkable::ResourceType(t) => t.team_id,
        }
    }

    pub fn team_name(&self) -> &str {
        match self {
            Checkable::Resource(r) => &r.team_name,
            Checkable::ResourceType(t) => &t.team_name,
        }
    }

    pub fn resource_config_scope_id(&self) -> Option<Uuid> {
        match self {
            Checkable::Resource(r) => r.resource_config_scope_id,
            Checkable::ResourceType(t) => t.resource_config_scope_id,
        }
    }

    pub fn current_pinned_version(&self) -> Option<&Version> {
        match self {
            Checkable::Resource(r) => r.pinned_version.as_ref(),
            Checkable::ResourceType(t) => t.pinned_version.as_ref(),
        }
    }

    /// True when `check_every: never` disables checking.
    pub fn never_checked(&self) -> bool {
        self.check_every().is_some_and(|every| every.never)
    }

    /// Builds the check plan for this checkable.
    ///
    /// `defaults` is merged under the checkable's own source (own keys win).
    /// The plan embeds the deserialized type chain resolved from
    /// `resource_types`.
    pub fn check_plan(
        &self,
        from_version: Option<&Version>,
        interval: &str,
        resource_types: &ResourceTypes,
        defaults: &Source,
        base_defaults: &DefaultsSnapshot,
    ) -> CheckPlan {
        let versioned_resource_types: Vec<VersionedResourceType> =
            resource_types.filter(self).deserialize(base_defaults);

        let (resource, resource_type) = match self {
            Checkable::Resource(r) => (Some(r.name.clone()), None),
            Checkable::ResourceType(t) => (None, Some(t.name.clone())),
        };

        CheckPlan {
            name: self.name().to_string(),
            type_: self.type_name().to_string(),
            source: defaults.merge(self.source()),
            tags: self.tags().to_vec(),
            from_version: from_version.cloned(),
            interval: interval.to_string(),
            versioned_resource_types,
            resource,
            resource_type,
        }
    }
}
