//! Resource type resolution
//!
//! `ResourceTypes` wraps the active resource types of one or more pipelines
//! and answers, for any checkable, which custom types it depends on.
//!
//! Resolution is scoped to the checkable's own pipeline and never fails: a
//! type name with no declaration is a base type and ends the chain, and a
//! name seen twice during one descent ends it as well, so malformed stored
//! data can never make resolution loop.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::defaults::DefaultsSnapshot;
use crate::domain::plan::VersionedResourceType;
use crate::domain::resource::{Checkable, ResourceType};
use crate::domain::source::Source;

/// Name lookup of one pipeline's types; later declarations win
type PipelineIndex = HashMap<String, usize>;

#[derive(Debug, Clone, Default)]
pub struct ResourceTypes {
    types: Vec<ResourceType>,
    index: HashMap<Uuid, PipelineIndex>,
}

impl ResourceTypes {
    pub fn new(types: Vec<ResourceType>) -> Self {
        let mut index: HashMap<Uuid, PipelineIndex> = HashMap::new();
        for (position, resource_type) in types.iter().enumerate() {
            index
                .entry(resource_type.pipeline_id)
                .or_default()
                .insert(resource_type.name.clone(), position);
        }
        Self { types, index }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn into_inner(self) -> Vec<ResourceType> {
        self.types
    }

    /// Only the types declared by `pipeline_id`.
    pub fn for_pipeline(&self, pipeline_id: Uuid) -> ResourceTypes {
        ResourceTypes::new(
            self.types
                .iter()
                .filter(|t| t.pipeline_id == pipeline_id)
                .cloned()
                .collect(),
        )
    }

    /// Looks up a type by name within a pipeline.
    pub fn lookup(&self, pipeline_id: Uuid, name: &str) -> Option<&ResourceType> {
        self.index
            .get(&pipeline_id)
            .and_then(|names| names.get(name))
            .map(|&position| &self.types[position])
    }

    /// The custom type the checkable is declared with, if any.
    ///
    /// A type declaring itself as its own type has no parent.
    pub fn parent(&self, checkable: &Checkable) -> Option<&ResourceType> {
        let parent = self.lookup(checkable.pipeline_id(), checkable.type_name())?;
        match checkable {
            Checkable::ResourceType(t) if t.id == parent.id || t.is_self_referential() => None,
            _ => Some(parent),
        }
    }

    /// Ordered chain of type ancestors, closest first.
    ///
    /// A self-referential declaration is included once as the terminal
    /// element. Unknown names and revisited names end the chain.
    pub fn resolve(&self, checkable: &Checkable) -> Vec<&ResourceType> {
        let pipeline_id = checkable.pipeline_id();
        let mut chain = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut next = checkable.type_name();

        while let Some(found) = self.lookup(pipeline_id, next) {
            if !seen.insert(found.name.as_str()) {
                tracing::warn!(
                    pipeline = checkable.pipeline_name(),
                    checkable = checkable.name(),
                    resource_type = %found.name,
                    "Resource type cycle detected, truncating chain"
                );
                break;
            }
            chain.push(found);
            if found.is_self_referential() {
                break;
            }
            next = &found.type_;
        }

        chain
    }

    /// Owned form of [`resolve`](Self::resolve).
    pub fn filter(&self, checkable: &Checkable) -> ResourceTypes {
        ResourceTypes::new(self.resolve(checkable).into_iter().cloned().collect())
    }

    /// Source defaults applying to the checkable: its parent's declared
    /// `defaults`, or the base type default when it has no custom parent.
    pub fn defaults_for(&self, checkable: &Checkable, base_defaults: &DefaultsSnapshot) -> Source {
        match self.parent(checkable) {
            Some(parent) => parent.defaults.clone().unwrap_or_default(),
            None => base_defaults
                .get(checkable.type_name())
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Converts every type into its plan-ready form, in order.
    ///
    /// Each type's source gets the base default of its `type` merged under
    /// it, then the declared `defaults` of its custom parent (if any). The
    /// type's own keys always win.
    pub fn deserialize(&self, base_defaults: &DefaultsSnapshot) -> Vec<VersionedResourceType> {
        self.types
            .iter()
            .map(|t| {
                let mut source = match base_defaults.get(&t.type_) {
                    Some(defaults) => defaults.merge(&t.source),
                    None => t.source.clone(),
                };

                if let Some(parent_defaults) = self
                    .lookup(t.pipeline_id, &t.type_)
                    .filter(|parent| parent.id != t.id)
                    .and_then(|parent| parent.defaults.as_ref())
                {
                    source = parent_defaults.merge(&source);
                }

                let mut resource_type = t.to_config();
                resource_type.source = source;

                VersionedResourceType {
                    resource_type,
                    version: t.version.clone(),
                }
            })
            .collect()
    }
}

impl From<Vec<ResourceType>> for ResourceTypes {
    fn from(types: Vec<ResourceType>) -> Self {
        Self::new(types)
    }
}

impl<'a> IntoIterator for &'a ResourceTypes {
    type Item = &'a ResourceType;
    type IntoIter = std::slice::Iter<'a, ResourceType>;

    fn into_iter(self) -> Self::IntoIter {
        self.types.iter()
    }
}
