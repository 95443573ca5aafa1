//! Source, params and version maps

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// Arbitrary step parameters attached to a resource type
pub type Params = BTreeMap<String, serde_json::Value>;

/// A discovered (or pinned) version of a checkable
pub type Version = BTreeMap<String, String>;

/// Configuration handed to a resource type's check
///
/// Keys are kept ordered so that serialized sources are stable, which the
/// scope digest relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(BTreeMap<String, serde_json::Value>);

impl Source {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of `self` with every key of `other` laid on top.
    ///
    /// Keys present in both maps take the value from `other`.
    pub fn merge(&self, other: &Source) -> Source {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            merged.insert(key.clone(), value.clone());
        }
        Source(merged)
    }

    pub fn into_inner(self) -> BTreeMap<String, serde_json::Value> {
        self.0
    }
}

impl Deref for Source {
    type Target = BTreeMap<String, serde_json::Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Source {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<BTreeMap<String, serde_json::Value>> for Source {
    fn from(map: BTreeMap<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<serde_json::Value>> FromIterator<(K, V)> for Source {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
