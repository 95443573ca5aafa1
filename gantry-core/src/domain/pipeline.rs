//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::check_every::CheckEvery;
use super::source::{Params, Source, Version};

/// Key/value set distinguishing instances of the same named pipeline
pub type InstanceVars = BTreeMap<String, serde_json::Value>;

/// Optimistic-concurrency token of a pipeline's config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigVersion(pub i64);

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ConfigVersion {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ConfigVersion)
    }
}

/// Identity of a pipeline within a team
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_vars: Option<InstanceVars>,
}

impl PipelineRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_vars: None,
        }
    }

    pub fn with_instance_vars(mut self, vars: InstanceVars) -> Self {
        self.instance_vars = Some(vars);
        self
    }
}

impl fmt::Display for PipelineRef {
    /// Renders `name` or `name/key:value,other:value`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        let Some(vars) = self.instance_vars.as_ref().filter(|v| !v.is_empty()) else {
            return Ok(());
        };
        f.write_str("/")?;
        for (i, (key, value)) in vars.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", render_var_key(key), render_var_value(value))?;
        }
        Ok(())
    }
}

fn is_plain(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

fn render_var_key(key: &str) -> String {
    if is_plain(key) {
        key.to_string()
    } else {
        serde_json::Value::String(key.to_string()).to_string()
    }
}

fn render_var_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s)
            if s
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
                && !s.is_empty()
                && s.parse::<f64>().is_err()
                && !matches!(s.as_str(), "true" | "false" | "null") =>
        {
            s.clone()
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceVarsError {
    #[error("instance var {key:?} is not valid JSON: {message}")]
    MalformedValue { key: String, message: String },
    #[error("instance var key cannot be empty")]
    EmptyKey,
}

/// Collects `vars.<key>=<json>` query parameters into instance vars.
///
/// Returns `Ok(None)` when no such parameter is present.
pub fn instance_vars_from_query<'a, I>(params: I) -> Result<Option<InstanceVars>, InstanceVarsError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut vars = InstanceVars::new();
    for (name, raw) in params {
        let Some(key) = name.strip_prefix("vars.") else {
            continue;
        };
        if key.is_empty() {
            return Err(InstanceVarsError::EmptyKey);
        }
        let value = serde_json::from_str(raw).map_err(|e| InstanceVarsError::MalformedValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        vars.insert(key.to_string(), value);
    }
    Ok((!vars.is_empty()).then_some(vars))
}

/// A saved pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub team_id: Uuid,
    pub team_name: String,
    pub name: String,
    pub instance_vars: Option<InstanceVars>,
    pub config_version: ConfigVersion,
    pub paused: bool,
    pub public: bool,
    pub ordering: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Pipeline {
    pub fn pipeline_ref(&self) -> PipelineRef {
        PipelineRef {
            name: self.name.clone(),
            instance_vars: self.instance_vars.clone(),
        }
    }
}

/// A team owning pipelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
}

/// Declarative pipeline configuration as submitted by a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<ResourceTypeConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceConfig>,
}

/// A custom resource type declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub source: Source,
    /// Merged under the source of every child declaring this type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Source>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_every: Option<CheckEvery>,
    /// Pinned version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

/// A resource declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_every: Option<CheckEvery>,
    /// Pinned version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}
