//! Pipeline config validation
//!
//! Runs before a config is saved. Errors reject the save; warnings are
//! returned to the caller alongside a successful save.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::domain::check_every::CheckEvery;
use crate::domain::pipeline::PipelineConfig;

static VALID_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{Ll}\p{Lt}\p{Lm}\p{Lo}][\p{Ll}\p{Lt}\p{Lm}\p{Lo}\d\-_.]*$")
        .unwrap_or_else(|e| panic!("invalid identifier pattern: {e}"))
});

/// Non-fatal finding about a config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigWarning {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Outcome of validating a config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<ConfigWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a team, pipeline, resource or type name.
///
/// Empty identifiers are errors; names outside the identifier grammar
/// (lowercase start, then letters, digits, `-`, `_`, `.`) only warn.
pub fn validate_identifier(identifier: &str, kind: &str) -> Result<Option<ConfigWarning>, String> {
    if identifier.is_empty() {
        return Err(format!("{kind} name cannot be empty"));
    }
    if VALID_IDENTIFIER.is_match(identifier) {
        return Ok(None);
    }
    Ok(Some(ConfigWarning {
        kind: "invalid_identifier".to_string(),
        message: format!(
            "{kind}: '{identifier}' is not a valid identifier: must start with a lowercase letter \
             and contain only lowercase letters, numbers, and '-', '_', '.'"
        ),
    }))
}

pub fn validate_config(config: &PipelineConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut seen_types = HashSet::new();
    for (i, resource_type) in config.resource_types.iter().enumerate() {
        let location = format!("resource_types[{i}]");
        check_name(&mut report, &resource_type.name, "resource_type", &location);
        if !resource_type.name.is_empty() && !seen_types.insert(resource_type.name.as_str()) {
            report.errors.push(format!(
                "{location}: resource type '{}' appears multiple times",
                resource_type.name
            ));
        }
        if resource_type.type_.is_empty() {
            report.errors.push(format!("{location}: type cannot be empty"));
        }
        check_interval(&mut report, resource_type.check_every, &location);
    }

    let mut seen_resources = HashSet::new();
    for (i, resource) in config.resources.iter().enumerate() {
        let location = format!("resources[{i}]");
        check_name(&mut report, &resource.name, "resource", &location);
        if !resource.name.is_empty() && !seen_resources.insert(resource.name.as_str()) {
            report.errors.push(format!(
                "{location}: resource '{}' appears multiple times",
                resource.name
            ));
        }
        if resource.type_.is_empty() {
            report.errors.push(format!("{location}: type cannot be empty"));
        }
        check_interval(&mut report, resource.check_every, &location);
    }

    report.errors.extend(type_cycles(config));
    report
}

fn check_name(report: &mut ValidationReport, name: &str, kind: &str, location: &str) {
    match validate_identifier(name, kind) {
        Ok(Some(warning)) => report.warnings.push(warning),
        Ok(None) => {}
        Err(message) => report.errors.push(format!("{location}: {message}")),
    }
}

fn check_interval(report: &mut ValidationReport, check_every: Option<CheckEvery>, location: &str) {
    if let Some(CheckEvery {
        never: false,
        interval: Some(interval),
    }) = check_every
    {
        if interval.is_zero() {
            report
                .errors
                .push(format!("{location}: check_every interval must be greater than zero"));
        }
    }
}

/// Reports every resource type that reaches itself through other types.
fn type_cycles(config: &PipelineConfig) -> Vec<String> {
    let by_name: HashMap<&str, &str> = config
        .resource_types
        .iter()
        .map(|t| (t.name.as_str(), t.type_.as_str()))
        .collect();

    let mut reported: HashSet<&str> = HashSet::new();
    let mut errors = Vec::new();

    for resource_type in &config.resource_types {
        let start = resource_type.name.as_str();
        let mut path = vec![start];
        let mut current = start;

        while let Some(&next) = by_name.get(current) {
            if next == current {
                break;
            }
            if let Some(pos) = path.iter().position(|&n| n == next) {
                let cycle = &path[pos..];
                if cycle.iter().all(|n| reported.insert(*n)) {
                    let mut rendered: Vec<&str> = cycle.to_vec();
                    rendered.push(next);
                    errors.push(format!(
                        "resource type cycle detected: {}",
                        rendered.join(" -> ")
                    ));
                }
                break;
            }
            path.push(next);
            current = next;
        }
    }

    errors
}
