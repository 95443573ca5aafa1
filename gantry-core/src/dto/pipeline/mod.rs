//! Pipeline DTOs

use serde::{Deserialize, Serialize};

use crate::validate::ConfigWarning;

/// Header carrying the config version a save is based on
pub const CONFIG_VERSION_HEADER: &str = "X-Concourse-Config-Version";

/// Response to a config save
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfigResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ConfigWarning>,
}
