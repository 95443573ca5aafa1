//! Manual check DTOs

use serde::{Deserialize, Serialize};

use crate::domain::source::Version;

/// Body of a manually triggered check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Version to check from; defaults to the pinned version
    #[serde(default)]
    pub from: Option<Version>,
}
