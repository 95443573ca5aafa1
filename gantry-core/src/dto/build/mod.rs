//! Build DTOs

use serde::{Deserialize, Serialize};

use crate::domain::build::BuildStatus;

/// Completion report sent by the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishBuild {
    pub status: BuildStatus,
}
