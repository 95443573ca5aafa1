//! Check build domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::plan::Plan;
use super::resource::CheckableKey;

/// Name given to every check build
pub const CHECK_BUILD_NAME: &str = "check";

/// Tracing context captured when a build was admitted
pub type SpanContext = BTreeMap<String, String>;

/// Build lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Started,
    Succeeded,
    Failed,
    Errored,
    Aborted,
}

impl BuildStatus {
    /// Whether the build has finished and will never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Errored | BuildStatus::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Started => "started",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
            BuildStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BuildStatus::Pending),
            "started" => Ok(BuildStatus::Started),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            "errored" => Ok(BuildStatus::Errored),
            "aborted" => Ok(BuildStatus::Aborted),
            other => Err(format!("unknown build status: {other}")),
        }
    }
}

/// A check build scoped to one checkable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub name: String,
    pub team_id: Uuid,
    pub pipeline_id: Uuid,
    pub checkable: CheckableKey,
    pub status: BuildStatus,
    pub manually_triggered: bool,
    pub plan: Plan,
    pub span_context: SpanContext,
    pub create_time: chrono::DateTime<chrono::Utc>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Build {
    pub fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// An entry of a build's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub build_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl BuildEvent {
    pub fn status(build_id: Uuid, status: BuildStatus) -> Self {
        Self {
            build_id,
            event_type: "status".to_string(),
            payload: serde_json::json!({ "status": status }),
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(!BuildStatus::Started.is_terminal());
        assert!(BuildStatus::Succeeded.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(BuildStatus::Errored.is_terminal());
        assert!(BuildStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [BuildStatus::Pending, BuildStatus::Started, BuildStatus::Aborted] {
            assert_eq!(status.as_str().parse::<BuildStatus>(), Ok(status));
        }
        assert!("bogus".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_status_event_payload() {
        let event = BuildEvent::status(Uuid::new_v4(), BuildStatus::Succeeded);
        assert_eq!(event.event_type, "status");
        assert_eq!(event.payload["status"], "succeeded");
    }
}
