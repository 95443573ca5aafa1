//! Check admission policy
//!
//! The storage-independent half of exactly-once admission. A ledger holds
//! the checkable's lock, loads its builds, asks [`decide`] what to do, and
//! applies the decision in the same transaction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::build::{Build, BuildStatus, CHECK_BUILD_NAME, SpanContext};
use crate::domain::plan::Plan;
use crate::domain::resource::CheckableKey;

/// Everything a ledger needs to admit one check build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub checkable: CheckableKey,
    pub team_id: Uuid,
    pub pipeline_id: Uuid,
    pub plan: Plan,
    pub manually_triggered: bool,
    pub span_context: SpanContext,
}

impl AdmissionRequest {
    /// The started build this request admits.
    pub fn new_build(&self) -> Build {
        let now = chrono::Utc::now();
        Build {
            id: Uuid::new_v4(),
            name: CHECK_BUILD_NAME.to_string(),
            team_id: self.team_id,
            pipeline_id: self.pipeline_id,
            checkable: self.checkable,
            status: BuildStatus::Started,
            manually_triggered: self.manually_triggered,
            plan: self.plan.clone(),
            span_context: self.span_context.clone(),
            create_time: now,
            start_time: Some(now),
            end_time: None,
        }
    }
}

/// Result of an admission attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub build: Build,
    pub created: bool,
}

/// What a ledger must do for one admission
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    /// A check is already in flight; return it unchanged.
    Existing(Build),
    /// Insert a new build after deleting the listed finished builds and
    /// their events.
    Create { superseded: Vec<Uuid> },
}

/// Decides admission given every build currently recorded for a checkable.
///
/// Automatic admissions are rejected while any build is unfinished, and
/// otherwise replace all finished builds. Manual admissions always create
/// and never delete, leaving any in-flight build running alongside.
pub fn decide(existing: &[Build], manually_triggered: bool) -> AdmissionDecision {
    if manually_triggered {
        return AdmissionDecision::Create { superseded: vec![] };
    }

    if let Some(running) = existing
        .iter()
        .filter(|b| b.is_running())
        .min_by_key(|b| b.create_time)
    {
        return AdmissionDecision::Existing(running.clone());
    }

    AdmissionDecision::Create {
        superseded: existing.iter().map(|b| b.id).collect(),
    }
}
