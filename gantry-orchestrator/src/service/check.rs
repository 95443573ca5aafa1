//! Manual Check Service
//!
//! Operator-triggered checks of a single resource or resource type.

use gantry_core::domain::build::Build;
use gantry_core::domain::pipeline::PipelineRef;
use gantry_core::domain::resource::Checkable;
use gantry_core::domain::source::Version;
use thiserror::Error;

use crate::service::admission::{AdmissionError, CheckAdmission};
use crate::service::pipeline::{self as pipeline_service, PipelineError};
use crate::store::{CheckableStore, ConfigStore, StoreError};

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{kind} not found: {name}")]
    CheckableNotFound { kind: &'static str, name: String },

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to check within a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTarget {
    Resource(String),
    ResourceType(String),
}

/// Where to find the checkable and where to start checking from
#[derive(Debug, Clone)]
pub struct ManualCheck<'a> {
    pub team_name: &'a str,
    pub pipeline_ref: &'a PipelineRef,
    pub target: CheckTarget,
    /// Defaults to the checkable's pinned version
    pub from: Option<Version>,
}

/// Create a manually triggered check build
pub async fn check_now(
    config_store: &dyn ConfigStore,
    checkables: &dyn CheckableStore,
    admission: &CheckAdmission,
    req: ManualCheck<'_>,
) -> Result<Build, CheckError> {
    let pipeline = pipeline_service::get_pipeline(config_store, req.team_name, req.pipeline_ref).await?;

    let checkable: Checkable = match &req.target {
        CheckTarget::Resource(name) => checkables
            .find_resource(pipeline.id, name)
            .await?
            .ok_or_else(|| CheckError::CheckableNotFound {
                kind: "resource",
                name: name.clone(),
            })?
            .into(),
        CheckTarget::ResourceType(name) => checkables
            .find_resource_type(pipeline.id, name)
            .await?
            .ok_or_else(|| CheckError::CheckableNotFound {
                kind: "resource type",
                name: name.clone(),
            })?
            .into(),
    };

    let resource_types = checkables.pipeline_resource_types(pipeline.id).await?;
    let from = req.from.or_else(|| checkable.current_pinned_version().cloned());

    let admitted = admission
        .try_create_check(&checkable, &resource_types, from.as_ref(), true)
        .await?;

    tracing::info!(
        pipeline = %req.pipeline_ref,
        checkable = checkable.name(),
        build_id = %admitted.build.id,
        "Manual check created"
    );

    Ok(admitted.build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::admission::tests::{resource, resource_type, seed};
    use crate::store::{BuildLedger, MemoryStore};
    use gantry_core::defaults::BaseResourceTypeDefaults;
    use gantry_core::domain::pipeline::PipelineConfig;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryStore>, CheckAdmission) {
        let store = Arc::new(MemoryStore::new());
        let mut pinned = resource("pinned", "custom");
        pinned.version = Some([("ref".to_string(), "v1".to_string())].into());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![resource_type("custom", "registry-image")],
                resources: vec![resource("repo", "custom"), pinned],
            },
        )
        .await;
        let admission = CheckAdmission::new(
            store.clone(),
            BaseResourceTypeDefaults::default(),
            Duration::from_secs(60),
        );
        (store, admission)
    }

    fn manual(target: CheckTarget, pipeline_ref: &PipelineRef) -> ManualCheck<'_> {
        ManualCheck {
            team_name: "main",
            pipeline_ref,
            target,
            from: None,
        }
    }

    #[tokio::test]
    async fn test_manual_resource_check() {
        let (store, admission) = setup().await;
        let pipeline_ref = PipelineRef::new("p");

        let first = check_now(&*store, &*store, &admission, manual(CheckTarget::Resource("repo".into()), &pipeline_ref))
            .await
            .unwrap();
        let second = check_now(&*store, &*store, &admission, manual(CheckTarget::Resource("repo".into()), &pipeline_ref))
            .await
            .unwrap();

        assert!(first.manually_triggered);
        assert_ne!(first.id, second.id);
        assert_eq!(first.plan.check.versioned_resource_types.len(), 1);
        assert_eq!(store.builds_for(first.checkable).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_type_check_and_pinned_from() {
        let (store, admission) = setup().await;
        let pipeline_ref = PipelineRef::new("p");

        let build = check_now(
            &*store,
            &*store,
            &admission,
            manual(CheckTarget::ResourceType("custom".into()), &pipeline_ref),
        )
        .await
        .unwrap();
        assert_eq!(build.plan.check.resource_type.as_deref(), Some("custom"));

        let build = check_now(&*store, &*store, &admission, manual(CheckTarget::Resource("pinned".into()), &pipeline_ref))
            .await
            .unwrap();
        assert_eq!(build.plan.check.from_version.unwrap()["ref"], "v1");
    }

    #[tokio::test]
    async fn test_missing_targets() {
        let (store, admission) = setup().await;

        let err = check_now(
            &*store,
            &*store,
            &admission,
            manual(CheckTarget::Resource("nope".into()), &PipelineRef::new("p")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CheckError::CheckableNotFound { kind: "resource", .. }));

        let err = check_now(
            &*store,
            &*store,
            &admission,
            manual(CheckTarget::Resource("repo".into()), &PipelineRef::new("other")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CheckError::Pipeline(PipelineError::PipelineNotFound(_))));
    }
}
