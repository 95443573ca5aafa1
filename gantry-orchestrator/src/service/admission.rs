//! Check Admission Service
//!
//! The exactly-once gate in front of the build ledger. Builds the check plan
//! for a checkable and asks the ledger to admit it.

use gantry_core::admission::{Admission, AdmissionRequest};
use gantry_core::defaults::BaseResourceTypeDefaults;
use gantry_core::domain::build::SpanContext;
use gantry_core::domain::check_every::format_duration;
use gantry_core::domain::plan::Plan;
use gantry_core::domain::resource::Checkable;
use gantry_core::domain::source::Version;
use gantry_core::resolver::ResourceTypes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{BuildLedger, StoreError};

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct CheckAdmission {
    ledger: Arc<dyn BuildLedger>,
    base_defaults: BaseResourceTypeDefaults,
    default_check_interval: Duration,
    checks_enqueued: AtomicU64,
}

impl CheckAdmission {
    pub fn new(
        ledger: Arc<dyn BuildLedger>,
        base_defaults: BaseResourceTypeDefaults,
        default_check_interval: Duration,
    ) -> Self {
        Self {
            ledger,
            base_defaults,
            default_check_interval,
            checks_enqueued: AtomicU64::new(0),
        }
    }

    /// Number of check builds created since start-up.
    pub fn checks_enqueued(&self) -> u64 {
        self.checks_enqueued.load(Ordering::Relaxed)
    }

    /// Tries to create a check build for `checkable`.
    ///
    /// `resource_types` must contain the checkable's pipeline types; the
    /// resolved chain is embedded in the plan. Returns the admitted build and
    /// whether it was created, or the in-flight build when one already
    /// exists and the check is not manually triggered.
    pub async fn try_create_check(
        &self,
        checkable: &Checkable,
        resource_types: &ResourceTypes,
        from_version: Option<&Version>,
        manually_triggered: bool,
    ) -> Result<Admission, AdmissionError> {
        let base_defaults = self.base_defaults.load();
        let defaults = resource_types.defaults_for(checkable, &base_defaults);

        let interval = checkable
            .check_every()
            .and_then(|every| every.interval)
            .unwrap_or(self.default_check_interval);

        let plan = Plan {
            id: Uuid::new_v4().to_string(),
            check: checkable.check_plan(
                from_version,
                &format_duration(interval),
                resource_types,
                &defaults,
                &base_defaults,
            ),
        };

        let request = AdmissionRequest {
            checkable: checkable.key(),
            team_id: checkable.team_id(),
            pipeline_id: checkable.pipeline_id(),
            plan,
            manually_triggered,
            span_context: current_span_context(),
        };

        let admission = self.ledger.admit(request).await?;

        if admission.created {
            self.checks_enqueued.fetch_add(1, Ordering::Relaxed);
            info!(
                build_id = %admission.build.id,
                checkable = %checkable.key(),
                manually_triggered,
                "Check created"
            );
        } else {
            debug!(
                build_id = %admission.build.id,
                checkable = %checkable.key(),
                "check-already-exists"
            );
        }

        Ok(admission)
    }
}

/// Identifies the span the admission runs in, for correlating the build
/// with the sweep that created it.
///
/// The id is a `tracing` span id and only meaningful within this process;
/// it is not a propagatable trace context.
fn current_span_context() -> SpanContext {
    let mut context = SpanContext::new();
    if let Some(id) = tracing::Span::current().id() {
        context.insert("span_id".to_string(), id.into_u64().to_string());
    }
    context
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{CheckableStore, ConfigStore, MemoryStore, SavePipeline};
    use gantry_core::defaults::DefaultsSnapshot;
    use gantry_core::domain::build::BuildStatus;
    use gantry_core::domain::check_every::CheckEvery;
    use gantry_core::domain::pipeline::{ConfigVersion, PipelineConfig, PipelineRef, ResourceConfig, ResourceTypeConfig};
    use gantry_core::domain::source::Source;

    /// Saves `config` as pipeline `p` of team `main`.
    pub(crate) async fn seed(store: &MemoryStore, config: PipelineConfig) {
        let team = store.find_team("main").await.unwrap().unwrap();
        store
            .save_pipeline(SavePipeline {
                team: &team,
                pipeline_ref: &PipelineRef::new("p"),
                config: &config,
                from_version: ConfigVersion(0),
                initially_paused: false,
                base_defaults: &DefaultsSnapshot::new(),
            })
            .await
            .unwrap();
    }

    pub(crate) fn resource_type(name: &str, type_: &str) -> ResourceTypeConfig {
        ResourceTypeConfig {
            name: name.to_string(),
            type_: type_.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn resource(name: &str, type_: &str) -> ResourceConfig {
        ResourceConfig {
            name: name.to_string(),
            type_: type_.to_string(),
            ..Default::default()
        }
    }

    async fn setup(config: PipelineConfig) -> (Arc<MemoryStore>, CheckAdmission, Checkable, ResourceTypes) {
        let store = Arc::new(MemoryStore::new());
        seed(&store, config).await;
        let admission = CheckAdmission::new(
            store.clone(),
            BaseResourceTypeDefaults::default(),
            Duration::from_secs(60),
        );
        let resource = store.resources().await.unwrap().remove(0);
        let types = store.resource_types().await.unwrap();
        (store, admission, resource.into(), types)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_creates_exactly_once() {
        let (_store, admission, checkable, types) = setup(PipelineConfig {
            resource_types: vec![],
            resources: vec![resource("r", "git")],
        })
        .await;
        let admission = Arc::new(admission);
        let types = Arc::new(types);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let admission = admission.clone();
                let checkable = checkable.clone();
                let types = types.clone();
                tokio::spawn(async move { admission.try_create_check(&checkable, &types, None, false).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(results.iter().filter(|a| a.created).count(), 1);
        let build_id = results[0].build.id;
        assert!(results.iter().all(|a| a.build.id == build_id));
        assert_eq!(admission.checks_enqueued(), 1);
    }

    #[tokio::test]
    async fn test_supersedes_finished_build_and_its_events() {
        let (store, admission, checkable, types) = setup(PipelineConfig {
            resource_types: vec![],
            resources: vec![resource("r", "git")],
        })
        .await;

        let first = admission.try_create_check(&checkable, &types, None, false).await.unwrap();
        assert!(first.created);
        store.finish_build(first.build.id, BuildStatus::Succeeded).await.unwrap();

        let second = admission.try_create_check(&checkable, &types, None, false).await.unwrap();
        assert!(second.created);
        assert_ne!(second.build.id, first.build.id);

        assert!(store.find_build(first.build.id).await.unwrap().is_none());
        assert!(matches!(
            store.build_events(first.build.id).await,
            Err(StoreError::BuildNotFound(_))
        ));
        assert_eq!(store.builds_for(checkable.key()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_running_build_is_returned() {
        let (_store, admission, checkable, types) = setup(PipelineConfig {
            resource_types: vec![],
            resources: vec![resource("r", "git")],
        })
        .await;

        let first = admission.try_create_check(&checkable, &types, None, false).await.unwrap();
        let second = admission.try_create_check(&checkable, &types, None, false).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.build.id, first.build.id);
    }

    #[tokio::test]
    async fn test_manual_check_runs_alongside_in_flight_build() {
        let (store, admission, checkable, types) = setup(PipelineConfig {
            resource_types: vec![],
            resources: vec![resource("r", "git")],
        })
        .await;

        let automatic = admission.try_create_check(&checkable, &types, None, false).await.unwrap();
        let manual = admission.try_create_check(&checkable, &types, None, true).await.unwrap();

        assert!(manual.created);
        assert!(manual.build.manually_triggered);
        assert_ne!(manual.build.id, automatic.build.id);

        let builds = store.builds_for(checkable.key()).await.unwrap();
        assert_eq!(builds.len(), 2);
        assert!(builds.iter().all(|b| b.is_running()));
    }

    #[tokio::test]
    async fn test_plan_carries_interval_defaults_and_from_version() {
        let mut parent = resource_type("custom", "registry-image");
        parent.defaults = Some([("branch", "main")].into_iter().collect());
        let mut child = resource("r", "custom");
        child.source = [("uri", "git@example.com")].into_iter().collect();
        child.check_every = Some(CheckEvery::every(Duration::from_secs(90)));

        let (_store, admission, checkable, types) = setup(PipelineConfig {
            resource_types: vec![parent],
            resources: vec![child],
        })
        .await;

        let from: Version = [("ref".to_string(), "abc".to_string())].into();
        let admitted = admission
            .try_create_check(&checkable, &types, Some(&from), false)
            .await
            .unwrap();

        let plan = admitted.build.plan.check;
        assert_eq!(plan.interval, "1m30s");
        assert_eq!(plan.source["branch"], "main");
        assert_eq!(plan.source["uri"], "git@example.com");
        assert_eq!(plan.from_version, Some(from));
        assert_eq!(plan.versioned_resource_types.len(), 1);
        assert_eq!(plan.resource.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_default_interval_and_base_defaults() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![],
                resources: vec![resource("r", "git")],
            },
        )
        .await;
        let base: Source = [("depth", 1)].into_iter().collect();
        let admission = CheckAdmission::new(
            store.clone(),
            BaseResourceTypeDefaults::new([("git".to_string(), base)].into()),
            Duration::from_secs(60),
        );
        let checkable: Checkable = store.resources().await.unwrap().remove(0).into();

        let admitted = admission
            .try_create_check(&checkable, &ResourceTypes::default(), None, false)
            .await
            .unwrap();

        assert_eq!(admitted.build.plan.check.interval, "1m0s");
        assert_eq!(admitted.build.plan.check.source["depth"], 1);
    }

    #[tokio::test]
    async fn test_unknown_checkable_is_an_error() {
        let (_store, admission, checkable, types) = setup(PipelineConfig {
            resource_types: vec![],
            resources: vec![resource("r", "git")],
        })
        .await;
        let Checkable::Resource(mut ghost) = checkable else {
            unreachable!()
        };
        ghost.id = Uuid::new_v4();

        let result = admission.try_create_check(&ghost.into(), &types, None, false).await;
        assert!(matches!(
            result,
            Err(AdmissionError::Store(StoreError::CheckableNotFound(_)))
        ));
        assert_eq!(admission.checks_enqueued(), 0);
    }
}
