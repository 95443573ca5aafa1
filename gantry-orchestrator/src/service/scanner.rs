//! Check Scanner
//!
//! One sweep over every active resource of the installation. Each resource
//! gets its own task; a task admits the resource's parent type (and that
//! type's parent, recursively) before the resource itself. A type shared by
//! many resources is attempted once per sweep.

use gantry_core::domain::resource::Checkable;
use gantry_core::resolver::ResourceTypes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::service::admission::CheckAdmission;
use crate::store::{CheckableStore, StoreError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to get resources: {0}")]
    Resources(#[source] StoreError),

    #[error("failed to get resource types: {0}")]
    ResourceTypes(#[source] StoreError),
}

/// Counts of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub resources: usize,
    pub skipped: usize,
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
    pub panicked: usize,
}

#[derive(Debug, Default)]
struct Counters {
    skipped: AtomicUsize,
    created: AtomicUsize,
    existing: AtomicUsize,
    failed: AtomicUsize,
    panicked: AtomicUsize,
}

pub struct Scanner {
    checkables: Arc<dyn CheckableStore>,
    admission: Arc<CheckAdmission>,
}

impl Scanner {
    pub fn new(checkables: Arc<dyn CheckableStore>, admission: Arc<CheckAdmission>) -> Self {
        Self { checkables, admission }
    }

    /// Runs one sweep and waits for every task to finish.
    ///
    /// Fails only when resources or resource types cannot be read. Tasks
    /// observing `cancel` skip admission.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ScanSummary, ScanError> {
        info!("Scan started");

        let resources = self.checkables.resources().await.map_err(|e| {
            error!(error = %e, "failed-to-get-resources");
            ScanError::Resources(e)
        })?;

        let resource_types = self.checkables.resource_types().await.map_err(|e| {
            error!(error = %e, "failed-to-get-resource-types");
            ScanError::ResourceTypes(e)
        })?;

        let sweep = Arc::new(Sweep {
            admission: self.admission.clone(),
            resource_types,
            attempted: Mutex::new(HashSet::new()),
            counters: Counters::default(),
            cancel: cancel.clone(),
        });

        let total = resources.len();
        let mut handles = Vec::with_capacity(total);

        for resource in resources {
            let identity = format!("{}/{}/{}", resource.team_name, resource.pipeline_name, resource.name);
            let span = info_span!(
                "scanner.check",
                team = %resource.team_name,
                pipeline = %resource.pipeline_name,
                resource = %resource.name,
                kind = %resource.type_,
            );
            let sweep = sweep.clone();
            let handle = tokio::spawn(
                async move {
                    let checkable = Checkable::from(resource);
                    if checkable.never_checked() {
                        sweep.counters.skipped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    sweep.check(checkable).await;
                }
                .instrument(span),
            );
            handles.push((identity, handle));
        }

        for (identity, handle) in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(resource = %identity, "panic in scanner run: {}", e);
                    sweep.counters.panicked.fetch_add(1, Ordering::Relaxed);
                } else {
                    error!(resource = %identity, "scanner task cancelled: {}", e);
                }
            }
        }

        let counters = &sweep.counters;
        let summary = ScanSummary {
            resources: total,
            skipped: counters.skipped.load(Ordering::Relaxed),
            created: counters.created.load(Ordering::Relaxed),
            existing: counters.existing.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
        };

        info!(
            resources = summary.resources,
            created = summary.created,
            existing = summary.existing,
            failed = summary.failed,
            panicked = summary.panicked,
            checks_enqueued = self.admission.checks_enqueued(),
            "Scan finished"
        );

        Ok(summary)
    }
}

/// State shared by the tasks of one sweep
struct Sweep {
    admission: Arc<CheckAdmission>,
    resource_types: ResourceTypes,
    /// Resource types whose admission has been claimed by some task
    attempted: Mutex<HashSet<Uuid>>,
    counters: Counters,
    cancel: CancellationToken,
}

impl Sweep {
    /// Admits `checkable` after its unclaimed parent type.
    ///
    /// Recursion depth is bounded by the length of the type chain.
    fn check(&self, checkable: Checkable) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Some(parent) = self.resource_types.parent(&checkable) {
                let claimed = self.attempted.lock().insert(parent.id);
                if claimed {
                    let parent = Checkable::from(parent.clone());
                    let span = info_span!("scanner.check", resource_type = %parent.name());
                    self.check(parent).instrument(span).await;
                }
            }

            if checkable.never_checked() {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }

            if self.cancel.is_cancelled() {
                debug!(checkable = %checkable.key(), "scan cancelled, skipping check");
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }

            let version = checkable.current_pinned_version().cloned();
            match self
                .admission
                .try_create_check(&checkable, &self.resource_types, version.as_ref(), false)
                .await
            {
                Ok(admission) if admission.created => {
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {
                    self.counters.existing.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(
                        checkable = %checkable.key(),
                        resource_config_scope_id = ?checkable.resource_config_scope_id(),
                        error = %e,
                        "failed-to-create-check"
                    );
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::admission::tests::{resource, resource_type, seed};
    use crate::store::{BuildLedger, MemoryStore, StoreResult};
    use async_trait::async_trait;
    use gantry_core::admission::{Admission, AdmissionRequest};
    use gantry_core::defaults::BaseResourceTypeDefaults;
    use gantry_core::domain::build::{Build, BuildEvent, BuildStatus};
    use gantry_core::domain::check_every::CheckEvery;
    use gantry_core::domain::pipeline::PipelineConfig;
    use gantry_core::domain::resource::{CheckableKey, Resource, ResourceType};
    use std::time::Duration;

    /// Ledger that records admission order and can fail or panic on
    /// selected checkables
    struct RecordingLedger {
        inner: Arc<MemoryStore>,
        admitted: Mutex<Vec<String>>,
        fail: HashSet<String>,
        panic: HashSet<String>,
    }

    impl RecordingLedger {
        fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                admitted: Mutex::new(Vec::new()),
                fail: HashSet::new(),
                panic: HashSet::new(),
            }
        }

        fn admitted(&self) -> Vec<String> {
            self.admitted.lock().clone()
        }
    }

    #[async_trait]
    impl BuildLedger for RecordingLedger {
        async fn admit(&self, request: AdmissionRequest) -> StoreResult<Admission> {
            let name = request.plan.check.name.clone();
            if self.panic.contains(&name) {
                panic!("admission exploded for {name}");
            }
            if self.fail.contains(&name) {
                return Err(StoreError::CheckableNotFound(request.checkable));
            }
            // Widen the race window between sibling tasks.
            tokio::task::yield_now().await;
            self.admitted.lock().push(name);
            self.inner.admit(request).await
        }

        async fn find_build(&self, id: Uuid) -> StoreResult<Option<Build>> {
            self.inner.find_build(id).await
        }

        async fn builds_for(&self, checkable: CheckableKey) -> StoreResult<Vec<Build>> {
            self.inner.builds_for(checkable).await
        }

        async fn finish_build(&self, id: Uuid, status: BuildStatus) -> StoreResult<Build> {
            self.inner.finish_build(id, status).await
        }

        async fn build_events(&self, id: Uuid) -> StoreResult<Vec<BuildEvent>> {
            self.inner.build_events(id).await
        }
    }

    /// Checkable store whose reads can be made to fail
    struct BrokenStore {
        inner: Arc<MemoryStore>,
        resources_fail: bool,
    }

    #[async_trait]
    impl CheckableStore for BrokenStore {
        async fn resources(&self) -> StoreResult<Vec<Resource>> {
            if self.resources_fail {
                return Err(StoreError::PipelineNotFound(Uuid::nil()));
            }
            self.inner.resources().await
        }

        async fn resource_types(&self) -> StoreResult<ResourceTypes> {
            Err(StoreError::PipelineNotFound(Uuid::nil()))
        }

        async fn find_resource(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<Resource>> {
            self.inner.find_resource(pipeline_id, name).await
        }

        async fn find_resource_type(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<ResourceType>> {
            self.inner.find_resource_type(pipeline_id, name).await
        }

        async fn pipeline_resource_types(&self, pipeline_id: Uuid) -> StoreResult<ResourceTypes> {
            self.inner.pipeline_resource_types(pipeline_id).await
        }
    }

    fn scanner(store: &Arc<MemoryStore>, ledger: Arc<RecordingLedger>) -> Scanner {
        let admission = Arc::new(CheckAdmission::new(
            ledger,
            BaseResourceTypeDefaults::default(),
            Duration::from_secs(60),
        ));
        Scanner::new(store.clone(), admission)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parent_admitted_first_and_once() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![resource_type("a", "b"), resource_type("b", "b")],
                resources: (0..16).map(|i| resource(&format!("r{i}"), "a")).collect(),
            },
        )
        .await;
        let ledger = Arc::new(RecordingLedger::new(store.clone()));

        let summary = scanner(&store, ledger.clone()).run(&CancellationToken::new()).await.unwrap();

        let admitted = ledger.admitted();
        assert_eq!(admitted.iter().filter(|n| *n == "a").count(), 1);
        assert_eq!(admitted.iter().filter(|n| *n == "b").count(), 1);
        let b_at = admitted.iter().position(|n| n == "b").unwrap();
        let a_at = admitted.iter().position(|n| n == "a").unwrap();
        assert!(b_at < a_at, "{admitted:?}");
        assert_eq!(summary.resources, 16);
        assert_eq!(summary.created, 18);
        assert_eq!(summary.panicked, 0);
    }

    #[tokio::test]
    async fn test_chain_is_admitted_parent_first() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![resource_type("a", "b"), resource_type("b", "c"), resource_type("c", "docker")],
                resources: vec![resource("r", "a")],
            },
        )
        .await;
        let ledger = Arc::new(RecordingLedger::new(store.clone()));

        scanner(&store, ledger.clone()).run(&CancellationToken::new()).await.unwrap();

        assert_eq!(ledger.admitted(), vec!["c", "b", "a", "r"]);
    }

    #[tokio::test]
    async fn test_never_checked_resources_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut never = resource("never", "git");
        never.check_every = Some(CheckEvery::never());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![],
                resources: vec![never, resource("often", "git")],
            },
        )
        .await;
        let ledger = Arc::new(RecordingLedger::new(store.clone()));
        let scanner = scanner(&store, ledger.clone());

        for _ in 0..3 {
            let summary = scanner.run(&CancellationToken::new()).await.unwrap();
            assert_eq!(summary.skipped, 1);
        }

        assert!(!ledger.admitted().contains(&"never".to_string()));
        let never = store
            .resources()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.name == "never")
            .unwrap();
        assert!(store.builds_for(CheckableKey::Resource(never.id)).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panics_and_failures_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![],
                resources: vec![resource("boom", "git"), resource("broken", "git"), resource("fine", "git")],
            },
        )
        .await;
        let mut ledger = RecordingLedger::new(store.clone());
        ledger.panic.insert("boom".to_string());
        ledger.fail.insert("broken".to_string());
        let ledger = Arc::new(ledger);

        let summary = scanner(&store, ledger.clone()).run(&CancellationToken::new()).await.unwrap();

        assert_eq!(summary.panicked, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(ledger.admitted(), vec!["fine"]);
    }

    #[tokio::test]
    async fn test_second_sweep_finds_existing_checks() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![],
                resources: vec![resource("r", "git")],
            },
        )
        .await;
        let ledger = Arc::new(RecordingLedger::new(store.clone()));
        let scanner = scanner(&store, ledger);

        assert_eq!(scanner.run(&CancellationToken::new()).await.unwrap().created, 1);
        let second = scanner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.existing, 1);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_skips_admission() {
        let store = Arc::new(MemoryStore::new());
        seed(
            &store,
            PipelineConfig {
                resource_types: vec![],
                resources: vec![resource("r", "git")],
            },
        )
        .await;
        let ledger = Arc::new(RecordingLedger::new(store.clone()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = scanner(&store, ledger.clone()).run(&cancel).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert!(ledger.admitted().is_empty());
    }

    #[tokio::test]
    async fn test_enumeration_failures_abort_the_sweep() {
        let store = Arc::new(MemoryStore::new());
        let admission = Arc::new(CheckAdmission::new(
            store.clone(),
            BaseResourceTypeDefaults::default(),
            Duration::from_secs(60),
        ));

        let resources_broken = Scanner::new(
            Arc::new(BrokenStore {
                inner: store.clone(),
                resources_fail: true,
            }),
            admission.clone(),
        );
        assert!(matches!(
            resources_broken.run(&CancellationToken::new()).await,
            Err(ScanError::Resources(_))
        ));

        let types_broken = Scanner::new(
            Arc::new(BrokenStore {
                inner: store,
                resources_fail: false,
            }),
            admission,
        );
        assert!(matches!(
            types_broken.run(&CancellationToken::new()).await,
            Err(ScanError::ResourceTypes(_))
        ));
    }
}
