//! Build Service
//!
//! Inspection of check builds and the completion hook used by the
//! execution engine.

use gantry_core::domain::build::{Build, BuildEvent, BuildStatus};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{BuildLedger, StoreError};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build not found: {0}")]
    NotFound(Uuid),

    #[error("build {0} has already finished")]
    AlreadyFinished(Uuid),

    #[error("cannot finish a build as {0}")]
    NotTerminal(BuildStatus),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for BuildError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BuildNotFound(id) => BuildError::NotFound(id),
            StoreError::BuildAlreadyFinished(id) => BuildError::AlreadyFinished(id),
            other => BuildError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

pub async fn get_build(ledger: &dyn BuildLedger, id: Uuid) -> Result<Build> {
    ledger.find_build(id).await?.ok_or(BuildError::NotFound(id))
}

pub async fn get_build_events(ledger: &dyn BuildLedger, id: Uuid) -> Result<Vec<BuildEvent>> {
    Ok(ledger.build_events(id).await?)
}

/// Record the final status of a build
pub async fn finish_build(ledger: &dyn BuildLedger, id: Uuid, status: BuildStatus) -> Result<Build> {
    if !status.is_terminal() {
        return Err(BuildError::NotTerminal(status));
    }

    let build = ledger.finish_build(id, status).await?;
    tracing::info!(build_id = %id, status = %status, "Build finished");
    Ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::admission::CheckAdmission;
    use crate::service::admission::tests::{resource, seed};
    use crate::store::{CheckableStore, MemoryStore};
    use gantry_core::defaults::BaseResourceTypeDefaults;
    use gantry_core::domain::pipeline::PipelineConfig;
    use gantry_core::domain::resource::Checkable;
    use gantry_core::resolver::ResourceTypes;
    use std::sync::Arc;
    use std::time::Duration;

    async fn started_build(store: &Arc<MemoryStore>) -> Build {
        seed(
            store,
            PipelineConfig {
                resource_types: vec![],
                resources: vec![resource("r", "git")],
            },
        )
        .await;
        let admission = CheckAdmission::new(store.clone(), BaseResourceTypeDefaults::default(), Duration::from_secs(60));
        let checkable: Checkable = store.resources().await.unwrap().remove(0).into();
        admission
            .try_create_check(&checkable, &ResourceTypes::default(), None, false)
            .await
            .unwrap()
            .build
    }

    #[tokio::test]
    async fn test_finish_build() {
        let store = Arc::new(MemoryStore::new());
        let build = started_build(&store).await;

        assert!(matches!(
            finish_build(&*store, build.id, BuildStatus::Started).await,
            Err(BuildError::NotTerminal(BuildStatus::Started))
        ));

        let finished = finish_build(&*store, build.id, BuildStatus::Failed).await.unwrap();
        assert_eq!(finished.status, BuildStatus::Failed);

        assert!(matches!(
            finish_build(&*store, build.id, BuildStatus::Succeeded).await,
            Err(BuildError::AlreadyFinished(_))
        ));

        let events = get_build_events(&*store, build.id).await.unwrap();
        let statuses: Vec<_> = events.iter().map(|e| e.payload["status"].clone()).collect();
        assert_eq!(statuses, vec!["started", "failed"]);
    }

    #[tokio::test]
    async fn test_unknown_build() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(get_build(&store, id).await, Err(BuildError::NotFound(_))));
        assert!(matches!(get_build_events(&store, id).await, Err(BuildError::NotFound(_))));
    }
}
