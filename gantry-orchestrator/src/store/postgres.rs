//! PostgreSQL store
//!
//! Implements the storage traits on top of the repository functions.
//! Multi-statement operations run in one transaction; admission locks the
//! checkable's row before reading its builds.

use async_trait::async_trait;
use gantry_core::admission::{Admission, AdmissionDecision, AdmissionRequest, decide};
use gantry_core::domain::build::{Build, BuildEvent, BuildStatus};
use gantry_core::domain::pipeline::{Pipeline, PipelineRef, Team};
use gantry_core::domain::resource::{Checkable, CheckableKey, Resource, ResourceType};
use gantry_core::resolver::ResourceTypes;
use gantry_core::scope::ScopeKey;
use sqlx::PgPool;
use uuid::Uuid;

use super::{BuildLedger, CheckableStore, ConfigStore, SavePipeline, StoreError, StoreResult};
use crate::repository::{build_repository, pipeline_repository, resource_repository, scope_repository};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn find_team(&self, name: &str) -> StoreResult<Option<Team>> {
        Ok(pipeline_repository::find_team(&self.pool, name).await?)
    }

    async fn save_pipeline(&self, save: SavePipeline<'_>) -> StoreResult<(Pipeline, bool)> {
        let mut tx = self.pool.begin().await?;

        let (pipeline_id, created) =
            match pipeline_repository::lock(&mut tx, save.team.id, save.pipeline_ref).await? {
                Some((id, stored)) => {
                    let swapped =
                        pipeline_repository::compare_and_swap_config(&mut tx, id, save.from_version, save.config)
                            .await?;
                    if !swapped {
                        return Err(StoreError::ConfigVersionConflict {
                            expected: save.from_version,
                            actual: stored,
                        });
                    }
                    (id, false)
                }
                None => {
                    let id = pipeline_repository::create(
                        &mut tx,
                        save.team.id,
                        save.pipeline_ref,
                        save.config,
                        save.initially_paused,
                    )
                    .await?;
                    (id, true)
                }
            };

        resource_repository::deactivate_all(&mut tx, pipeline_id).await?;
        for (position, config) in save.config.resource_types.iter().enumerate() {
            resource_repository::upsert_resource_type(&mut tx, pipeline_id, config, position).await?;
        }
        for (position, config) in save.config.resources.iter().enumerate() {
            resource_repository::upsert_resource(&mut tx, pipeline_id, config, position).await?;
        }

        let types = ResourceTypes::new(
            resource_repository::list_active_resource_types(&mut *tx, Some(pipeline_id)).await?,
        );
        let resources = resource_repository::list_pipeline_resources(&mut tx, pipeline_id).await?;

        let checkables = types
            .iter()
            .cloned()
            .map(Checkable::from)
            .chain(resources.into_iter().map(Checkable::from));
        for checkable in checkables {
            let key = ScopeKey::for_checkable(&checkable, &types, save.base_defaults);
            let scope_id = scope_repository::find_or_create(&mut tx, &key).await?;
            resource_repository::set_scope(&mut tx, checkable.key(), scope_id).await?;
        }

        let pipeline = pipeline_repository::find_by_id(&mut *tx, pipeline_id)
            .await?
            .ok_or(StoreError::PipelineNotFound(pipeline_id))?;

        tx.commit().await?;

        Ok((pipeline, created))
    }

    async fn find_pipeline(&self, team: &Team, pipeline_ref: &PipelineRef) -> StoreResult<Option<Pipeline>> {
        Ok(pipeline_repository::find(&self.pool, team.id, pipeline_ref).await?)
    }

    async fn all_pipelines(&self) -> StoreResult<Vec<Pipeline>> {
        Ok(pipeline_repository::list_all(&self.pool).await?)
    }

    async fn visible_pipelines(&self, team_names: &[String]) -> StoreResult<Vec<Pipeline>> {
        Ok(pipeline_repository::list_visible(&self.pool, team_names).await?)
    }

    async fn set_pipeline_public(&self, pipeline_id: Uuid, public: bool) -> StoreResult<()> {
        if !pipeline_repository::set_public(&self.pool, pipeline_id, public).await? {
            return Err(StoreError::PipelineNotFound(pipeline_id));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckableStore for PgStore {
    async fn resources(&self) -> StoreResult<Vec<Resource>> {
        resource_repository::list_active_resources(&self.pool).await
    }

    async fn resource_types(&self) -> StoreResult<ResourceTypes> {
        let types = resource_repository::list_active_resource_types(&self.pool, None).await?;
        Ok(ResourceTypes::new(types))
    }

    async fn find_resource(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<Resource>> {
        resource_repository::find_resource(&self.pool, pipeline_id, name).await
    }

    async fn find_resource_type(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<ResourceType>> {
        resource_repository::find_resource_type(&self.pool, pipeline_id, name).await
    }

    async fn pipeline_resource_types(&self, pipeline_id: Uuid) -> StoreResult<ResourceTypes> {
        let types = resource_repository::list_active_resource_types(&self.pool, Some(pipeline_id)).await?;
        Ok(ResourceTypes::new(types))
    }
}

#[async_trait]
impl BuildLedger for PgStore {
    async fn admit(&self, request: AdmissionRequest) -> StoreResult<Admission> {
        let mut tx = self.pool.begin().await?;

        if !resource_repository::lock_checkable(&mut tx, request.checkable).await? {
            return Err(StoreError::CheckableNotFound(request.checkable));
        }

        let existing = build_repository::list_for_checkable(&mut *tx, request.checkable).await?;

        let admission = match decide(&existing, request.manually_triggered) {
            AdmissionDecision::Existing(build) => Admission { build, created: false },
            AdmissionDecision::Create { superseded } => {
                build_repository::delete_with_events(&mut tx, &superseded).await?;

                let build = request.new_build();
                build_repository::create(&mut tx, &build).await?;
                build_repository::add_event(&mut tx, &BuildEvent::status(build.id, build.status)).await?;
                Admission { build, created: true }
            }
        };

        tx.commit().await?;
        Ok(admission)
    }

    async fn find_build(&self, id: Uuid) -> StoreResult<Option<Build>> {
        build_repository::find_by_id(&self.pool, id).await
    }

    async fn builds_for(&self, checkable: CheckableKey) -> StoreResult<Vec<Build>> {
        build_repository::list_for_checkable(&self.pool, checkable).await
    }

    async fn finish_build(&self, id: Uuid, status: BuildStatus) -> StoreResult<Build> {
        let mut tx = self.pool.begin().await?;

        let mut build = build_repository::find_for_update(&mut tx, id)
            .await?
            .ok_or(StoreError::BuildNotFound(id))?;
        if build.status.is_terminal() {
            return Err(StoreError::BuildAlreadyFinished(id));
        }

        let end_time = chrono::Utc::now();
        build_repository::finish(&mut tx, id, status, end_time).await?;
        build_repository::add_event(&mut tx, &BuildEvent::status(id, status)).await?;
        tx.commit().await?;

        build.status = status;
        build.end_time = Some(end_time);
        Ok(build)
    }

    async fn build_events(&self, id: Uuid) -> StoreResult<Vec<BuildEvent>> {
        if build_repository::find_by_id(&self.pool, id).await?.is_none() {
            return Err(StoreError::BuildNotFound(id));
        }
        Ok(build_repository::list_events(&self.pool, id).await?)
    }
}
