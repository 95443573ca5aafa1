//! Storage Module
//!
//! Trait-based storage seams for the control plane. Services depend on
//! these traits so they can run against PostgreSQL in production and the
//! in-memory store in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use gantry_core::admission::{Admission, AdmissionRequest};
use gantry_core::defaults::DefaultsSnapshot;
use gantry_core::domain::build::{Build, BuildEvent, BuildStatus};
use gantry_core::domain::pipeline::{ConfigVersion, Pipeline, PipelineConfig, PipelineRef, Team};
use gantry_core::domain::resource::{CheckableKey, Resource, ResourceType};
use gantry_core::resolver::ResourceTypes;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config version conflict: expected {expected}, stored {actual}")]
    ConfigVersionConflict {
        expected: ConfigVersion,
        actual: ConfigVersion,
    },

    #[error("pipeline not found: {0}")]
    PipelineNotFound(Uuid),

    #[error("build not found: {0}")]
    BuildNotFound(Uuid),

    #[error("build {0} is not linked to a checkable")]
    UnlinkedBuild(Uuid),

    #[error("build {0} has already finished")]
    BuildAlreadyFinished(Uuid),

    #[error("checkable not found: {0}")]
    CheckableNotFound(CheckableKey),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Arguments of a pipeline save
#[derive(Debug, Clone)]
pub struct SavePipeline<'a> {
    pub team: &'a Team,
    pub pipeline_ref: &'a PipelineRef,
    pub config: &'a PipelineConfig,
    /// Version the caller read; ignored when the pipeline does not exist yet
    pub from_version: ConfigVersion,
    /// Paused state of a newly created pipeline
    pub initially_paused: bool,
    /// Defaults used to compute resource config scopes
    pub base_defaults: &'a DefaultsSnapshot,
}

/// Pipeline configuration storage
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn find_team(&self, name: &str) -> StoreResult<Option<Team>>;

    /// Saves a pipeline config, comparing `from_version` against the stored
    /// version of an existing pipeline.
    ///
    /// Replaces the pipeline's active resources and resource types, keeping
    /// the identity and scope of declarations that survive. Returns the
    /// saved pipeline and whether it was created by this call.
    async fn save_pipeline(&self, save: SavePipeline<'_>) -> StoreResult<(Pipeline, bool)>;

    async fn find_pipeline(&self, team: &Team, pipeline_ref: &PipelineRef) -> StoreResult<Option<Pipeline>>;

    /// Every pipeline ordered by team, ordering, id.
    async fn all_pipelines(&self) -> StoreResult<Vec<Pipeline>>;

    /// Pipelines of the named teams plus every public pipeline.
    async fn visible_pipelines(&self, team_names: &[String]) -> StoreResult<Vec<Pipeline>>;

    async fn set_pipeline_public(&self, pipeline_id: Uuid, public: bool) -> StoreResult<()>;
}

/// Read access to the checkables of the installation
#[async_trait]
pub trait CheckableStore: Send + Sync {
    /// Active resources of every unpaused pipeline.
    async fn resources(&self) -> StoreResult<Vec<Resource>>;

    /// Active resource types of every pipeline.
    async fn resource_types(&self) -> StoreResult<ResourceTypes>;

    async fn find_resource(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<Resource>>;

    async fn find_resource_type(&self, pipeline_id: Uuid, name: &str) -> StoreResult<Option<ResourceType>>;

    /// Active resource types of one pipeline.
    async fn pipeline_resource_types(&self, pipeline_id: Uuid) -> StoreResult<ResourceTypes>;
}

/// Check builds and their event logs
#[async_trait]
pub trait BuildLedger: Send + Sync {
    /// Admits a check build for the request's checkable.
    ///
    /// The existence check, deletion of superseded builds, and insert happen
    /// as one atomic unit per checkable, following
    /// [`gantry_core::admission::decide`].
    async fn admit(&self, request: AdmissionRequest) -> StoreResult<Admission>;

    async fn find_build(&self, id: Uuid) -> StoreResult<Option<Build>>;

    async fn builds_for(&self, checkable: CheckableKey) -> StoreResult<Vec<Build>>;

    /// Moves a running build to a terminal status and records a status event.
    async fn finish_build(&self, id: Uuid, status: BuildStatus) -> StoreResult<Build>;

    async fn build_events(&self, id: Uuid) -> StoreResult<Vec<BuildEvent>>;
}
