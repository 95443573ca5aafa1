//! Pipeline Service
//!
//! Business logic for saving and listing pipeline configs.

use gantry_core::defaults::BaseResourceTypeDefaults;
use gantry_core::domain::pipeline::{ConfigVersion, Pipeline, PipelineConfig, PipelineRef, Team};
use gantry_core::validate::{ConfigWarning, ValidationReport, validate_config, validate_identifier};
use thiserror::Error;

use crate::store::{ConfigStore, SavePipeline, StoreError};

/// Service error type
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {}", .0.errors.join("; "))]
    Validation(ValidationReport),

    #[error("support for instance vars is disabled")]
    InstanceVarsDisabled,

    #[error("pipeline config version {expected} is stale, current version is {actual}")]
    Conflict {
        expected: ConfigVersion,
        actual: ConfigVersion,
    },

    #[error("team not found: {0}")]
    TeamNotFound(String),

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConfigVersionConflict { expected, actual } => PipelineError::Conflict { expected, actual },
            other => PipelineError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A config save as received from a client
#[derive(Debug, Clone)]
pub struct SaveConfig {
    pub team_name: String,
    pub pipeline_ref: PipelineRef,
    pub config: PipelineConfig,
    pub from_version: ConfigVersion,
    pub initially_paused: bool,
}

#[derive(Debug, Clone)]
pub struct SavedConfig {
    pub pipeline: Pipeline,
    pub created: bool,
    pub warnings: Vec<ConfigWarning>,
}

/// Validate and save a pipeline config
pub async fn save_config(
    store: &dyn ConfigStore,
    base_defaults: &BaseResourceTypeDefaults,
    enable_pipeline_instances: bool,
    req: SaveConfig,
) -> Result<SavedConfig> {
    if req.pipeline_ref.instance_vars.is_some() && !enable_pipeline_instances {
        return Err(PipelineError::InstanceVarsDisabled);
    }

    let report = validate_request(&req);
    if !report.is_valid() {
        return Err(PipelineError::Validation(report));
    }

    let team = find_team(store, &req.team_name).await?;
    let defaults = base_defaults.load();

    let (pipeline, created) = store
        .save_pipeline(SavePipeline {
            team: &team,
            pipeline_ref: &req.pipeline_ref,
            config: &req.config,
            from_version: req.from_version,
            initially_paused: req.initially_paused,
            base_defaults: &defaults,
        })
        .await?;

    tracing::info!(
        team = %team.name,
        pipeline = %pipeline.pipeline_ref(),
        version = %pipeline.config_version,
        created,
        "Pipeline config saved"
    );

    Ok(SavedConfig {
        pipeline,
        created,
        warnings: report.warnings,
    })
}

fn validate_request(req: &SaveConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    for (identifier, kind) in [(&req.pipeline_ref.name, "pipeline"), (&req.team_name, "team")] {
        match validate_identifier(identifier, kind) {
            Ok(Some(warning)) => report.warnings.push(warning),
            Ok(None) => {}
            Err(message) => report.errors.push(message),
        }
    }

    let config_report = validate_config(&req.config);
    report.errors.extend(config_report.errors);
    report.warnings.extend(config_report.warnings);
    report
}

pub async fn find_team(store: &dyn ConfigStore, team_name: &str) -> Result<Team> {
    store
        .find_team(team_name)
        .await?
        .ok_or_else(|| PipelineError::TeamNotFound(team_name.to_string()))
}

/// Find a pipeline of a team by reference
pub async fn get_pipeline(store: &dyn ConfigStore, team_name: &str, pipeline_ref: &PipelineRef) -> Result<Pipeline> {
    let team = find_team(store, team_name).await?;
    store
        .find_pipeline(&team, pipeline_ref)
        .await?
        .ok_or_else(|| PipelineError::PipelineNotFound(pipeline_ref.to_string()))
}

/// List all pipelines
pub async fn list_pipelines(store: &dyn ConfigStore) -> Result<Vec<Pipeline>> {
    Ok(store.all_pipelines().await?)
}

/// List the pipelines of one team
pub async fn list_team_pipelines(store: &dyn ConfigStore, team_name: &str) -> Result<Vec<Pipeline>> {
    let team = find_team(store, team_name).await?;
    let pipelines = store.all_pipelines().await?;
    Ok(pipelines.into_iter().filter(|p| p.team_id == team.id).collect())
}

/// List pipelines visible to members of `team_names`
pub async fn list_visible_pipelines(store: &dyn ConfigStore, team_names: &[String]) -> Result<Vec<Pipeline>> {
    Ok(store.visible_pipelines(team_names).await?)
}

/// Expose or hide a pipeline
pub async fn set_public(
    store: &dyn ConfigStore,
    team_name: &str,
    pipeline_ref: &PipelineRef,
    public: bool,
) -> Result<()> {
    let pipeline = get_pipeline(store, team_name, pipeline_ref).await?;
    store.set_pipeline_public(pipeline.id, public).await?;

    tracing::info!(pipeline = %pipeline_ref, public, "Pipeline visibility changed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::admission::tests::{resource, resource_type};
    use crate::store::MemoryStore;
    use gantry_core::domain::pipeline::InstanceVars;

    fn request(name: &str, config: PipelineConfig, from_version: i64) -> SaveConfig {
        SaveConfig {
            team_name: "main".to_string(),
            pipeline_ref: PipelineRef::new(name),
            config,
            from_version: ConfigVersion(from_version),
            initially_paused: false,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            resource_types: vec![resource_type("custom", "registry-image")],
            resources: vec![resource("repo", "custom")],
        }
    }

    #[tokio::test]
    async fn test_save_then_stale_save_conflicts() {
        let store = MemoryStore::new();
        let defaults = BaseResourceTypeDefaults::default();

        let saved = save_config(&store, &defaults, true, request("p", config(), 0)).await.unwrap();
        assert!(saved.created);
        assert!(saved.warnings.is_empty());

        let updated = save_config(&store, &defaults, true, request("p", config(), 1)).await.unwrap();
        assert!(!updated.created);

        let err = save_config(&store, &defaults, true, request("p", PipelineConfig::default(), 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Conflict {
                expected: ConfigVersion(1),
                actual: ConfigVersion(2)
            }
        ));

        let stored = get_pipeline(&store, "main", &PipelineRef::new("p")).await.unwrap();
        assert_eq!(stored.config_version, ConfigVersion(2));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_with_report() {
        let store = MemoryStore::new();
        let bad = PipelineConfig {
            resource_types: vec![resource_type("a", "b"), resource_type("b", "a")],
            resources: vec![],
        };

        let err = save_config(&store, &BaseResourceTypeDefaults::default(), true, request("Bad-Name", bad, 0))
            .await
            .unwrap_err();

        let PipelineError::Validation(report) = err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(store.all_pipelines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identifier_warnings_do_not_block_save() {
        let store = MemoryStore::new();
        let saved = save_config(&store, &BaseResourceTypeDefaults::default(), true, request("My_Pipeline", config(), 0))
            .await
            .unwrap();
        assert_eq!(saved.warnings.len(), 1);
        assert_eq!(saved.warnings[0].kind, "invalid_identifier");
    }

    #[tokio::test]
    async fn test_unknown_team() {
        let store = MemoryStore::new();
        let mut req = request("p", config(), 0);
        req.team_name = "nope".to_string();

        let err = save_config(&store, &BaseResourceTypeDefaults::default(), true, req)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TeamNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_instance_vars_can_be_disabled() {
        let store = MemoryStore::new();
        let vars: InstanceVars = [("branch".to_string(), serde_json::json!("main"))].into();
        let mut req = request("p", config(), 0);
        req.pipeline_ref = req.pipeline_ref.with_instance_vars(vars);

        let err = save_config(&store, &BaseResourceTypeDefaults::default(), false, req.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InstanceVarsDisabled));

        let saved = save_config(&store, &BaseResourceTypeDefaults::default(), true, req)
            .await
            .unwrap();
        assert_eq!(saved.pipeline.pipeline_ref().to_string(), "p/branch:main");
    }

    #[tokio::test]
    async fn test_expose_and_list() {
        let store = MemoryStore::new();
        let defaults = BaseResourceTypeDefaults::default();
        store.create_team("other");
        let mut theirs = request("theirs", config(), 0);
        theirs.team_name = "other".to_string();
        save_config(&store, &defaults, true, theirs).await.unwrap();
        save_config(&store, &defaults, true, request("mine", config(), 0)).await.unwrap();

        let visible = list_visible_pipelines(&store, &["main".to_string()]).await.unwrap();
        assert_eq!(visible.len(), 1);

        set_public(&store, "other", &PipelineRef::new("theirs"), true).await.unwrap();
        let visible = list_visible_pipelines(&store, &["main".to_string()]).await.unwrap();
        assert_eq!(visible.len(), 2);

        assert_eq!(list_team_pipelines(&store, "other").await.unwrap().len(), 1);
        assert_eq!(list_pipelines(&store).await.unwrap().len(), 2);

        assert!(matches!(
            set_public(&store, "main", &PipelineRef::new("missing"), true).await,
            Err(PipelineError::PipelineNotFound(_))
        ));
    }
}
