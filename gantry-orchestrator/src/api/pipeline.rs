//! Pipeline API Handlers
//!
//! HTTP endpoints for saving, listing and exposing pipelines.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
};
use gantry_core::domain::pipeline::{ConfigVersion, Pipeline, PipelineConfig, PipelineRef, instance_vars_from_query};
use gantry_core::dto::pipeline::{CONFIG_VERSION_HEADER, SaveConfigResponse};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::pipeline_service::{self, SaveConfig};

pub type QueryParams = Vec<(String, String)>;

/// Pipeline reference from a path name and `vars.<key>` query parameters
pub fn pipeline_ref(name: String, params: &QueryParams) -> ApiResult<PipelineRef> {
    let vars = instance_vars_from_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let pipeline_ref = PipelineRef::new(name);
    Ok(match vars {
        Some(vars) => pipeline_ref.with_instance_vars(vars),
        None => pipeline_ref,
    })
}

fn parse_config(headers: &HeaderMap, body: &[u8]) -> ApiResult<PipelineConfig> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or_default().trim();

    match mime {
        "application/json" => serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("malformed config: {}", e))),
        "application/x-yaml" | "application/yaml" | "text/yaml" => serde_yaml::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("malformed config: {}", e))),
        other => Err(ApiError::UnsupportedMediaType(format!(
            "unsupported content type: {:?}",
            other
        ))),
    }
}

fn config_version(headers: &HeaderMap) -> ApiResult<ConfigVersion> {
    match headers.get(CONFIG_VERSION_HEADER) {
        None => Ok(ConfigVersion::default()),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| ApiError::BadRequest("config version is malformed".to_string())),
    }
}

/// PUT /teams/{team}/pipelines/{pipeline}/config
/// Create or update a pipeline config
pub async fn save_config(
    State(state): State<AppState>,
    Path((team, pipeline)): Path<(String, String)>,
    Query(params): Query<QueryParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SaveConfigResponse>)> {
    tracing::info!("Saving config of pipeline {}/{}", team, pipeline);

    let config = parse_config(&headers, &body)?;
    let from_version = config_version(&headers)?;
    let pipeline_ref = pipeline_ref(pipeline, &params)?;
    let initially_paused = params.iter().any(|(k, v)| k == "paused" && v == "true");

    let saved = pipeline_service::save_config(
        state.config_store.as_ref(),
        &state.base_defaults,
        state.enable_pipeline_instances,
        SaveConfig {
            team_name: team,
            pipeline_ref,
            config,
            from_version,
            initially_paused,
        },
    )
    .await?;

    let status = if saved.created {
        StatusCode::CREATED
    } else {
        state.scan_notify.notify_one();
        StatusCode::OK
    };

    Ok((
        status,
        Json(SaveConfigResponse {
            errors: Vec::new(),
            warnings: saved.warnings,
        }),
    ))
}

/// GET /teams/{team}/pipelines/{pipeline}
/// Get a pipeline by reference
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path((team, pipeline)): Path<(String, String)>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Pipeline>> {
    let pipeline_ref = pipeline_ref(pipeline, &params)?;
    tracing::debug!("Getting pipeline: {}/{}", team, pipeline_ref);

    let pipeline = pipeline_service::get_pipeline(state.config_store.as_ref(), &team, &pipeline_ref).await?;
    Ok(Json(pipeline))
}

/// GET /pipelines
/// List all pipelines
pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<Json<Vec<Pipeline>>> {
    tracing::debug!("Listing all pipelines");

    let pipelines = pipeline_service::list_pipelines(state.config_store.as_ref()).await?;
    Ok(Json(pipelines))
}

/// GET /teams/{team}/pipelines
pub async fn list_team_pipelines(
    State(state): State<AppState>,
    Path(team): Path<String>,
) -> ApiResult<Json<Vec<Pipeline>>> {
    let pipelines = pipeline_service::list_team_pipelines(state.config_store.as_ref(), &team).await?;
    Ok(Json(pipelines))
}

/// GET /pipelines/visible?team=a&team=b
/// Pipelines of the given teams plus every public pipeline
pub async fn list_visible_pipelines(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Vec<Pipeline>>> {
    let teams: Vec<String> = params
        .into_iter()
        .filter(|(k, _)| k == "team")
        .map(|(_, v)| v)
        .collect();

    let pipelines = pipeline_service::list_visible_pipelines(state.config_store.as_ref(), &teams).await?;
    Ok(Json(pipelines))
}

/// PUT /teams/{team}/pipelines/{pipeline}/expose
pub async fn expose_pipeline(
    State(state): State<AppState>,
    Path((team, pipeline)): Path<(String, String)>,
    Query(params): Query<QueryParams>,
) -> ApiResult<StatusCode> {
    let pipeline_ref = pipeline_ref(pipeline, &params)?;
    pipeline_service::set_public(state.config_store.as_ref(), &team, &pipeline_ref, true).await?;
    Ok(StatusCode::OK)
}

/// PUT /teams/{team}/pipelines/{pipeline}/hide
pub async fn hide_pipeline(
    State(state): State<AppState>,
    Path((team, pipeline)): Path<(String, String)>,
    Query(params): Query<QueryParams>,
) -> ApiResult<StatusCode> {
    let pipeline_ref = pipeline_ref(pipeline, &params)?;
    pipeline_service::set_public(state.config_store.as_ref(), &team, &pipeline_ref, false).await?;
    Ok(StatusCode::OK)
}
