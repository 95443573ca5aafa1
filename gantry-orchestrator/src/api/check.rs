//! Manual Check API Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use gantry_core::domain::build::Build;
use gantry_core::dto::check::CheckRequest;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::api::pipeline::{QueryParams, pipeline_ref};
use crate::service::check_service::{self, CheckTarget, ManualCheck};

/// An empty body means "check from the pinned version"
fn parse_request(body: &[u8]) -> ApiResult<CheckRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CheckRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("malformed check request: {}", e)))
}

async fn check(
    state: AppState,
    team: String,
    pipeline: String,
    params: QueryParams,
    target: CheckTarget,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Build>)> {
    let request = parse_request(&body)?;
    let pipeline_ref = pipeline_ref(pipeline, &params)?;

    let build = check_service::check_now(
        state.config_store.as_ref(),
        state.checkables.as_ref(),
        &state.admission,
        ManualCheck {
            team_name: &team,
            pipeline_ref: &pipeline_ref,
            target,
            from: request.from,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(build)))
}

/// POST /teams/{team}/pipelines/{pipeline}/resources/{resource}/check
pub async fn check_resource(
    State(state): State<AppState>,
    Path((team, pipeline, resource)): Path<(String, String, String)>,
    Query(params): Query<QueryParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Build>)> {
    tracing::info!("Manual check of resource {}/{}/{}", team, pipeline, resource);
    check(state, team, pipeline, params, CheckTarget::Resource(resource), body).await
}

/// POST /teams/{team}/pipelines/{pipeline}/resource-types/{resource_type}/check
pub async fn check_resource_type(
    State(state): State<AppState>,
    Path((team, pipeline, resource_type)): Path<(String, String, String)>,
    Query(params): Query<QueryParams>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Build>)> {
    tracing::info!("Manual check of resource type {}/{}/{}", team, pipeline, resource_type);
    check(state, team, pipeline, params, CheckTarget::ResourceType(resource_type), body).await
}
