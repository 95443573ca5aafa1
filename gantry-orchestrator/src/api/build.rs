//! Build API Handlers
//!
//! Inspection endpoints plus the execution engine's completion hook.

use axum::{
    Json,
    extract::{Path, State},
};
use gantry_core::domain::build::{Build, BuildEvent};
use gantry_core::dto::build::FinishBuild;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::build_service;

/// GET /builds/{id}
pub async fn get_build(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Build>> {
    tracing::debug!("Getting build: {}", id);

    let build = build_service::get_build(state.ledger.as_ref(), id).await?;
    Ok(Json(build))
}

/// GET /builds/{id}/events
pub async fn get_build_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<BuildEvent>>> {
    let events = build_service::get_build_events(state.ledger.as_ref(), id).await?;
    Ok(Json(events))
}

/// POST /builds/{id}/finish
/// Record the final status reported by the execution engine
pub async fn finish_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FinishBuild>,
) -> ApiResult<Json<Build>> {
    tracing::info!("Finishing build {} as {}", id, req.status);

    let build = build_service::finish_build(state.ledger.as_ref(), id, req.status).await?;
    Ok(Json(build))
}
