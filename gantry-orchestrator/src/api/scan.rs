//! Scan API Handler

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::scanner::ScanSummary;

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    #[serde(flatten)]
    pub summary: ScanSummary,
    pub checks_enqueued: u64,
}

/// POST /scan
/// Run one sweep and wait for it
pub async fn run_scan(State(state): State<AppState>) -> ApiResult<Json<ScanResponse>> {
    tracing::info!("Running requested scan");

    let summary = state.scanner.run(&state.shutdown).await?;
    Ok(Json(ScanResponse {
        summary,
        checks_enqueued: state.admission.checks_enqueued(),
    }))
}
