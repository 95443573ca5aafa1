//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod build;
pub mod check;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod scan;

use axum::{
    Router,
    routing::{get, post, put},
};
use gantry_core::defaults::BaseResourceTypeDefaults;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::service::admission::CheckAdmission;
use crate::service::scanner::Scanner;
use crate::store::{BuildLedger, CheckableStore, ConfigStore};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config_store: Arc<dyn ConfigStore>,
    pub checkables: Arc<dyn CheckableStore>,
    pub ledger: Arc<dyn BuildLedger>,
    pub admission: Arc<CheckAdmission>,
    pub scanner: Arc<Scanner>,
    pub base_defaults: BaseResourceTypeDefaults,
    /// Wakes the scan worker after a pipeline update
    pub scan_notify: Arc<Notify>,
    pub enable_pipeline_instances: bool,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the services around a single store implementing every storage trait
    pub fn new<S>(
        store: Arc<S>,
        base_defaults: BaseResourceTypeDefaults,
        default_check_interval: Duration,
        enable_pipeline_instances: bool,
        shutdown: CancellationToken,
    ) -> Self
    where
        S: ConfigStore + CheckableStore + BuildLedger + 'static,
    {
        let config_store: Arc<dyn ConfigStore> = store.clone();
        let checkables: Arc<dyn CheckableStore> = store.clone();
        let ledger: Arc<dyn BuildLedger> = store;

        let admission = Arc::new(CheckAdmission::new(
            ledger.clone(),
            base_defaults.clone(),
            default_check_interval,
        ));
        let scanner = Arc::new(Scanner::new(checkables.clone(), admission.clone()));

        Self {
            config_store,
            checkables,
            ledger,
            admission,
            scanner,
            base_defaults,
            scan_notify: Arc::new(Notify::new()),
            enable_pipeline_instances,
            shutdown,
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipelines", get(pipeline::list_pipelines))
        .route("/pipelines/visible", get(pipeline::list_visible_pipelines))
        .route("/teams/{team}/pipelines", get(pipeline::list_team_pipelines))
        .route("/teams/{team}/pipelines/{pipeline}", get(pipeline::get_pipeline))
        .route("/teams/{team}/pipelines/{pipeline}/config", put(pipeline::save_config))
        .route("/teams/{team}/pipelines/{pipeline}/expose", put(pipeline::expose_pipeline))
        .route("/teams/{team}/pipelines/{pipeline}/hide", put(pipeline::hide_pipeline))
        // Manual checks
        .route(
            "/teams/{team}/pipelines/{pipeline}/resources/{resource}/check",
            post(check::check_resource),
        )
        .route(
            "/teams/{team}/pipelines/{pipeline}/resource-types/{resource_type}/check",
            post(check::check_resource_type),
        )
        // Scanning
        .route("/scan", post(scan::run_scan))
        // Build endpoints
        .route("/builds/{id}", get(build::get_build))
        .route("/builds/{id}/events", get(build::get_build_events))
        .route("/builds/{id}/finish", post(build::finish_build))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
    use serde_json::Value;
    use tower::ServiceExt;

    const CONFIG: &str = r#"
resource_types:
- name: custom
  type: registry-image
  source: {repository: example/custom}
resources:
- name: repo
  type: custom
  source: {uri: "https://example.com/repo.git"}
"#;

    fn router() -> Router {
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            BaseResourceTypeDefaults::default(),
            Duration::from_secs(60),
            true,
            CancellationToken::new(),
        );
        create_router(state)
    }

    fn put_config(uri: &str, content_type: &str, version: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("PUT")
            .uri(uri)
            .header(CONTENT_TYPE, content_type);
        if let Some(version) = version {
            builder = builder.header("X-Concourse-Config-Version", version);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&router(), request("GET", "/health", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks_enqueued"], 0);
    }

    #[tokio::test]
    async fn test_save_config_versions() {
        let app = router();
        let uri = "/teams/main/pipelines/p/config";

        let (status, _) = send(&app, put_config(uri, "application/x-yaml", None, CONFIG)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(&app, put_config(uri, "application/x-yaml", Some("1"), CONFIG)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, put_config(uri, "application/x-yaml", Some("1"), CONFIG)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("stale"));

        let (status, _) = send(&app, put_config(uri, "application/x-yaml", Some("abc"), CONFIG)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, put_config(uri, "text/plain", Some("2"), CONFIG)).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (status, body) = send(&app, request("GET", "/teams/main/pipelines/p", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config_version"], 2);
    }

    #[tokio::test]
    async fn test_save_invalid_config() {
        let app = router();
        let config = r#"{"resources": [{"name": "", "type": "git"}]}"#;

        let (status, body) = send(
            &app,
            put_config("/teams/main/pipelines/p/config", "application/json", None, config),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            put_config("/teams/nope/pipelines/p/config", "application/json", None, "{}"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_manual_check_and_finish() {
        let app = router();
        send(
            &app,
            put_config("/teams/main/pipelines/p/config", "application/x-yaml", None, CONFIG),
        )
        .await;

        let (status, build) = send(
            &app,
            request(
                "POST",
                "/teams/main/pipelines/p/resources/repo/check",
                r#"{"from": {"ref": "abc"}}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(build["manually_triggered"], true);
        assert_eq!(build["plan"]["check"]["from_version"]["ref"], "abc");
        let id = build["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            request("POST", "/teams/main/pipelines/p/resource-types/custom/check", ""),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            &app,
            request("POST", "/teams/main/pipelines/p/resources/missing/check", ""),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let finish = format!("/builds/{}/finish", id);
        let (status, _) = send(&app, request("POST", &finish, r#"{"status": "started"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, request("POST", &finish, r#"{"status": "succeeded"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");

        let (status, _) = send(&app, request("POST", &finish, r#"{"status": "failed"}"#)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, events) = send(&app, request("GET", &format!("/builds/{}/events", id), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(events.as_array().unwrap().len(), 2);

        let (status, _) = send(&app, request("GET", "/builds/00000000-0000-0000-0000-000000000000", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_scan() {
        let app = router();
        send(
            &app,
            put_config("/teams/main/pipelines/p/config", "application/x-yaml", None, CONFIG),
        )
        .await;

        let (status, body) = send(&app, request("POST", "/scan", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resources"], 1);
        assert_eq!(body["created"], 2);
        assert_eq!(body["checks_enqueued"], 2);

        let (_, body) = send(&app, request("POST", "/scan", "")).await;
        assert_eq!(body["created"], 0);
        assert_eq!(body["existing"], 2);
    }

    #[tokio::test]
    async fn test_instance_vars_and_visibility() {
        let app = router();
        let (status, _) = send(
            &app,
            put_config(
                "/teams/main/pipelines/p/config?vars.branch=%22main%22",
                "application/x-yaml",
                None,
                CONFIG,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, pipelines) = send(&app, request("GET", "/pipelines", "")).await;
        assert_eq!(pipelines[0]["instance_vars"]["branch"], "main");

        let (_, visible) = send(&app, request("GET", "/pipelines/visible?team=other", "")).await;
        assert!(visible.as_array().unwrap().is_empty());

        let (status, _) = send(
            &app,
            request("PUT", "/teams/main/pipelines/p/expose?vars.branch=%22main%22", ""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, visible) = send(&app, request("GET", "/pipelines/visible?team=other", "")).await;
        assert_eq!(visible.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, request("PUT", "/teams/main/pipelines/p/hide", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
