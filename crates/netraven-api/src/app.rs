use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use netraven_dispatcher::{Dispatcher, HandlerRegistry, SchedulerCommand};
use netraven_logging::LogHub;
use netraven_store::JobStore;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

/// Builds the core's HTTP surface (spec §6's datastore/log-stream
/// interfaces, exposed over the wire): trigger and observe job runs, read
/// job definitions, and stream the live log hub. CRUD for
/// devices/tags/credentials/users/auth is explicitly out of this crate's
/// scope (spec §1) — it lives on a separate REST surface this core does
/// not implement.
pub fn build_app(
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    handler_registry: Arc<HandlerRegistry>,
    log_hub: Arc<LogHub>,
    scheduler_commands: mpsc::Sender<SchedulerCommand>,
    auth_token: Arc<String>,
) -> Router {
    let state = AppState { store, dispatcher, handler_registry, log_hub, scheduler_commands, auth_token };

    Router::new()
        // Health
        .route("/healthz", get(handlers::health))
        .route("/readyz", get(handlers::ready))
        // Job definitions (read-only)
        .route("/job-definitions", get(handlers::list_job_definitions))
        .route("/job-definitions/:id", get(handlers::get_job_definition))
        // Handler registry metadata
        .route("/handlers", get(handlers::list_handlers))
        // Job runs
        .route("/job-runs", post(handlers::trigger_job_run))
        .route("/job-runs/in-flight", get(handlers::list_in_flight_job_runs))
        .route("/job-runs/:id", get(handlers::get_job_run))
        .route("/job-runs/:id/device-results", get(handlers::list_device_results))
        .route("/job-runs/:id/logs", get(handlers::list_job_logs))
        .route("/job-runs/:id/logs/stream", get(handlers::stream_job_logs))
        .route("/job-runs/:id/cancel", post(handlers::cancel_job_run))
        .route("/job-runs/:id/retry-failed", post(handlers::retry_failed))
        // Status
        .route("/status", get(handlers::status))
        // Auth middleware applies to every route above
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use netraven_dispatcher::{Dispatcher, HandlerRegistry};
    use netraven_logging::{LogHub, LogSink, Redactor};
    use netraven_session::{DriverRegistry, SessionConfig};
    use netraven_store::InMemoryStore;
    use tower::util::ServiceExt;

    const TEST_TOKEN: &str = "test-token";

    fn test_app() -> Router {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let hub = Arc::new(LogHub::new());
        let sink = Arc::new(LogSink::new(store.clone(), hub.clone(), Redactor::empty()));
        let handler_registry = Arc::new(HandlerRegistry::with_builtins());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(DriverRegistry::new()),
            handler_registry.clone(),
            sink,
            SessionConfig::default(),
            3,
        ));
        let (tx, _rx) = mpsc::channel(8);
        build_app(store, dispatcher, handler_registry, hub, tx, Arc::new(TEST_TOKEN.to_string()))
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("Authorization", format!("Bearer {}", TEST_TOKEN))
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let app = test_app();
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("Authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/healthz")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_returns_200_with_empty_store() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/readyz")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn job_definitions_empty_list() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/job-definitions")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn job_run_not_found_returns_404() {
        let app = test_app();
        let resp = app
            .oneshot(
                authed(Request::builder().uri(format!("/job-runs/{}", uuid::Uuid::new_v4())))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_returns_200() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/status")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn handlers_returns_builtin_metadata() {
        let app = test_app();
        let resp = app
            .oneshot(authed(Request::builder().uri("/handlers")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let types: Vec<&str> = json.as_array().unwrap().iter().map(|h| h["job_type"].as_str().unwrap()).collect();
        assert!(types.contains(&"backup"));
        assert!(types.contains(&"reachability"));
    }

    #[tokio::test]
    async fn trigger_unknown_job_definition_returns_404() {
        let app = test_app();
        let body = serde_json::json!({ "job_definition_id": uuid::Uuid::new_v4() });
        let resp = app
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/job-runs")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
