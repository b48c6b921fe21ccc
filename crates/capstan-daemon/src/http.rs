//! HTTP surfaces: the public webhook receiver and the private status
//! and admin surface.
//!
//! Both routers talk to the engine only through its [`EngineHandle`];
//! they never see registry state directly. Webhook payloads carry any
//! number of fields; only `clone_url` matters, the rest is ignored.
//! Unknown clone URLs and project indexes are accepted here and
//! logged-and-dropped by the engine, keeping the public surface free
//! of state-dependent responses.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use capstan_core::{EngineHandle, StatusSnapshot};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    clone_url: String,
}

/// Public router: `POST /webhook`.
pub fn webhook_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn receive_webhook(
    State(engine): State<EngineHandle>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    engine.webhook(payload.clone_url);
    StatusCode::ACCEPTED
}

/// Private router: `GET /status` and `POST /projects/{index}/refresh`.
pub fn status_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/status", get(read_status))
        .route("/projects/{index}/refresh", post(refresh_project))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn read_status(
    State(engine): State<EngineHandle>,
) -> Result<Json<StatusSnapshot>, StatusCode> {
    engine
        .status()
        .await
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

async fn refresh_project(
    State(engine): State<EngineHandle>,
    Path(index): Path<usize>,
) -> StatusCode {
    engine.admin_refresh(index);
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request};
    use capstan_core::adapter::fake::{FakeRuntime, FakeVcs};
    use capstan_core::{
        ContainerRange, Engine, EngineSettings, ProjectConfig, RuntimeAdapter, VcsAdapter,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    const URL: &str = "https://example/r";

    fn running_engine() -> (EngineHandle, Arc<FakeVcs>) {
        let vcs = Arc::new(FakeVcs::new());
        vcs.push(URL, "c1");
        let runtime = Arc::new(FakeRuntime::new());
        let projects = [ProjectConfig {
            name: "web".to_string(),
            clone_url: URL.to_string(),
            container_range: ContainerRange::from([1, 2]),
            dockerfile: PathBuf::from("Dockerfile"),
            hook_dir: PathBuf::from("/srv/hooks"),
        }];
        let (engine, handle) = Engine::new(
            "/work",
            &projects,
            EngineSettings::default(),
            Arc::clone(&vcs) as Arc<dyn VcsAdapter>,
            runtime as Arc<dyn RuntimeAdapter>,
        )
        .expect("test config is valid");
        tokio::spawn(engine.run());
        (handle, vcs)
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    #[tokio::test]
    async fn webhook_accepts_payloads_with_extra_fields() {
        let (handle, vcs) = running_engine();
        let router = webhook_router(handle);

        let response = router
            .oneshot(json_post(
                "/webhook",
                r#"{"clone_url": "https://example/r", "ref": "main", "pusher": {"name": "x"}}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // The engine picked the event up (a pull or a deferred update
        // follows the initial clone; either way it was not dropped).
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if vcs.pulls_started(URL) > 0 {
                return;
            }
        }
        panic!("webhook never reached the engine");
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_payloads() {
        let (handle, _vcs) = running_engine();
        let router = webhook_router(handle);

        let response = router
            .oneshot(json_post("/webhook", r#"{"no_clone_url_here": true}"#))
            .await
            .expect("response");
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn status_reports_repos_and_projects_as_json() {
        let (handle, _vcs) = running_engine();
        let router = status_router(handle);

        let response = router
            .oneshot(
                Request::get("/status")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("valid JSON");
        assert_eq!(value["repos"][0]["clone_url"], URL);
        assert_eq!(value["projects"][0]["name"], "web");
    }

    #[tokio::test]
    async fn refresh_accepts_unknown_project_indexes() {
        let (handle, _vcs) = running_engine();
        let router = status_router(handle);

        let response = router
            .oneshot(
                Request::post("/projects/7/refresh")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
