//! HTTP server exposing the material folder watcher.
//!
//! Routes keep the paths and `{ code, msg, data }` envelope the web client
//! already speaks. All state lives in one shared [`WatchController`].

pub mod config;
pub mod error;
pub mod material_handler;
pub mod response;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sau_folder_watcher::WatchController;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;

/// Room for multipart framing on top of the upload itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<WatchController>,
}

impl AppState {
    pub fn new(controller: Arc<WatchController>) -> Self {
        Self { controller }
    }
}

/// Build the router. Request bodies are capped a little above
/// `max_upload_bytes` so the pipeline reports oversized uploads itself.
pub fn router(state: AppState, max_upload_bytes: u64) -> Router {
    let body_limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/getFiles", get(material_handler::get_files))
        .route("/uploadSave", post(material_handler::upload_save))
        .route("/deleteFile", get(material_handler::delete_file))
        .route("/download/{*file_path}", get(material_handler::download))
        .route("/getFile", get(material_handler::get_file))
        .route("/getWatchFolder", get(material_handler::get_watch_folder))
        .route("/setWatchFolder", post(material_handler::set_watch_folder))
        .route("/stopWatchFolder", post(material_handler::stop_watch_folder))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use pretty_assertions::assert_eq;
    use sau_folder_watcher::{MemoryStore, WatchConfig};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "sau-test-boundary";

    async fn app(config: WatchConfig) -> (Router, Arc<WatchController>) {
        let controller = Arc::new(
            WatchController::new(config.clone(), Arc::new(MemoryStore::new()))
                .await
                .unwrap(),
        );
        let app = router(
            AppState::new(Arc::clone(&controller)),
            config.max_upload_bytes,
        );
        (app, controller)
    }

    fn quiet_config() -> WatchConfig {
        WatchConfig::new().with_poll_interval(Duration::from_secs(60))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload_request(file_name: &str, bytes: &[u8], custom: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        if let Some(custom) = custom {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"filename\"\r\n\r\n{custom}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/uploadSave")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_watch_folder_lifecycle() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let (app, controller) = app(quiet_config()).await;

        let (status, body) = send_json(&app, get_request("/getWatchFolder")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({ "folderPath": null, "isRunning": false }));

        let (status, body) = send_json(
            &app,
            post_json(
                "/setWatchFolder",
                json!({ "folderPath": dir.path().to_string_lossy() }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);

        let (_, body) = send_json(&app, get_request("/getWatchFolder")).await;
        assert_eq!(body["data"]["isRunning"], true);

        let (status, body) = send_json(&app, get_request("/getFiles")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["fileName"], "a.txt");
        assert_eq!(body["data"][0]["sizeBytes"], 5);

        let (status, _) = send_json(&app, post_json("/stopWatchFolder", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send_json(&app, get_request("/getWatchFolder")).await;
        assert_eq!(body["data"], json!({ "folderPath": null, "isRunning": false }));

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_watch_folder_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        let (app, _controller) = app(quiet_config()).await;

        let (status, body) = send_json(
            &app,
            post_json(
                "/setWatchFolder",
                json!({ "folderPath": missing.to_string_lossy() }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
        assert_eq!(body["data"], Value::Null);
    }

    #[tokio::test]
    async fn test_upload_then_fetch_and_delete() {
        let dir = TempDir::new().unwrap();
        let (app, controller) = app(quiet_config()).await;
        controller.start_watch(dir.path()).await.unwrap();

        let (status, body) =
            send_json(&app, upload_request("raw.png", b"png bytes", Some("cover"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["fileName"], "cover.png");
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert!(dir.path().join("cover.png").exists());

        let (status, bytes) = send(&app, get_request("/getFile?filename=cover.png")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"png bytes");

        let response = app
            .clone()
            .oneshot(get_request("/download/cover.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let (status, body) = send_json(&app, get_request(&format!("/deleteFile?id={id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({ "id": id, "fileName": "cover.png" }));
        assert!(!dir.path().join("cover.png").exists());

        let (_, body) = send_json(&app, get_request("/getFiles")).await;
        assert_eq!(body["data"], json!([]));

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_upload_without_watch_is_conflict() {
        let (app, _controller) = app(quiet_config()).await;

        let (status, body) = send_json(&app, upload_request("a.txt", b"x", None)).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, controller) = app(quiet_config().with_max_upload_bytes(4)).await;
        controller.start_watch(dir.path()).await.unwrap();

        let (status, _) = send_json(&app, upload_request("big.bin", b"too many bytes", None)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!dir.path().join("big.bin").exists());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_and_invalid_files() {
        let dir = TempDir::new().unwrap();
        let (app, controller) = app(quiet_config()).await;
        controller.start_watch(dir.path()).await.unwrap();

        let (status, _) = send_json(&app, get_request("/getFile?filename=nope.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(&app, get_request("/getFile?filename=..%2Fsecret")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send_json(&app, get_request("/deleteFile?id=ffffffffffffffff")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(&app, get_request("/deleteFile")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        controller.shutdown().await;
    }
}
