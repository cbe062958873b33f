//! Web API routes driven through the router without a socket.
//!
//! Run with: cargo test -p pdm --test api

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pdm::{router, AppState, Credentials};
use pdmcore::download::manager::ManagerSettings;
use pdmcore::download::DownloadRecord;
use pdmcore::storage::db;
use pdmcore::storage::FileDirs;
use pdmcore::{create_pool, get_connection, DownloadManager, EngineManager, FileManager};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "XPDMBOUNDARY";

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    state: AppState,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let pool = create_pool(&root.join("pdm.sqlite")).unwrap();
        let dirs = FileDirs {
            downloads: root.join("downloads"),
            uploads: root.join("uploads"),
            temp: root.join("temp"),
        };
        for d in [&dirs.downloads, &dirs.uploads, &dirs.temp] {
            std::fs::create_dir_all(d).unwrap();
        }
        let settings = ManagerSettings {
            max_workers: 2,
            downloads_dir: dirs.downloads.clone(),
            progress_log_step: 10.0,
        };
        let manager = DownloadManager::new(
            pool,
            EngineManager::with_engines(Vec::new()),
            Arc::new(FileManager::new(dirs)),
            settings,
        );
        let state = AppState::new(manager, None, Credentials::new("admin", "hunter2")).with_logs_dir(root.join("logs"));
        Self { _dir: dir, root, state }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(authed(Request::get(uri)).body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        let request = authed(Request::post(uri))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }
}

fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
}

fn authed(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder.header(header::AUTHORIZATION, basic("admin", "hunter2"))
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> String {
    let mut body = String::new();
    for (name, filename, contents) in parts {
        body.push_str(&format!("--{}\r\n", BOUNDARY));
        match filename {
            Some(file) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                name, file
            )),
            None => body.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)),
        }
        body.push_str(contents);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let fx = Fixture::new();
    let response = fx
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_api_requires_credentials() {
    let fx = Fixture::new();

    let response = fx
        .send(Request::get("/api/downloads").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    assert_eq!(json_body(response).await["error"], "Authentication required");

    let wrong = Request::get("/api/downloads")
        .header(header::AUTHORIZATION, basic("admin", "wrong"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(fx.send(wrong).await.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(fx.get("/api/downloads").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_start_download_validation() {
    let fx = Fixture::new();

    let response = fx.post_json("/api/download", json!({ "url": "  " })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "URL is required");

    let response = fx.post_json("/api/download", json!({ "url": "not a url" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // no engine is installed in the fixture
    let response = fx
        .post_json("/api/download", json!({ "url": "https://example.com/a.zip", "description": "x" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = json_body(response).await["error"].as_str().unwrap().to_string();
    assert!(error.contains("No download engine"), "{}", error);
}

#[tokio::test]
async fn test_download_lookup_and_control() {
    let fx = Fixture::new();

    let response = fx.get("/api/downloads/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "Download nope not found");

    // finished downloads not held in memory come from the database
    let record = DownloadRecord::new(
        "abc123".into(),
        "https://example.com/a.zip".into(),
        "a.zip".into(),
        fx.root.join("downloads/a.zip").to_string_lossy().into_owned(),
    );
    let conn = get_connection(fx.state.manager.pool()).unwrap();
    db::save_download(&conn, &record).unwrap();
    drop(conn);
    let response = fx.get("/api/downloads/abc123").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["filename"], "a.zip");

    let response = fx
        .post_json("/api/download/control", json!({ "id": "abc123", "action": "explode" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = fx
        .post_json("/api/download/control", json!({ "id": "missing", "action": "pause" }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = fx.post_json("/api/download/pause-all", json!({})).await;
    assert_eq!(json_body(response).await["count"], 0);

    let response = fx.get("/api/downloads?status=bogus").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_settings_roundtrip() {
    let fx = Fixture::new();

    let response = fx
        .post_json("/api/settings", json!({ "maxConcurrent": 4, "autoTelegramUpload": false }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["restart_required"], true);
    assert_eq!(body["settings"]["maxConcurrent"], 4);
    assert_eq!(body["settings"]["autoTelegramUpload"], false);

    // one bad key rejects the whole update
    let response = fx
        .post_json("/api/settings", json!({ "maxConcurrent": 6, "theme": "dark" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(fx.get("/api/settings").await).await;
    assert_eq!(body["settings"]["maxConcurrent"], 4);
}

#[tokio::test]
async fn test_telegram_endpoints_without_bot() {
    let fx = Fixture::new();

    let body = json_body(fx.get("/api/telegram/status").await).await;
    assert_eq!(body["bot_available"], false);

    let response = fx.post_json("/api/telegram/clear-queue", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Telegram is not configured");
}

#[tokio::test]
async fn test_upload_store_list_and_remove() {
    let fx = Fixture::new();

    let body = multipart_body(&[
        ("description", None, "weekly notes"),
        ("files", Some("notes.txt"), "hello there"),
        ("files", Some("virus.exe"), "MZ"),
    ]);
    let request = authed(Request::post("/api/upload"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let response = fx.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["uploads"].as_array().unwrap().len(), 1);
    assert_eq!(body["rejected"].as_array().unwrap().len(), 1);

    let upload = &body["uploads"][0];
    assert_eq!(upload["filename"], "notes.txt");
    assert_eq!(upload["description"], "weekly notes");
    assert_eq!(upload["size"], 11);
    let id = upload["id"].as_str().unwrap().to_string();
    let stored = PathBuf::from(upload["filepath"].as_str().unwrap());
    assert_eq!(std::fs::read_to_string(&stored).unwrap(), "hello there");
    assert!(stored.file_name().unwrap().to_string_lossy().starts_with(&id));

    let listed = json_body(fx.get("/api/uploads").await).await;
    assert_eq!(listed["uploads"][0]["id"], id.as_str());

    let response = fx
        .post_json("/api/upload/control", json!({ "id": id, "action": "remove" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!stored.exists());
    let listed = json_body(fx.get("/api/uploads").await).await;
    assert!(listed["uploads"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_without_files() {
    let fx = Fixture::new();
    let request = authed(Request::post("/api/upload"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(&[("description", None, "nothing")])))
        .unwrap();
    let response = fx.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No files selected");
}

#[tokio::test]
async fn test_export_logs_and_maintenance() {
    let fx = Fixture::new();
    let logs = fx.root.join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join("main.log"), "line\n").unwrap();

    let response = fx.get("/api/maintenance/export-logs").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("logs_") && disposition.ends_with(".zip\""));

    let response = fx.post_json("/api/maintenance/cleanup", json!({})).await;
    assert_eq!(json_body(response).await["success"], true);

    let response = fx.post_json("/api/maintenance/clear-database", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let stats = json_body(fx.get("/api/analytics/stats").await).await;
    assert_eq!(stats["database"]["total_downloads"], 0);
    assert_eq!(stats["telegram"], Value::Null);
}
