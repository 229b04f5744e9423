//! Integration tests for the HTTP surface, driven through the router with `oneshot`.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use s3_catalog::{
    handlers::{AppState, object_handlers::SCHEMA_HEADER},
    routes::routes::routes,
    services::{
        blob::FilesystemBlobBackend,
        catalog::Catalog,
        object_store::{ObjectStore, RemoveMode, StoreConfig},
    },
};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use tower::ServiceExt;

const PREFIX: &str = "/api/v1/s3";
const MAX_BODY: usize = 1024;

async fn app() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let catalog = Catalog::new(Arc::new(pool));
    catalog.migrate().await.unwrap();

    let store = ObjectStore::new(
        StoreConfig {
            secret: "http-secret".into(),
            api_prefix: PREFIX.into(),
            remove_mode: RemoveMode::Hard,
            backend_timeout: None,
        },
        catalog,
        Arc::new(FilesystemBlobBackend::new(dir.path())),
    )
    .unwrap();

    let state = AppState {
        store,
        default_schema: "public".into(),
        max_object_size: MAX_BODY,
    };
    (routes(PREFIX, MAX_BODY).with_state(state), dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn upload(path: &str, body: &'static [u8]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(body))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn upload_info_download_delete() {
    let (app, _dir) = app().await;

    let (status, _, body) = send(&app, upload("/api/v1/s3/objects/docs/report.txt", b"hello")).await;
    assert_eq!(status, StatusCode::OK);
    let created: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(created["schema"], "public");
    assert_eq!(created["file_name"], "report.txt");
    assert_eq!(created["file_size"], 5);

    let (status, _, body) = send(&app, get("/api/v1/s3/info/docs/report.txt")).await;
    assert_eq!(status, StatusCode::OK);
    let info: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["id"], created["id"]);
    let url = info["download_url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/api/v1/s3/objects/docs/report.txt?token="));

    let (status, headers, body) = send(&app, get(&url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.txt\""
    );

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/v1/s3/objects/docs/report.txt")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, get(&url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_urls_survive_reserved_characters_in_keys() {
    let (app, _dir) = app().await;
    for (upload_path, key, info_path) in [
        ("/api/v1/s3/objects/docs/a%3Fb", "a?b", "/api/v1/s3/info/docs/a%3Fb"),
        ("/api/v1/s3/objects/docs/a%20b", "a b", "/api/v1/s3/info/docs/a%20b"),
        (
            "/api/v1/s3/objects/docs/dir/file.txt",
            "dir/file.txt",
            "/api/v1/s3/info/docs/dir/file.txt",
        ),
    ] {
        let (status, _, body) = send(&app, upload(upload_path, b"payload")).await;
        assert_eq!(status, StatusCode::OK, "upload {}", key);
        let created: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(created["key"], key);

        let (status, _, body) = send(&app, get(info_path)).await;
        assert_eq!(status, StatusCode::OK, "info {}", key);
        let info: Value = serde_json::from_slice(&body).unwrap();
        let url = info["download_url"].as_str().unwrap().to_string();
        assert!(url.starts_with(&format!("{}?token=", upload_path)), "{}", url);

        let (status, _, body) = send(&app, get(&url)).await;
        assert_eq!(status, StatusCode::OK, "download {}", key);
        assert_eq!(body, b"payload");
    }
}

#[tokio::test]
async fn download_requires_a_matching_token() {
    let (app, _dir) = app().await;
    send(&app, upload("/api/v1/s3/objects/docs/a.txt", b"a")).await;
    send(&app, upload("/api/v1/s3/objects/docs/b.txt", b"b")).await;

    let (status, _, _) = send(&app, get("/api/v1/s3/objects/docs/a.txt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, get("/api/v1/s3/objects/docs/a.txt?token=garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, _, body) = send(&app, get("/api/v1/s3/info/docs/b.txt")).await;
    let info: Value = serde_json::from_slice(&body).unwrap();
    let token = info["download_url"]
        .as_str()
        .unwrap()
        .split_once("?token=")
        .unwrap()
        .1
        .to_string();
    let (status, _, _) = send(
        &app,
        get(&format!("/api/v1/s3/objects/docs/a.txt?token={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn schema_header_scopes_lookups() {
    let (app, _dir) = app().await;
    let request = Request::builder()
        .method("PUT")
        .uri("/api/v1/s3/objects/docs/report.txt")
        .header(header::CONTENT_TYPE, "text/plain")
        .header(SCHEMA_HEADER, "tenant")
        .body(Body::from("hi"))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, get("/api/v1/s3/info/docs/report.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .uri("/api/v1/s3/info/docs/report.txt")
        .header(SCHEMA_HEADER, "tenant")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let info: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["schema"], "tenant");

    // The download URL carries no schema; the header has to come along.
    let url = info["download_url"].as_str().unwrap().to_string();
    let (status, _, _) = send(&app, get(&url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .uri(&url)
        .header(SCHEMA_HEADER, "tenant")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hi");
}

#[tokio::test]
async fn rejected_uploads() {
    let (app, _dir) = app().await;

    let request = Request::builder()
        .method("PUT")
        .uri("/api/v1/s3/objects/docs/report.txt")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, upload("/api/v1/s3/objects/system.users/k", b"x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("DELETE")
        .uri("/api/v1/s3/objects/docs/missing")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multipart_upload_uses_the_file_field_name() {
    let (app, _dir) = app().await;
    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.md\"\r\n\
         Content-Type: text/markdown\r\n\r\n# notes\r\n--{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/s3/objects/docs/notes")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let created: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(created["key"], "notes");
    assert_eq!(created["file_name"], "notes.md");
    assert_eq!(created["file_size"], 7);
}

#[tokio::test]
async fn health_endpoints_live_at_the_root() {
    let (app, _dir) = app().await;

    let (status, _, _) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(&app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    let ready: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ready["ready"], true);
    assert_eq!(ready["leaked_blobs"], 0);
    let checks: Vec<&str> = ready["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(checks, ["catalog", "fs"]);
}
