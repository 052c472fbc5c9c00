//! End-to-end protocol tests against the tus router

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use tempfile::TempDir;
use tower::ServiceExt;

use tus_server::{routes, RequestContext, Resource, TusConfig, TusRegistry, UploadCompleteHandler};

/// base64("hello.txt")
const HELLO_METADATA: &str = "filename aGVsbG8udHh0";

fn single_endpoint(config: TusConfig) -> Router {
    let mut registry = TusRegistry::new();
    registry.register(config).unwrap();
    routes::router(registry)
}

fn tus_request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost:8300")
        .header("tus-resumable", "1.0.0")
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn create(app: &Router, url: &str, metadata: &str, length: u64) -> Response<Body> {
    let request = tus_request(Method::POST, url)
        .header("upload-metadata", metadata)
        .header("upload-length", length.to_string())
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn create_uid(app: &Router, url: &str, metadata: &str, length: u64) -> String {
    let response = create(app, url, metadata, length).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    header(&response, "tus-temp-filename").unwrap().to_string()
}

async fn patch(app: &Router, url: &str, offset: u64, data: &'static [u8]) -> Response<Body> {
    let request = tus_request(Method::PATCH, url)
        .header("upload-offset", offset.to_string())
        .header("content-type", "application/offset+octet-stream")
        .header("content-length", data.len().to_string())
        .body(Body::from(data))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn send(app: &Router, method: Method, url: &str) -> Response<Body> {
    let request = tus_request(method, url).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn error_code(response: Response<Body>) -> String {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    json["code"].as_str().unwrap().to_string()
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(read) => read.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_options_without_tus_header() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/uploads")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("tus-extension").is_none());
}

#[tokio::test]
async fn test_options_advertises_protocol() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let response = send(&app, Method::OPTIONS, "/uploads").await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "tus-resumable"), Some("1.0.0"));
    assert_eq!(header(&response, "tus-version"), Some("1.0.0"));
    assert_eq!(header(&response, "tus-extension"), Some("creation,termination,file-check"));
    assert_eq!(header(&response, "tus-max-size"), Some("4294967296"));
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_start_requires_tus_header() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/uploads")
        .header("upload-metadata", HELLO_METADATA)
        .header("upload-length", "11")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(response).await, "UNSUPPORTED_PROTOCOL");
    assert!(entries(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_start_creates_resource() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let response = create(&app, "/uploads", HELLO_METADATA, 11).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header(&response, "tus-resumable"), Some("1.0.0"));

    let uid = header(&response, "tus-temp-filename").unwrap();
    assert_eq!(
        header(&response, "location").unwrap(),
        format!("http://localhost:8300/uploads/{}", uid)
    );

    let chunk = temp_dir.path().join(".resources").join(uid);
    assert_eq!(std::fs::metadata(&chunk).unwrap().len(), 0);
    assert!(temp_dir.path().join(".metadata").join(format!("{}.json", uid)).is_file());
}

#[tokio::test]
async fn test_trailing_slash_upload_url() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads/"));

    let response = create(&app, "/uploads/", HELLO_METADATA, 11).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let uid = header(&response, "tus-temp-filename").unwrap().to_string();
    assert_eq!(
        header(&response, "location").unwrap(),
        format!("http://localhost:8300/uploads/{}", uid)
    );

    let response = patch(&app, &format!("/uploads/{}", uid), 0, b"hello world").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(temp_dir.path().join("hello.txt").is_file());

    let response = send(&app, Method::OPTIONS, "/uploads/").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_start_honors_forwarded_proto() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let request = tus_request(Method::POST, "/uploads")
        .header("x-forwarded-proto", "https")
        .header("upload-metadata", HELLO_METADATA)
        .header("upload-length", "11")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(header(&response, "location")
        .unwrap()
        .starts_with("https://localhost:8300/uploads/"));
}

#[tokio::test]
async fn test_start_rejects_missing_filename() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    // base64("text/plain")
    let response = create(&app, "/uploads", "filetype dGV4dC9wbGFpbg==", 11).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "INVALID_METADATA");

    let response = create(&app, "/uploads", "filename !!not-base64!!", 11).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_rejects_unstorable_filename() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    // base64("bad\0name.txt")
    let response = create(&app, "/uploads", "filename YmFkAG5hbWUudHh0", 11).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "INVALID_METADATA");
    assert!(entries(&temp_dir.path().join(".resources")).is_empty());
}

#[tokio::test]
async fn test_start_rejects_oversized_upload() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads").with_max_file_size(10));

    let response = create(&app, "/uploads", HELLO_METADATA, 11).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(response).await, "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_start_rejects_non_numeric_length() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let request = tus_request(Method::POST, "/uploads")
        .header("upload-metadata", HELLO_METADATA)
        .header("upload-length", "eleven")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "INVALID_HEADER");
}

// ============================================================================
// Chunks
// ============================================================================

#[tokio::test]
async fn test_single_chunk_upload() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    let response = patch(&app, &format!("/uploads/{}", uid), 0, b"hello world").await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "upload-offset"), Some("11"));
    assert_eq!(header(&response, "tus-temp-filename"), Some(uid.as_str()));

    let content = std::fs::read(temp_dir.path().join("hello.txt")).unwrap();
    assert_eq!(content, b"hello world");
    assert!(entries(&temp_dir.path().join(".resources")).is_empty());
    assert!(entries(&temp_dir.path().join(".metadata")).is_empty());
}

#[tokio::test]
async fn test_multi_chunk_upload() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    let url = format!("/uploads/{}", uid);

    let response = patch(&app, &url, 0, b"hello").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "upload-offset"), Some("5"));
    assert!(!temp_dir.path().join("hello.txt").exists());

    let response = send(&app, Method::HEAD, &url).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "upload-offset"), Some("5"));
    assert_eq!(header(&response, "upload-length"), Some("11"));
    assert_eq!(header(&response, "cache-control"), Some("no-store"));

    let response = patch(&app, &url, 5, b" world").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "upload-offset"), Some("11"));

    let content = std::fs::read(temp_dir.path().join("hello.txt")).unwrap();
    assert_eq!(content, b"hello world");
}

#[tokio::test]
async fn test_zero_length_upload() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 0).await;
    let response = patch(&app, &format!("/uploads/{}", uid), 0, b"").await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "upload-offset"), Some("0"));
    assert_eq!(std::fs::metadata(temp_dir.path().join("hello.txt")).unwrap().len(), 0);
}

#[tokio::test]
async fn test_offset_mismatch_leaves_state() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    let url = format!("/uploads/{}", uid);
    patch(&app, &url, 0, b"hello").await;

    let response = patch(&app, &url, 0, b"HELLO").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "OFFSET_MISMATCH");

    let response = patch(&app, &url, 7, b"rld").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = send(&app, Method::HEAD, &url).await;
    assert_eq!(header(&response, "upload-offset"), Some("5"));

    let chunk = std::fs::read(temp_dir.path().join(".resources").join(&uid)).unwrap();
    assert_eq!(chunk, b"hello");
}

#[tokio::test]
async fn test_chunk_past_declared_length() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 5).await;
    let url = format!("/uploads/{}", uid);

    let response = patch(&app, &url, 0, b"hello world").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "CHUNK_EXCEEDS_LENGTH");

    let response = send(&app, Method::HEAD, &url).await;
    assert_eq!(header(&response, "upload-offset"), Some("0"));
    assert!(!temp_dir.path().join("hello.txt").exists());
}

#[tokio::test]
async fn test_chunk_after_completion_is_gone() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    let url = format!("/uploads/{}", uid);
    patch(&app, &url, 0, b"hello world").await;

    let response = patch(&app, &url, 11, b"!").await;
    assert_eq!(response.status(), StatusCode::GONE);

    let response = send(&app, Method::HEAD, &url).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chunk_for_unknown_resource() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let response = patch(&app, "/uploads/19404e82-8008-4d64-9e97-023100c114c2", 0, b"hi").await;
    assert_eq!(response.status(), StatusCode::GONE);

    let response = send(&app, Method::HEAD, "/uploads/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Overwrite and file check
// ============================================================================

#[tokio::test]
async fn test_overwrite_disallowed() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    patch(&app, &format!("/uploads/{}", uid), 0, b"hello world").await;

    let response = create(&app, "/uploads", HELLO_METADATA, 3).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "FILE_EXISTS");
}

#[tokio::test]
async fn test_overwrite_allowed() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads").allow_overwrite_files(true));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    patch(&app, &format!("/uploads/{}", uid), 0, b"hello world").await;

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 3).await;
    let response = patch(&app, &format!("/uploads/{}", uid), 0, b"bye").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let content = std::fs::read(temp_dir.path().join("hello.txt")).unwrap();
    assert_eq!(content, b"bye");
}

#[tokio::test]
async fn test_file_check() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let check = |app: Router| async move {
        let request = tus_request(Method::GET, "/uploads")
            .header("upload-metadata", HELLO_METADATA)
            .body(Body::empty())
            .unwrap();
        app.oneshot(request).await.unwrap()
    };

    let response = check(app.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "tus-file-exists"), Some("false"));
    assert!(response.headers().get("tus-file-name").is_none());

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    patch(&app, &format!("/uploads/{}", uid), 0, b"hello world").await;

    let response = check(app.clone()).await;
    assert_eq!(header(&response, "tus-file-exists"), Some("true"));
    assert_eq!(header(&response, "tus-file-name"), Some("hello.txt"));
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn test_delete_resource() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads"));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    let url = format!("/uploads/{}", uid);
    patch(&app, &url, 0, b"hello").await;

    let response = send(&app, Method::DELETE, &url).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "tus-resumable"), Some("1.0.0"));
    assert!(!temp_dir.path().join(".resources").join(&uid).exists());

    let response = send(&app, Method::DELETE, &url).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, Method::HEAD, &url).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Endpoints
// ============================================================================

#[tokio::test]
async fn test_endpoints_are_independent() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let mut registry = TusRegistry::new();
    registry.register(TusConfig::new(dir_a.path(), "/a/uploads")).unwrap();
    registry.register(TusConfig::new(dir_b.path(), "/b/uploads")).unwrap();
    let app = registry.into_router();

    let uid_a = create_uid(&app, "/a/uploads", HELLO_METADATA, 11).await;
    let uid_b = create_uid(&app, "/b/uploads", HELLO_METADATA, 11).await;
    assert_ne!(uid_a, uid_b);

    // Ids are scoped to the endpoint that issued them
    let response = send(&app, Method::HEAD, &format!("/b/uploads/{}", uid_a)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(&app, Method::DELETE, &format!("/b/uploads/{}", uid_a)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = patch(&app, &format!("/a/uploads/{}", uid_a), 0, b"hello").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = patch(&app, &format!("/b/uploads/{}", uid_b), 0, b"hello").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Cancelling under /a leaves the /b upload untouched
    let response = send(&app, Method::DELETE, &format!("/a/uploads/{}", uid_a)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!dir_a.path().join(".resources").join(&uid_a).exists());

    let response = send(&app, Method::HEAD, &format!("/b/uploads/{}", uid_b)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "upload-offset"), Some("5"));
    assert!(dir_b.path().join(".resources").join(&uid_b).is_file());

    let response = patch(&app, &format!("/b/uploads/{}", uid_b), 5, b" world").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(std::fs::read(dir_b.path().join("hello.txt")).unwrap(), b"hello world");
    assert!(!dir_a.path().join("hello.txt").exists());

    // A finished file under /b survives another cancellation under /a
    let uid_a = create_uid(&app, "/a/uploads", HELLO_METADATA, 11).await;
    let response = send(&app, Method::DELETE, &format!("/a/uploads/{}", uid_a)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(std::fs::read(dir_b.path().join("hello.txt")).unwrap(), b"hello world");
}

#[tokio::test]
async fn test_parameterized_upload_path() {
    let temp_dir = TempDir::new().unwrap();
    let app = single_endpoint(TusConfig::new(
        temp_dir.path().join("{username}"),
        "/users/:username/uploads",
    ));

    let response = create(&app, "/users/alice/uploads", HELLO_METADATA, 11).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let uid = header(&response, "tus-temp-filename").unwrap().to_string();
    assert_eq!(
        header(&response, "location").unwrap(),
        format!("http://localhost:8300/users/alice/uploads/{}", uid)
    );

    let response = send(&app, Method::HEAD, &format!("/users/bob/uploads/{}", uid)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = patch(&app, &format!("/users/alice/uploads/{}", uid), 0, b"hello world").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(std::fs::read(temp_dir.path().join("alice/hello.txt")).unwrap(), b"hello world");
}

// ============================================================================
// Completion callback
// ============================================================================

#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<(String, PathBuf, u64)>>,
    fail: bool,
}

#[async_trait::async_trait]
impl UploadCompleteHandler for RecordingHandler {
    async fn on_upload_complete(
        &self,
        context: &RequestContext,
        resource: &Resource,
        path: &Path,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .push((context.uri.path().to_string(), path.to_path_buf(), resource.offset));
        if self.fail {
            anyhow::bail!("callback failure");
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_callback_runs_once_on_completion() {
    let temp_dir = TempDir::new().unwrap();
    let handler = Arc::new(RecordingHandler::default());
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads").on_upload_done(handler.clone()));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    let url = format!("/uploads/{}", uid);

    patch(&app, &url, 0, b"hello").await;
    assert!(handler.calls.lock().is_empty());

    patch(&app, &url, 5, b" world").await;
    let calls = handler.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, url);
    assert_eq!(calls[0].1, temp_dir.path().join("hello.txt"));
    assert_eq!(calls[0].2, 5);
}

#[tokio::test]
async fn test_failing_callback_keeps_success() {
    let temp_dir = TempDir::new().unwrap();
    let handler = Arc::new(RecordingHandler {
        fail: true,
        ..Default::default()
    });
    let app = single_endpoint(TusConfig::new(temp_dir.path(), "/uploads").on_upload_done(handler.clone()));

    let uid = create_uid(&app, "/uploads", HELLO_METADATA, 11).await;
    let response = patch(&app, &format!("/uploads/{}", uid), 0, b"hello world").await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(handler.calls.lock().len(), 1);
    assert!(temp_dir.path().join("hello.txt").is_file());
}
