use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use nas_upload_gateway::config::UploadConfig;
use nas_upload_gateway::entities::upload_links;
use nas_upload_gateway::infrastructure::database;
use nas_upload_gateway::services::session_cache::SeaOrmSessionStore;
use nas_upload_gateway::services::storage::FilesystemDestination;
use nas_upload_gateway::utils::checksum::adler32;
use nas_upload_gateway::{AppState, create_app};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "---------------------------123456789012345678901234567";

async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

async fn insert_link(db: &DatabaseConnection, token: &str, destination: &str, ttl_hours: i64) {
    let now = Utc::now();
    upload_links::ActiveModel {
        token: Set(token.to_string()),
        valid_from: Set(now - Duration::hours(1)),
        valid_until: Set(now + Duration::hours(ttl_hours)),
        destination_path: Set(destination.to_string()),
        status: Set(upload_links::STATUS_ACTIVE.to_string()),
        created_at: Set(Some(now)),
    }
    .insert(db)
    .await
    .unwrap();
}

struct TestApp {
    app: Router,
    db: DatabaseConnection,
    share: TempDir,
    _staging: TempDir,
}

async fn setup_app(configure: impl FnOnce(&mut UploadConfig)) -> TestApp {
    let db = setup_test_db().await;
    let share = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let mut config = UploadConfig::development();
    config.staging_root = staging.path().join("temp_uploads");
    config.share_root = share.path().to_path_buf();
    configure(&mut config);

    let state = AppState::new(
        config,
        Arc::new(SeaOrmSessionStore::new(db.clone())),
        Arc::new(FilesystemDestination::new(share.path())),
    );

    TestApp {
        app: create_app(state),
        db,
        share,
        _staging: staging,
    }
}

struct Chunk<'a> {
    name: &'a str,
    index: u32,
    total: u32,
    status: &'a str,
    data: &'a [u8],
    checksum: Option<u32>,
}

impl<'a> Chunk<'a> {
    fn new(name: &'a str, index: u32, total: u32, status: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            index,
            total,
            status,
            data,
            checksum: None,
        }
    }

    fn body(&self) -> Vec<u8> {
        let checksum = self.checksum.unwrap_or_else(|| adler32(self.data));
        let mut body = Vec::new();
        for (field, value) in [
            ("originalName", self.name.to_string()),
            ("chunkIndex", self.index.to_string()),
            ("totalChunks", self.total.to_string()),
            ("status", self.status.to_string()),
            ("checksum", checksum.to_string()),
            ("req_sessionId", "07-lq2x1abc-k3z".to_string()),
        ] {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\n\
                     Content-Disposition: form-data; name=\"{field}\"\r\n\r\n\
                     {value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(self.data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn upload_raw(app: &Router, token: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/uploads/upload-chunk/{}", token))
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

async fn upload(app: &Router, token: &str, chunk: Chunk<'_>) -> (StatusCode, Value) {
    upload_raw(app, token, chunk.body()).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(
    app: &Router,
    uri: &str,
    body: &str,
    admin_key: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(key) = admin_key {
        builder = builder.header("x-admin-key", key);
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

fn read_share(share: &Path, rel: &str) -> Vec<u8> {
    std::fs::read(share.join(rel)).unwrap()
}

#[tokio::test]
async fn test_three_chunk_upload_lands_on_share() {
    let t = setup_app(|_| {}).await;
    insert_link(&t.db, "k3j9x0", "team/inbox", 1).await;

    let (status, body) =
        upload(&t.app, "k3j9x0", Chunk::new("notes.txt", 0, 3, "start", b"abcd")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunkIndex"], 0);
    assert_eq!(body["duplicate"], false);

    let (status, _) = upload(&t.app, "k3j9x0", Chunk::new("notes.txt", 1, 3, "", b"efgh")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        upload(&t.app, "k3j9x0", Chunk::new("notes.txt", 2, 3, "end", b"ij")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storedName"], "notes.txt");

    assert_eq!(read_share(t.share.path(), "team/inbox/notes.txt"), b"abcdefghij");
}

#[tokio::test]
async fn test_collisions_are_renamed() {
    let t = setup_app(|_| {}).await;
    insert_link(&t.db, "tok1", "docs", 1).await;

    std::fs::create_dir_all(t.share.path().join("docs")).unwrap();
    std::fs::write(t.share.path().join("docs/report.pdf"), b"original").unwrap();

    let (status, body) =
        upload(&t.app, "tok1", Chunk::new("report.pdf", 0, 1, "single", b"second")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storedName"], "report (2).pdf");

    let (status, body) =
        upload(&t.app, "tok1", Chunk::new("report.pdf", 0, 1, "single", b"third")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storedName"], "report (3).pdf");

    assert_eq!(read_share(t.share.path(), "docs/report.pdf"), b"original");
    assert_eq!(read_share(t.share.path(), "docs/report (2).pdf"), b"second");
    assert_eq!(read_share(t.share.path(), "docs/report (3).pdf"), b"third");
}

#[tokio::test]
async fn test_checksum_mismatch_and_incomplete() {
    let t = setup_app(|_| {}).await;
    insert_link(&t.db, "tok1", "docs", 1).await;

    let mut bad = Chunk::new("a.bin", 0, 2, "start", b"payload");
    bad.checksum = Some(adler32(b"paylaod"));
    let (status, body) = upload(&t.app, "tok1", bad).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "ChecksumMismatch");

    let (status, body) =
        upload(&t.app, "tok1", Chunk::new("a.bin", 1, 2, "end", b"tail")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "IncompleteUpload");
    assert!(!t.share.path().join("docs/a.bin").exists());
}

#[tokio::test]
async fn test_gate_rejections() {
    let t = setup_app(|_| {}).await;
    insert_link(&t.db, "expired", "docs", -1).await;
    insert_link(&t.db, "live", "docs", 1).await;

    let (status, body) =
        upload(&t.app, "unknown", Chunk::new("a.bin", 0, 1, "single", b"x")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "InvalidToken");

    let (status, body) =
        upload(&t.app, "expired", Chunk::new("a.bin", 0, 1, "single", b"x")).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["kind"], "SessionExpired");

    // Disabling the row takes effect on the next access check
    let row = upload_links::Entity::find_by_id("live".to_string())
        .one(&t.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: upload_links::ActiveModel = row.into();
    active.status = Set(upload_links::STATUS_DISABLED.to_string());
    active.update(&t.db).await.unwrap();

    let (status, body) = get(&t.app, "/uploads/healthcheck/live").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "InvalidToken");
}

#[tokio::test]
async fn test_gate_runs_before_form_parsing() {
    let t = setup_app(|_| {}).await;
    insert_link(&t.db, "expired", "docs", -1).await;
    insert_link(&t.db, "live", "docs", 1).await;

    // Only the name field, everything else missing
    let partial = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"originalName\"\r\n\r\n\
         a.bin\r\n\
         --{BOUNDARY}--\r\n"
    );

    for (token, code, kind) in [
        ("unknown", StatusCode::FORBIDDEN, "InvalidToken"),
        ("expired", StatusCode::GONE, "SessionExpired"),
    ] {
        let (status, body) = upload_raw(&t.app, token, partial.clone().into_bytes()).await;
        assert_eq!(status, code);
        assert_eq!(body["kind"], kind);
    }

    let (status, body) = upload_raw(&t.app, "live", partial.clone().into_bytes()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing field: chunkIndex");

    post_json(&t.app, "/uploads/maintenance", r#"{"enabled": true}"#, None).await;
    let (status, body) = upload_raw(&t.app, "live", partial.into_bytes()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "MaintenanceInProgress");
}

#[tokio::test]
async fn test_healthcheck_payload() {
    let t = setup_app(|c| {
        c.server_name = "NAS-01".to_string();
        c.chunk_size_mb = 5;
    })
    .await;
    insert_link(&t.db, "tok1", "projects/alpha", 1).await;

    let (status, body) = get(&t.app, "/uploads/healthcheck/tok1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 200);
    assert_eq!(body["path"], "projects/alpha");
    assert_eq!(body["servername"], "NAS-01");
    assert_eq!(body["chunkSize"], 5);
    assert_eq!(body["sessionId"].as_str().unwrap().split('-').count(), 3);
}

#[tokio::test]
async fn test_maintenance_and_admin_key() {
    let t = setup_app(|c| c.admin_api_key = Some("secret".to_string())).await;
    insert_link(&t.db, "tok1", "docs", 1).await;

    let (status, _) =
        post_json(&t.app, "/uploads/maintenance", r#"{"enabled": true}"#, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        post_json(&t.app, "/uploads/maintenance", r#"{"enabled": true}"#, Some("secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);

    let (status, body) =
        upload(&t.app, "tok1", Chunk::new("a.bin", 0, 1, "single", b"x")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "MaintenanceInProgress");

    post_json(&t.app, "/uploads/maintenance", r#"{"enabled": false}"#, Some("secret")).await;
    let (status, _) = upload(&t.app, "tok1", Chunk::new("a.bin", 0, 1, "single", b"x")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reload_signal_without_per_request_reload() {
    let t = setup_app(|c| c.reload_per_request = false).await;

    let (status, _) = get(&t.app, "/uploads/healthcheck/late").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    insert_link(&t.db, "late", "docs", 1).await;
    let (status, _) = get(&t.app, "/uploads/healthcheck/late").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = post_json(&t.app, "/uploads/reload-cache", "", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"], 1);

    let (status, _) = get(&t.app, "/uploads/healthcheck/late").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_oversized_chunk_rejected() {
    let t = setup_app(|c| {
        c.chunk_size_mb = 1;
        c.chunk_size_tolerance = 1024;
    })
    .await;
    insert_link(&t.db, "tok1", "docs", 1).await;

    let data = vec![7u8; 2 * 1024 * 1024];
    let (status, body) =
        upload(&t.app, "tok1", Chunk::new("big.bin", 0, 1, "single", &data)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "Chunk too large. Max allowed size is 1MB.");
}

#[tokio::test]
async fn test_liveness() {
    let t = setup_app(|_| {}).await;

    let (status, body) = get(&t.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
}
