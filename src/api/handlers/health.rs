use crate::AppState;
use crate::api::error::AppError;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use serde::Serialize;
use utoipa::ToSchema;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// `DD-<base36 millis>-<3 random base36 chars>`. Only used to correlate
/// client logs with server logs.
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..3)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();

    format!("{:02}-{}-{}", now.day(), to_base36(millis), suffix)
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadHealthResponse {
    pub status: u16,
    pub message: String,
    pub session_id: String,
    pub path: String,
    #[serde(rename = "servername")]
    pub server_name: String,
    /// Negotiated chunk size in MB
    pub chunk_size: usize,
}

#[utoipa::path(
    get,
    path = "/uploads/healthcheck/{token}",
    params(("token" = String, Path, description = "Upload link token")),
    responses(
        (status = 200, description = "Link is usable", body = UploadHealthResponse),
        (status = 403, description = "Invalid URL"),
        (status = 410, description = "URL expired or not yet activated"),
        (status = 503, description = "Maintenance in progress")
    ),
    tag = "uploads"
)]
pub async fn upload_healthcheck(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<UploadHealthResponse>, AppError> {
    let session = state.gate.check_access(&token, Utc::now()).await?;

    let session_id = generate_session_id(Utc::now());
    tracing::info!(session_id = %session_id, "Valid access granted for URL: {}", token);

    if !tokio::fs::try_exists(state.staging.root())
        .await
        .unwrap_or(false)
    {
        tracing::info!(
            session_id = %session_id,
            "Health check creating {}",
            state.staging.root().display()
        );
    }
    state.staging.ensure_root().await?;

    Ok(Json(UploadHealthResponse {
        status: 200,
        message: "Connection is healthy".to_string(),
        session_id,
        path: session.destination_path,
        server_name: state.config.server_name.clone(),
        chunk_size: state.config.chunk_size_mb,
    }))
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub storage: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.cache.ping_store().await.is_ok();
    let storage_ok = match state.destination.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Destination {} unreachable: {}", state.destination.describe(), e);
            false
        }
    };

    let label = |ok: bool| if ok { "connected" } else { "disconnected" }.to_string();

    Json(HealthResponse {
        status: if db_ok && storage_ok { "ok" } else { "degraded" }.to_string(),
        database: label(db_ok),
        storage: label(storage_ok),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
