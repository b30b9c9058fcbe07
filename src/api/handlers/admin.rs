use crate::AppState;
use crate::api::error::AppError;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct ReloadResponse {
    pub message: String,
    /// Active sessions in the new snapshot
    pub sessions: usize,
}

#[utoipa::path(
    post,
    path = "/uploads/reload-cache",
    responses(
        (status = 200, description = "Session cache reloaded", body = ReloadResponse),
        (status = 401, description = "Invalid admin key"),
        (status = 500, description = "Session store unavailable")
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn reload_cache(State(state): State<AppState>) -> Result<Json<ReloadResponse>, AppError> {
    let sessions = state.cache.reload().await?;
    tracing::info!("Upload session cache reloaded ({} active)", sessions);

    Ok(Json(ReloadResponse {
        message: "Upload session cache reloaded successfully".to_string(),
        sessions,
    }))
}

#[derive(Deserialize, ToSchema)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Serialize, ToSchema)]
pub struct MaintenanceResponse {
    /// Operator-set flag
    pub enabled: bool,
    /// True while either the operator flag or a staging sweep blocks uploads
    pub active: bool,
}

#[utoipa::path(
    post,
    path = "/uploads/maintenance",
    request_body = MaintenanceRequest,
    responses(
        (status = 200, description = "Maintenance flag updated", body = MaintenanceResponse),
        (status = 401, description = "Invalid admin key")
    ),
    security(("admin_key" = [])),
    tag = "admin"
)]
pub async fn set_maintenance(
    State(state): State<AppState>,
    Json(req): Json<MaintenanceRequest>,
) -> Json<MaintenanceResponse> {
    let maintenance = state.gate.maintenance();
    maintenance.set_manual(req.enabled);
    tracing::info!(
        "Maintenance mode {}",
        if req.enabled { "enabled" } else { "disabled" }
    );

    Json(MaintenanceResponse {
        enabled: maintenance.is_manual(),
        active: maintenance.is_active(),
    })
}
