use crate::services::error::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

fn upload_status(err: &UploadError) -> StatusCode {
    match err {
        UploadError::InvalidToken => StatusCode::FORBIDDEN,
        UploadError::SessionExpired => StatusCode::GONE,
        UploadError::MaintenanceInProgress => StatusCode::SERVICE_UNAVAILABLE,
        UploadError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        UploadError::ChecksumMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        UploadError::IncompleteUpload { .. } | UploadError::MissingChunk { .. } => {
            StatusCode::CONFLICT
        }
        UploadError::TransferError(_) | UploadError::DestinationListError(_) => {
            StatusCode::BAD_GATEWAY
        }
        UploadError::SessionStore(_) | UploadError::Staging(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::Upload(e) => {
                let status = upload_status(&e);
                let message = match &e {
                    UploadError::TransferError(_) => {
                        tracing::error!("Transfer error: {}", e);
                        "Transfer to destination failed".to_string()
                    }
                    UploadError::DestinationListError(_) => {
                        tracing::error!("Destination list error: {}", e);
                        "Failed to list destination to resolve a unique filename".to_string()
                    }
                    UploadError::SessionStore(_) | UploadError::Staging(_) => {
                        tracing::error!("Upload backend error: {:?}", e);
                        "Internal Server Error".to_string()
                    }
                    _ => e.to_string(),
                };
                (status, e.kind(), message)
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "Unauthorized", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "MalformedRequest", msg),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge", msg)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal",
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal",
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}
