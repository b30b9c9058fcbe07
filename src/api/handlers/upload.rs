use crate::AppState;
use crate::api::error::AppError;
use crate::services::chunk_receiver::{ChunkSubmission, StatusMarker};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub message: String,
    pub chunk_index: u32,
    pub duplicate: bool,
    /// Name the file was stored under, set on the final chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_name: Option<String>,
}

#[derive(Default)]
struct ChunkForm {
    original_name: Option<String>,
    chunk_index: Option<String>,
    total_chunks: Option<String>,
    status: Option<String>,
    checksum: Option<String>,
    req_session_id: Option<String>,
    chunk: Option<Bytes>,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .ok_or_else(|| AppError::BadRequest(format!("Missing field: {}", field)))
}

fn parse_number(value: &Option<String>, field: &str) -> Result<u32, AppError> {
    required(value, field)?.parse().map_err(|_| {
        AppError::BadRequest(format!("Invalid {}: expected an unsigned integer", field))
    })
}

impl ChunkForm {
    fn into_submission(self) -> Result<ChunkSubmission, AppError> {
        let original_name = required(&self.original_name, "originalName")?.to_string();
        let chunk_index = parse_number(&self.chunk_index, "chunkIndex")?;
        let total_chunks = parse_number(&self.total_chunks, "totalChunks")?;
        let checksum = parse_number(&self.checksum, "checksum")?;
        let status: StatusMarker = self.status.as_deref().unwrap_or_default().parse()?;
        let data = self
            .chunk
            .ok_or_else(|| AppError::BadRequest("Missing field: chunk".to_string()))?;

        Ok(ChunkSubmission {
            original_name,
            chunk_index,
            total_chunks,
            status,
            checksum,
            client_session_id: self.req_session_id.filter(|s| !s.is_empty()),
            data,
        })
    }
}

fn multipart_error(e: MultipartError, max_mb: usize) -> AppError {
    let err_msg = e.to_string();
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE || err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge(format!(
            "Chunk too large. Max allowed size is {}MB.",
            max_mb
        ))
    } else {
        AppError::BadRequest(err_msg)
    }
}

#[utoipa::path(
    post,
    path = "/uploads/upload-chunk/{token}",
    params(("token" = String, Path, description = "Upload link token")),
    request_body(content = Multipart, description = "One chunk with its metadata"),
    responses(
        (status = 200, description = "Chunk accepted", body = ChunkUploadResponse),
        (status = 400, description = "Malformed request"),
        (status = 403, description = "Invalid URL"),
        (status = 409, description = "Incomplete upload or missing chunk"),
        (status = 410, description = "URL expired or not yet activated"),
        (status = 413, description = "Chunk too large"),
        (status = 422, description = "Checksum mismatch"),
        (status = 502, description = "Transfer to destination failed"),
        (status = 503, description = "Maintenance in progress")
    ),
    tag = "uploads"
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(token): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, AppError> {
    let max_mb = state.config.chunk_size_mb;

    // Token, window and maintenance are checked before any of the body is read
    let session = state.gate.check_access(&token, Utc::now()).await?;

    // Capture errors so the rest of the body can be drained before replying
    let result: Result<Json<ChunkUploadResponse>, AppError> = async {
        let mut form = ChunkForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_mb))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "chunk" {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_mb))?;
                form.chunk = Some(data);
                continue;
            }

            let text = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            match name.as_str() {
                "originalName" => form.original_name = Some(text),
                "chunkIndex" => form.chunk_index = Some(text),
                "totalChunks" => form.total_chunks = Some(text),
                "status" => form.status = Some(text),
                "checksum" => form.checksum = Some(text),
                "req_sessionId" => form.req_session_id = Some(text),
                _ => tracing::debug!("Ignoring unknown multipart field: {}", name),
            }
        }

        let submission = form.into_submission()?;
        let receipt = state
            .receiver
            .receive_granted(&token, &session, submission)
            .await?;

        let message = match (&receipt.delivered, receipt.duplicate) {
            (Some(_), _) => "File uploaded and merged successfully".to_string(),
            (None, true) => format!("Chunk {} already exists, skipping", receipt.chunk_index),
            (None, false) => format!("Chunk {} uploaded successfully", receipt.chunk_index),
        };

        Ok(Json(ChunkUploadResponse {
            message,
            chunk_index: receipt.chunk_index,
            duplicate: receipt.duplicate,
            stored_name: receipt.delivered.map(|d| d.stored_name),
        }))
    }
    .await;

    match result {
        Ok(res) => Ok(res),
        Err(e) => {
            // Drain the remaining stream so the client sees the error instead of a reset
            tracing::warn!("Chunk upload failed: {}. Consuming remaining stream...", e);
            while let Ok(Some(mut field)) = multipart.next_field().await {
                while let Ok(Some(_)) = field.chunk().await {}
            }
            Err(e)
        }
    }
}
