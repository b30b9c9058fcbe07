use crate::services::access_gate::AccessGate;
use crate::services::error::UploadError;
use crate::services::reassembly::{DeliveredFile, ReassemblyEngine};
use crate::services::session_cache::SessionRecord;
use crate::services::staging::{StagingArea, UnitKey};
use crate::utils::checksum::adler32;
use crate::utils::validation::{is_safe_token, sanitize_filename};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;
use validator::Validate;

/// Position of a chunk within its file, as declared by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMarker {
    Start,
    Intermediate,
    End,
    /// The whole file in one chunk.
    Single,
}

impl StatusMarker {
    /// First chunk of a fresh upload.
    pub fn begins_upload(self) -> bool {
        matches!(self, StatusMarker::Start | StatusMarker::Single)
    }

    pub fn completes_upload(self) -> bool {
        matches!(self, StatusMarker::End | StatusMarker::Single)
    }
}

impl FromStr for StatusMarker {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(StatusMarker::Start),
            "" => Ok(StatusMarker::Intermediate),
            "end" => Ok(StatusMarker::End),
            "single" => Ok(StatusMarker::Single),
            other => Err(UploadError::MalformedRequest(format!(
                "unknown status marker: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Validate)]
pub struct ChunkSubmission {
    #[validate(length(min = 1, max = 255, message = "originalName must be 1-255 characters"))]
    pub original_name: String,
    pub chunk_index: u32,
    #[validate(range(min = 1, max = 1_000_000, message = "totalChunks out of range"))]
    pub total_chunks: u32,
    pub status: StatusMarker,
    pub checksum: u32,
    #[validate(length(max = 128))]
    pub client_session_id: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub chunk_index: u32,
    pub duplicate: bool,
    /// Set once the final chunk triggered a successful merge.
    pub delivered: Option<DeliveredFile>,
}

pub struct ChunkReceiver {
    gate: Arc<AccessGate>,
    staging: Arc<StagingArea>,
    reassembly: Arc<ReassemblyEngine>,
}

impl ChunkReceiver {
    pub fn new(
        gate: Arc<AccessGate>,
        staging: Arc<StagingArea>,
        reassembly: Arc<ReassemblyEngine>,
    ) -> Self {
        Self {
            gate,
            staging,
            reassembly,
        }
    }

    /// Check `token` at the gate, then store the chunk.
    pub async fn receive_chunk(
        &self,
        token: &str,
        submission: ChunkSubmission,
        now: DateTime<Utc>,
    ) -> Result<ChunkReceipt, UploadError> {
        let session = self.gate.check_access(token, now).await?;
        self.receive_granted(token, &session, submission).await
    }

    /// Store a chunk for a session the gate has already granted.
    pub async fn receive_granted(
        &self,
        token: &str,
        session: &SessionRecord,
        submission: ChunkSubmission,
    ) -> Result<ChunkReceipt, UploadError> {
        let span = tracing::info_span!(
            "chunk",
            req_session_id = submission.client_session_id.as_deref().unwrap_or("-"),
            file = %submission.original_name,
            index = submission.chunk_index,
            total = submission.total_chunks,
        );
        let result = self
            .store_chunk(token, session, submission)
            .instrument(span)
            .await;
        self.staging.prune_locks();
        result
    }

    async fn store_chunk(
        &self,
        token: &str,
        session: &SessionRecord,
        submission: ChunkSubmission,
    ) -> Result<ChunkReceipt, UploadError> {
        submission
            .validate()
            .map_err(|e| UploadError::MalformedRequest(e.to_string()))?;
        if submission.chunk_index >= submission.total_chunks {
            return Err(UploadError::MalformedRequest(format!(
                "chunkIndex {} out of range for totalChunks {}",
                submission.chunk_index, submission.total_chunks
            )));
        }
        if !is_safe_token(token) {
            return Err(UploadError::InvalidToken);
        }
        let file_name = sanitize_filename(&submission.original_name)
            .map_err(|e| UploadError::MalformedRequest(e.to_string()))?;

        let index = submission.chunk_index;
        let total = submission.total_chunks;
        let key = UnitKey::new(token, &file_name);

        let session_dir = self.staging.ensure_session_dir(token).await?;
        let _unit_guard = self.staging.lock_unit(&key).await;

        if submission.status.begins_upload() {
            let removed = self.staging.reset_unit(&key).await?;
            if removed > 0 {
                tracing::info!("Removed {} stale parts for {}", removed, file_name);
            }
        }

        let computed = adler32(&submission.data);
        if computed != submission.checksum {
            tracing::warn!(
                "Checksum mismatch for chunk {}: expected {}, computed {}",
                index,
                submission.checksum,
                computed
            );
            return Err(UploadError::ChecksumMismatch {
                index,
                expected: submission.checksum,
                computed,
            });
        }

        self.staging.prepare_unit(&key, total).await?;

        let duplicate = self.staging.has_part(&key, index);
        if duplicate {
            tracing::info!("Chunk {} already exists, skipping", index);
        } else {
            self.staging.write_part(&key, index, &submission.data).await?;
            tracing::debug!("Chunk {} stored ({} bytes)", index, submission.data.len());
        }

        if !submission.status.completes_upload() {
            return Ok(ChunkReceipt {
                chunk_index: index,
                duplicate,
                delivered: None,
            });
        }

        let received = self.staging.received_count(&key);
        if received != total {
            tracing::error!(
                "Incomplete upload for {}: expected {} chunks, received {}",
                file_name,
                total,
                received
            );
            return Err(UploadError::IncompleteUpload {
                expected: total,
                received,
            });
        }

        if self.staging.claim_unit(&key).is_none() {
            // Lock is held, so this only happens if a sweep cleared the registry
            return Err(UploadError::IncompleteUpload {
                expected: total,
                received: 0,
            });
        }

        tracing::info!("All chunks received for {}, merging", file_name);
        let delivered = self
            .reassembly
            .merge(&key, total, &session_dir, &session.destination_path)
            .await?;

        Ok(ChunkReceipt {
            chunk_index: index,
            duplicate,
            delivered: Some(delivered),
        })
    }
}
