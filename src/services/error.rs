use thiserror::Error;

/// Every way a chunk submission or healthcheck can fail.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid URL")]
    InvalidToken,

    #[error("URL expired or not yet activated")]
    SessionExpired,

    #[error("Maintenance in progress, please try again later")]
    MaintenanceInProgress,

    #[error("Invalid chunk data: {0}")]
    MalformedRequest(String),

    #[error("Checksum mismatch for chunk {index}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        index: u32,
        expected: u32,
        computed: u32,
    },

    #[error("Incomplete upload, expected {expected} chunks but received {received}")]
    IncompleteUpload { expected: u32, received: u32 },

    #[error("Chunk {index} for {file_name} missing, aborting merge")]
    MissingChunk { file_name: String, index: u32 },

    #[error("Transfer to destination failed: {0}")]
    TransferError(String),

    #[error("Failed to list destination to resolve a unique filename: {0}")]
    DestinationListError(String),

    #[error("Session store unavailable: {0}")]
    SessionStore(String),

    #[error("Staging I/O error: {0}")]
    Staging(#[from] std::io::Error),
}

impl UploadError {
    /// Stable identifier returned to clients alongside the message
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidToken => "InvalidToken",
            UploadError::SessionExpired => "SessionExpired",
            UploadError::MaintenanceInProgress => "MaintenanceInProgress",
            UploadError::MalformedRequest(_) => "MalformedRequest",
            UploadError::ChecksumMismatch { .. } => "ChecksumMismatch",
            UploadError::IncompleteUpload { .. } => "IncompleteUpload",
            UploadError::MissingChunk { .. } => "MissingChunk",
            UploadError::TransferError(_) => "TransferError",
            UploadError::DestinationListError(_) => "DestinationListError",
            UploadError::SessionStore(_) => "SessionStoreError",
            UploadError::Staging(_) => "StagingError",
        }
    }
}
