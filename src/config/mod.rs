use std::env;
use std::path::PathBuf;

/// Runtime configuration for the upload gateway
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Negotiated chunk size in MB, reported to clients (default: 3)
    pub chunk_size_mb: usize,

    /// Extra bytes accepted on top of the chunk size for multipart overhead (default: 1 MB)
    pub chunk_size_tolerance: usize,

    /// Root directory holding per-session staging folders
    pub staging_root: PathBuf,

    /// Destination backend: "filesystem" or "s3" (default: "filesystem")
    pub destination_backend: String,

    /// Mounted share root used by the filesystem backend
    pub share_root: PathBuf,

    /// Label shown to clients on healthcheck
    pub server_name: String,

    /// Reload the session cache before every access check (default: true)
    pub reload_per_request: bool,

    /// Hour of day (0-23) at which the staging janitor sweeps (default: 5)
    pub janitor_hour: u32,

    /// UTC offset in hours used to interpret `janitor_hour` (default: +8)
    pub janitor_utc_offset_hours: i32,

    /// Sweep the staging root once at startup (default: true)
    pub janitor_on_startup: bool,

    /// Shared key for the admin endpoints; unset leaves them open
    pub admin_api_key: Option<String>,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: 3,
            chunk_size_tolerance: 1024 * 1024,
            staging_root: PathBuf::from("/mnt/nas_uploads/temp_uploads"),
            destination_backend: "filesystem".to_string(),
            share_root: PathBuf::from("/mnt/nas_uploads/share_folder"),
            server_name: "NAS".to_string(),
            reload_per_request: true,
            janitor_hour: 5,
            janitor_utc_offset_hours: 8,
            janitor_on_startup: true,
            admin_api_key: None,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            chunk_size_mb: env::var("CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default.chunk_size_mb),

            chunk_size_tolerance: env::var("CHUNK_SIZE_TOLERANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.chunk_size_tolerance),

            staging_root: env::var("STAGING_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.staging_root),

            destination_backend: env::var("DESTINATION_BACKEND")
                .map(|v| v.to_lowercase())
                .unwrap_or(default.destination_backend),

            share_root: env::var("SHARE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.share_root),

            server_name: env::var("SERVER_NAME").unwrap_or(default.server_name),

            reload_per_request: env::var("SESSION_RELOAD_PER_REQUEST")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.reload_per_request),

            janitor_hour: env::var("JANITOR_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|h| *h < 24)
                .unwrap_or(default.janitor_hour),

            janitor_utc_offset_hours: env::var("JANITOR_UTC_OFFSET_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|h: &i32| (-23..=23).contains(h))
                .unwrap_or(default.janitor_utc_offset_hours),

            janitor_on_startup: env::var("JANITOR_ON_STARTUP")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.janitor_on_startup),

            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Local development layout under ./data, no startup sweep
    pub fn development() -> Self {
        Self {
            staging_root: PathBuf::from("./data/temp_uploads"),
            share_root: PathBuf::from("./data/share_folder"),
            server_name: "dev".to_string(),
            janitor_on_startup: false,
            ..Self::default()
        }
    }

    /// Chunk size in bytes
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_mb * 1024 * 1024
    }

    /// Largest request body accepted on the chunk route
    pub fn max_chunk_body(&self) -> usize {
        self.chunk_size_bytes() + self.chunk_size_tolerance
    }
}
