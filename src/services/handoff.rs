use crate::services::error::UploadError;
use crate::services::storage::{DestinationStore, PutOutcome};
use crate::utils::validation::{
    MAX_FILENAME_LENGTH, sanitize_destination_path, split_extension, truncate_to_boundary,
};
use std::path::Path;
use std::sync::Arc;

const DEFAULT_MAX_PROBES: u32 = 10_000;

/// `report.pdf`, `report (2).pdf`, `report (3).pdf`, ...
///
/// The stem is shortened when needed so a numbered name never exceeds
/// `MAX_FILENAME_LENGTH` bytes.
pub fn candidate_name(base_name: &str, attempt: u32) -> String {
    if attempt <= 1 {
        return base_name.to_string();
    }
    let (stem, ext) = split_extension(base_name);
    let suffix = format!(" ({}){}", attempt, ext);
    let budget = MAX_FILENAME_LENGTH.saturating_sub(suffix.len());
    format!("{}{}", truncate_to_boundary(stem, budget), suffix)
}

/// Moves finished artifacts into the destination store without ever
/// overwriting an existing entry.
pub struct StorageHandoff {
    destination: Arc<dyn DestinationStore>,
    max_probes: u32,
}

impl StorageHandoff {
    pub fn new(destination: Arc<dyn DestinationStore>) -> Self {
        Self {
            destination,
            max_probes: DEFAULT_MAX_PROBES,
        }
    }

    pub fn with_max_probes(mut self, max_probes: u32) -> Self {
        self.max_probes = max_probes.max(1);
        self
    }

    /// First counter at or after `start` whose name is free in `dir`.
    pub async fn resolve_unique_name(
        &self,
        dir: &Path,
        base_name: &str,
        start: u32,
    ) -> Result<(String, u32), UploadError> {
        for attempt in start..=self.max_probes {
            let name = candidate_name(base_name, attempt);
            let taken = self
                .destination
                .exists(dir, &name)
                .await
                .map_err(|e| UploadError::DestinationListError(e.to_string()))?;
            if !taken {
                return Ok((name, attempt));
            }
        }

        Err(UploadError::DestinationListError(format!(
            "no free name for {} after {} attempts",
            base_name, self.max_probes
        )))
    }

    /// Transfer `artifact` into `destination_path` under `base_name` or the
    /// first free variant of it. Returns the stored name.
    pub async fn deliver(
        &self,
        artifact: &Path,
        destination_path: &str,
        base_name: &str,
    ) -> Result<String, UploadError> {
        let dir = sanitize_destination_path(destination_path)
            .map_err(|e| UploadError::DestinationListError(e.to_string()))?;

        let mut start = 1;
        loop {
            let (name, attempt) = self.resolve_unique_name(&dir, base_name, start).await?;

            match self.destination.put_if_absent(artifact, &dir, &name).await {
                Ok(PutOutcome::Stored) => {
                    if attempt > 1 {
                        tracing::info!("Renamed {} to {} to avoid overwrite", base_name, name);
                    }
                    tracing::info!(
                        "File {} transferred to {} ({})",
                        name,
                        dir.display(),
                        self.destination.describe()
                    );
                    return Ok(name);
                }
                Ok(PutOutcome::AlreadyExists) => {
                    tracing::warn!(
                        "{} appeared at destination before transfer, probing again",
                        name
                    );
                    start = attempt + 1;
                }
                Err(e) => {
                    tracing::error!("Transfer of {} failed: {:#}", name, e);
                    return Err(UploadError::TransferError(e.to_string()));
                }
            }
        }
    }
}
