use crate::services::error::UploadError;
use crate::services::handoff::StorageHandoff;
use crate::services::staging::{UnitKey, part_file_name};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFile {
    pub stored_name: String,
    pub destination_path: String,
    pub size: u64,
}

pub struct ReassemblyEngine {
    handoff: Arc<StorageHandoff>,
}

impl ReassemblyEngine {
    pub fn new(handoff: Arc<StorageHandoff>) -> Self {
        Self { handoff }
    }

    /// Concatenate the unit's parts `0..total` from `staging_dir` in index
    /// order and hand the result to the destination under the unit's file name.
    ///
    /// Each part is deleted once copied. The artifact is deleted on every
    /// path out of this function.
    pub async fn merge(
        &self,
        key: &UnitKey,
        total_chunks: u32,
        staging_dir: &Path,
        destination_path: &str,
    ) -> Result<DeliveredFile, UploadError> {
        let artifact = staging_dir.join(format!(".{}.assembled", Uuid::new_v4().simple()));

        let result = self
            .assemble_and_deliver(&artifact, key, total_chunks, staging_dir, destination_path)
            .await;

        match tokio::fs::remove_file(&artifact).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove artifact {}: {}", artifact.display(), e),
        }

        result
    }

    async fn assemble_and_deliver(
        &self,
        artifact: &Path,
        key: &UnitKey,
        total_chunks: u32,
        staging_dir: &Path,
        destination_path: &str,
    ) -> Result<DeliveredFile, UploadError> {
        let size = assemble(artifact, key, total_chunks, staging_dir).await?;
        tracing::info!("Chunks merged successfully for {} ({} bytes)", key.file_name, size);

        let stored_name = self
            .handoff
            .deliver(artifact, destination_path, &key.file_name)
            .await?;

        Ok(DeliveredFile {
            stored_name,
            destination_path: destination_path.to_string(),
            size,
        })
    }
}

async fn assemble(
    artifact: &Path,
    key: &UnitKey,
    total_chunks: u32,
    staging_dir: &Path,
) -> Result<u64, UploadError> {
    let file = tokio::fs::File::create(artifact).await?;
    let mut writer = BufWriter::new(file);
    let mut size = 0u64;

    for index in 0..total_chunks {
        let part = staging_dir.join(part_file_name(&key.stem, index));
        let mut input = match tokio::fs::File::open(&part).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::error!("Chunk {} for {} missing, aborting merge", index, key.file_name);
                return Err(UploadError::MissingChunk {
                    file_name: key.file_name.clone(),
                    index,
                });
            }
            Err(e) => return Err(e.into()),
        };

        size += tokio::io::copy(&mut input, &mut writer).await?;
        drop(input);
        tokio::fs::remove_file(&part).await?;
    }

    writer.flush().await?;
    writer.get_ref().sync_all().await?;
    Ok(size)
}
