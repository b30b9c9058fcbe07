use crate::config::UploadConfig;
use crate::services::storage::{DestinationStore, FilesystemDestination, S3Destination};
use anyhow::{Context, bail};
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

pub async fn setup_destination(config: &UploadConfig) -> anyhow::Result<Arc<dyn DestinationStore>> {
    match config.destination_backend.as_str() {
        "filesystem" => {
            info!("🗄️  Share root: {}", config.share_root.display());
            Ok(Arc::new(FilesystemDestination::new(config.share_root.clone())))
        }
        "s3" => Ok(Arc::new(setup_s3().await?)),
        other => bail!("unknown DESTINATION_BACKEND: {}", other),
    }
}

async fn setup_s3() -> anyhow::Result<S3Destination> {
    let endpoint_url = env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT must be set")?;
    let access_key = env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY must be set")?;
    let secret_key = env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY must be set")?;
    let bucket = env::var("MINIO_BUCKET").context("MINIO_BUCKET must be set")?;
    let region = env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let prefix = env::var("MINIO_PREFIX").unwrap_or_default();

    info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, bucket);

    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new(region))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Ok(S3Destination::new(s3_client, bucket, prefix))
}
