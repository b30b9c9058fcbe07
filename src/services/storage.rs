use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Result of a create-if-absent transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// Another writer took the name between the probe and the write.
    AlreadyExists,
}

/// Network store that receives finished uploads.
///
/// `dir` is always a relative path already checked to stay below the
/// store's root.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn exists(&self, dir: &Path, name: &str) -> Result<bool>;
    async fn put_if_absent(&self, source: &Path, dir: &Path, name: &str) -> Result<PutOutcome>;
    async fn ping(&self) -> Result<()>;
    fn describe(&self) -> String;
}

/// A mounted share (NAS, SMB/NFS mount) addressed as a local directory tree.
pub struct FilesystemDestination {
    root: PathBuf,
}

impl FilesystemDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn check_root(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .with_context(|| format!("share root {} is not reachable", self.root.display()))?;
        if !meta.is_dir() {
            return Err(anyhow!("share root {} is not a directory", self.root.display()));
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationStore for FilesystemDestination {
    async fn exists(&self, dir: &Path, name: &str) -> Result<bool> {
        self.check_root().await?;
        let exists = tokio::fs::try_exists(self.root.join(dir).join(name)).await?;
        Ok(exists)
    }

    async fn put_if_absent(&self, source: &Path, dir: &Path, name: &str) -> Result<PutOutcome> {
        self.check_root().await?;
        let target_dir = self.root.join(dir);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .with_context(|| format!("failed to create {}", target_dir.display()))?;

        let target = target_dir.join(name);
        let mut output = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(PutOutcome::AlreadyExists),
            Err(e) => return Err(e.into()),
        };

        let copied = async {
            let mut input = tokio::fs::File::open(source).await?;
            tokio::io::copy(&mut input, &mut output).await?;
            output.flush().await?;
            output.sync_all().await
        }
        .await;

        if let Err(e) = copied {
            // Never leave a truncated entry at the destination
            drop(output);
            let _ = tokio::fs::remove_file(&target).await;
            return Err(anyhow!(e).context(format!("failed to write {}", target.display())));
        }

        Ok(PutOutcome::Stored)
    }

    async fn ping(&self) -> Result<()> {
        self.check_root().await
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

/// S3-compatible object store (MinIO etc.).
pub struct S3Destination {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Destination {
    pub fn new(client: Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, dir: &Path, name: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.prefix.is_empty() {
            parts.push(self.prefix.clone());
        }
        for component in dir.components() {
            if let Component::Normal(part) = component {
                parts.push(part.to_string_lossy().into_owned());
            }
        }
        parts.push(name.to_string());
        parts.join("/")
    }
}

#[async_trait]
impl DestinationStore for S3Destination {
    async fn exists(&self, dir: &Path, name: &str) -> Result<bool> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(dir, name))
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow!(service_error))
                }
            }
        }
    }

    async fn put_if_absent(&self, source: &Path, dir: &Path, name: &str) -> Result<PutOutcome> {
        let key = self.key(dir, name);
        let body = ByteStream::from_path(source)
            .await
            .with_context(|| format!("failed to open {}", source.display()))?;

        let res = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .if_none_match("*")
            .body(body)
            .send()
            .await;

        match res {
            Ok(_) => Ok(PutOutcome::Stored),
            Err(e) => {
                let status = e.raw_response().map(|r| r.status().as_u16());
                if status == Some(412) {
                    return Ok(PutOutcome::AlreadyExists);
                }
                tracing::error!(
                    "S3 put_object failed: bucket={}, key={}, error={:?}",
                    self.bucket,
                    key,
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3:{}/{}", self.bucket, self.prefix)
    }
}
