//! Per-session scratch space for chunk parts.
//!
//! Layout: `<root>/<session token>/<stem>.part<index>`, where the stem is a
//! name-based UUID of the file name. On-disk names stay short whatever the
//! client's file name length. Parts are written under a temporary name and
//! renamed into place, so a part file that exists is always complete.
//!
//! Alongside the files, an in-memory registry tracks each upload unit's
//! declared chunk count and the indices received so far. Completeness is
//! read from the registry. When the registry has no entry for a unit (fresh
//! process, or after a sweep) it is seeded from the part files on disk.

use crate::services::error::UploadError;
use crate::utils::keyed_mutex::KeyedMutex;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

const PART_MARKER: &str = ".part";
const TEMP_SUFFIX: &str = ".tmp";

/// One file being uploaded within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub token: String,
    pub file_name: String,
    /// Fixed-length prefix of this unit's part files.
    pub stem: String,
}

impl UnitKey {
    pub fn new(token: &str, file_name: &str) -> Self {
        Self {
            token: token.to_string(),
            file_name: file_name.to_string(),
            stem: staging_stem(file_name),
        }
    }
}

/// 32 hex chars, stable across restarts so staged parts can be found again.
pub fn staging_stem(file_name: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, file_name.as_bytes())
        .simple()
        .to_string()
}

/// Fixed-size bitset of received chunk indices.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    words: Vec<u64>,
    len: u32,
    count: u32,
}

impl ChunkSet {
    pub fn new(len: u32) -> Self {
        Self {
            words: vec![0; (len as usize).div_ceil(64)],
            len,
            count: 0,
        }
    }

    /// Returns false if the index was already present or out of range.
    pub fn insert(&mut self, index: u32) -> bool {
        if index >= self.len {
            return false;
        }
        let (word, bit) = ((index / 64) as usize, index % 64);
        let mask = 1u64 << bit;
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.count += 1;
        true
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.len && self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.len
    }
}

#[derive(Debug, Clone)]
pub struct UploadUnit {
    pub total_chunks: u32,
    pub received: ChunkSet,
}

impl UploadUnit {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks,
            received: ChunkSet::new(total_chunks),
        }
    }
}

pub fn part_file_name(stem: &str, index: u32) -> String {
    format!("{}{}{}", stem, PART_MARKER, index)
}

/// Parse `<stem>.part<index>` back into the index.
fn parse_part_index(entry_name: &str, stem: &str) -> Option<u32> {
    entry_name
        .strip_prefix(stem)?
        .strip_prefix(PART_MARKER)?
        .parse()
        .ok()
}

/// True for parts and in-flight temp files belonging to `stem`.
fn belongs_to_unit(entry_name: &str, stem: &str) -> bool {
    match entry_name
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix(PART_MARKER))
    {
        Some(rest) => {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                return false;
            }
            let tail = &rest[digits..];
            tail.is_empty()
                || tail
                    .strip_prefix('.')
                    .and_then(|t| t.strip_suffix(TEMP_SUFFIX))
                    .is_some_and(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()))
        }
        None => false,
    }
}

pub struct StagingArea {
    root: PathBuf,
    units: DashMap<UnitKey, UploadUnit>,
    locks: KeyedMutex<UnitKey>,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            units: DashMap::new(),
            locks: KeyedMutex::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, token: &str) -> PathBuf {
        self.root.join(token)
    }

    pub fn part_path(&self, key: &UnitKey, index: u32) -> PathBuf {
        self.session_dir(&key.token)
            .join(part_file_name(&key.stem, index))
    }

    pub async fn ensure_root(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub async fn ensure_session_dir(&self, token: &str) -> Result<PathBuf, UploadError> {
        let dir = self.session_dir(token);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Serializes every mutation of one upload unit. Hold the guard across
    /// reset, persist and the completion claim.
    pub async fn lock_unit(&self, key: &UnitKey) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }

    /// Drop lock entries for units nobody is working on. Call after releasing
    /// a unit guard.
    pub fn prune_locks(&self) {
        self.locks.cleanup();
    }

    /// Forget the unit and delete all of its parts. Returns the number of files removed.
    pub async fn reset_unit(&self, key: &UnitKey) -> Result<usize, UploadError> {
        self.units.remove(key);

        let dir = self.session_dir(&key.token);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if belongs_to_unit(name, &key.stem) {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(removed)
    }

    /// Make sure the registry has an entry for `key` declared with `total_chunks`.
    ///
    /// A unit seen for the first time is seeded from any parts already on disk.
    /// A unit that was declared with a different count is rejected.
    pub async fn prepare_unit(&self, key: &UnitKey, total_chunks: u32) -> Result<(), UploadError> {
        if let Some(unit) = self.units.get(key) {
            if unit.total_chunks != total_chunks {
                return Err(UploadError::MalformedRequest(format!(
                    "totalChunks changed from {} to {} for {}",
                    unit.total_chunks, total_chunks, key.file_name
                )));
            }
            return Ok(());
        }

        let mut unit = UploadUnit::new(total_chunks);
        for index in self.parts_on_disk(key).await? {
            if !unit.received.insert(index) {
                tracing::warn!(
                    "Ignoring staged part {} of {} outside declared total {}",
                    index,
                    key.file_name,
                    total_chunks
                );
            }
        }
        self.units.insert(key.clone(), unit);
        Ok(())
    }

    async fn parts_on_disk(&self, key: &UnitKey) -> Result<Vec<u32>, UploadError> {
        let dir = self.session_dir(&key.token);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = entry
                .file_name()
                .to_str()
                .and_then(|name| parse_part_index(name, &key.stem))
            {
                indices.push(index);
            }
        }
        Ok(indices)
    }

    pub fn has_part(&self, key: &UnitKey, index: u32) -> bool {
        self.units
            .get(key)
            .is_some_and(|unit| unit.received.contains(index))
    }

    pub fn received_count(&self, key: &UnitKey) -> u32 {
        self.units
            .get(key)
            .map(|unit| unit.received.count())
            .unwrap_or(0)
    }

    /// Persist one part and record it. The unit must have been prepared.
    pub async fn write_part(
        &self,
        key: &UnitKey,
        index: u32,
        data: &[u8],
    ) -> Result<PathBuf, UploadError> {
        let final_path = self.part_path(key, index);
        let temp_path = final_path.with_file_name(format!(
            "{}.{}{}",
            part_file_name(&key.stem, index),
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        let written = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, &final_path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Some(mut unit) = self.units.get_mut(key) {
            unit.received.insert(index);
        }
        Ok(final_path)
    }

    /// Take the unit out of the registry so exactly one caller merges it.
    pub fn claim_unit(&self, key: &UnitKey) -> Option<UploadUnit> {
        self.units.remove(key).map(|(_, unit)| unit)
    }

    pub fn tracked_units(&self) -> usize {
        self.units.len()
    }

    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Remove everything directly under the staging root and forget all units.
    ///
    /// Returns `(removed, failed)` entry counts.
    pub async fn clear_all(&self) -> Result<(usize, usize), UploadError> {
        self.units.clear();
        self.locks.cleanup();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.ensure_root().await?;
                return Ok((0, 0));
            }
            Err(e) => return Err(e.into()),
        };

        let (mut removed, mut failed) = (0, 0);
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::error!("Failed to delete {}: {}", path.display(), e);
                    failed += 1;
                }
            }
        }

        Ok((removed, failed))
    }
}
