//! Content-addressed store for uploaded CSV files.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of the registry file inside the upload directory.
pub const INDEX_FILE: &str = "index.json";

/// A stored upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadEntry {
    pub id: Uuid,
    pub file_name: String,
    pub hash: String,
    pub path: PathBuf,
    pub size_bytes: usize,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UploadIndex {
    uploads: Vec<UploadEntry>,
}

/// Directory of uploads named by SHA-256 content hash, with a JSON index.
#[derive(Debug)]
pub struct UploadStore {
    dir: PathBuf,
    index: UploadIndex,
}

impl UploadStore {
    /// Open (or create) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let index_path = dir.join(INDEX_FILE);
        let index = if index_path.exists() {
            let content = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&content)?
        } else {
            UploadIndex::default()
        };
        tracing::debug!(dir = %dir.display(), uploads = index.uploads.len(), "Opened upload store");
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `bytes` under their content hash. Identical content returns the
    /// existing entry.
    pub fn store(&mut self, file_name: &str, bytes: &[u8], row_count: usize) -> Result<UploadEntry> {
        let hash = hash_bytes(bytes);
        if let Some(existing) = self.index.uploads.iter().find(|e| e.hash == hash) {
            tracing::debug!(hash = %hash, "Upload already stored");
            return Ok(existing.clone());
        }

        let path = self.dir.join(format!("{hash}.csv"));
        atomic_write(&path, bytes)?;

        let entry = UploadEntry {
            id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            hash,
            path,
            size_bytes: bytes.len(),
            row_count,
            created_at: Utc::now(),
        };
        self.index.uploads.push(entry.clone());
        atomic_write_json(&self.dir.join(INDEX_FILE), &self.index)?;

        tracing::info!(id = %entry.id, file = file_name, "Stored upload");
        Ok(entry)
    }

    /// All uploads, oldest first.
    pub fn list(&self) -> &[UploadEntry] {
        &self.index.uploads
    }

    /// Find by id, or by a hash prefix of at least 8 characters.
    pub fn find(&self, key: &str) -> Option<&UploadEntry> {
        self.index.uploads.iter().find(|e| {
            e.id.to_string() == key || (key.len() >= 8 && e.hash.starts_with(key))
        })
    }

    /// Read the stored content of an upload.
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let entry = self
            .find(key)
            .ok_or_else(|| PipelineError::dataset(format!("Upload not found: {key}")))?;
        Ok(std::fs::read(&entry.path)?)
    }
}

/// Compute SHA-256 hash of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Serialize to pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write to a `.tmp` sibling, then rename over the target.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
