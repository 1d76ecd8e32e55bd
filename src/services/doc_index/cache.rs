//! Persistent doc-embedding cache.
//!
//! One JSON file at `${CACHE_DIR}/docs-cache.json` keyed by source URL.
//! Entries keep the fetched content, its SHA-256 hash, the chunk texts and
//! their embeddings; a reload reuses embeddings as long as the freshly
//! fetched content hashes to the same value and the entry is young enough.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::chunker::ChunkType;

pub const CACHE_FILE_NAME: &str = "docs-cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedChunk {
    pub content: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDoc {
    pub content: String,
    pub content_hash: String,
    pub chunks: Vec<CachedChunk>,
    pub embeddings: Vec<Vec<f32>>,
    pub timestamp: DateTime<Utc>,
}

impl CachedDoc {
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.timestamp).num_days()
    }

    /// Embeddings are only reusable when they line up with the chunks
    pub fn is_consistent(&self) -> bool {
        self.chunks.len() == self.embeddings.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocsCacheFile {
    pub docs: HashMap<String, CachedDoc>,
    #[serde(rename = "lastCheck")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Handle to the on-disk cache file
pub struct DocCache {
    path: PathBuf,
}

impl DocCache {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self { path: cache_dir.as_ref().join(CACHE_FILE_NAME) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache, falling back to empty on a missing or corrupt file
    pub fn load(&self) -> DocsCacheFile {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(
                        "Doc cache at {} is corrupt ({}), starting fresh",
                        self.path.display(),
                        e
                    );
                    DocsCacheFile::default()
                },
            },
            Err(_) => DocsCacheFile::default(),
        }
    }

    pub fn save(&self, file: &DocsCacheFile) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string(file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&self.path, body)
    }

    /// Remove the cache file; returns whether anything was deleted
    pub fn clear(&self) -> bool {
        match std::fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Failed to clear doc cache {}: {}", self.path.display(), e);
                false
            },
        }
    }
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
