//! Filesystem tier of the result cache
//!
//! One JSON document per key. File names start with a digest of the target
//! so a target's entries can be dropped without opening them.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use vigil_core::domain::{NormalizedResult, TargetIdentity};

use super::CacheKey;

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    target: TargetIdentity,
    adapter: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    result: NormalizedResult,
}

/// Result of reading one key from disk
#[derive(Debug)]
pub(crate) enum Loaded {
    Hit {
        adapter: String,
        result: NormalizedResult,
        created_at: DateTime<Utc>,
        remaining: Duration,
    },
    Miss,
    Corrupt(String),
}

pub struct FileCache {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, target: &TargetIdentity, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", target_prefix(target), key.as_str()))
    }

    /// Read `key`; expired and unreadable files are removed.
    pub(crate) async fn load(&self, key: &CacheKey, target: &TargetIdentity) -> Loaded {
        let path = self.path_for(target, key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Loaded::Miss,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cache file could not be read");
                return Loaded::Miss;
            }
        };

        let entry: StoredEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                self.remove(&path).await;
                return Loaded::Corrupt(e.to_string());
            }
        };

        match (entry.expires_at - Utc::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => Loaded::Hit {
                adapter: entry.adapter,
                result: entry.result,
                created_at: entry.created_at,
                remaining,
            },
            _ => {
                debug!(path = %path.display(), "Expired cache file removed");
                self.remove(&path).await;
                Loaded::Miss
            }
        }
    }

    /// Write `result` under `key`, replacing any previous file atomically.
    pub async fn save(
        &self,
        key: &CacheKey,
        target: &TargetIdentity,
        adapter: &str,
        result: &NormalizedResult,
        ttl: Duration,
    ) -> io::Result<()> {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or_else(|| io::Error::other(format!("TTL {:?} out of range", ttl)))?;
        let entry = StoredEntry {
            target: target.clone(),
            adapter: adapter.to_string(),
            created_at,
            expires_at,
            result: result.clone(),
        };
        let bytes = serde_json::to_vec(&entry).map_err(io::Error::other)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(target, key);
        let staging = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            key.as_str(),
            std::process::id(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&staging, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            self.remove(&staging).await;
            return Err(e);
        }
        Ok(())
    }

    /// Remove every file belonging to `target`; returns how many went.
    pub async fn invalidate(&self, target: &TargetIdentity) -> usize {
        let prefix = format!("{}-", target_prefix(target));
        let mut removed = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".json") {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(file = %name, error = %e, "Failed to remove cache file"),
                }
            }
        }
        removed
    }

    async fn remove(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
        }
    }
}

fn target_prefix(target: &TargetIdentity) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target.target_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(target.value.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}
