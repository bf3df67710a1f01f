//! Content fingerprint for repository targets
//!
//! A repository scanned twice under the same path must not reuse results
//! after its files change, so the cache key also covers a digest of every
//! file's relative path, size and modification time.

use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use vigil_core::domain::{TargetIdentity, TargetType};

/// Digest of a local repository's file tree, or `None` when the target is not
/// a directory on this machine.
pub fn content_fingerprint(target: &TargetIdentity) -> Option<String> {
    if target.target_type != TargetType::Repository {
        return None;
    }
    let root = Path::new(&target.value);
    if !root.is_dir() {
        return None;
    }

    let mut hasher = Sha256::new();
    let mut files = 0usize;
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
    {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_nanos())
            .unwrap_or_default();

        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(metadata.len().to_le_bytes());
        hasher.update(modified.to_le_bytes());
        files += 1;
    }

    debug!(target = %target, files, "Repository fingerprinted");
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(path: &Path) -> TargetIdentity {
        TargetIdentity::new(TargetType::Repository, path.to_string_lossy())
    }

    #[test]
    fn test_fingerprint_changes_when_a_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.py"), "print('hi')\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "demo\n").unwrap();

        let first = content_fingerprint(&repository(dir.path())).unwrap();
        assert_eq!(content_fingerprint(&repository(dir.path())), Some(first.clone()));

        std::fs::write(
            dir.path().join("src/main.py"),
            "import os\nos.system(input())\n",
        )
        .unwrap();
        assert_ne!(content_fingerprint(&repository(dir.path())), Some(first.clone()));
    }

    #[test]
    fn test_fingerprint_changes_when_a_file_is_added() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.js"), "1\n").unwrap();
        let first = content_fingerprint(&repository(dir.path()));

        std::fs::write(dir.path().join("config.js"), "2\n").unwrap();
        assert_ne!(content_fingerprint(&repository(dir.path())), first);
    }

    #[test]
    fn test_non_local_targets_have_no_fingerprint() {
        assert!(
            content_fingerprint(&TargetIdentity::new(TargetType::Hostname, "example.com"))
                .is_none()
        );
        assert!(
            content_fingerprint(&TargetIdentity::new(
                TargetType::Repository,
                "https://github.com/acme/missing"
            ))
            .is_none()
        );
    }
}
