//! Optional per-unit artifact cache.
//!
//! Compiled page/component artifacts are memoized on disk keyed by a hash
//! of the source bytes, one cache tree per platform. A hit skips the
//! transform but still replays dependency discovery through the stored
//! import ids, so the resource graph stays complete. Corrupt entries are
//! invalidated on read.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::platform::Platform;

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedArtifacts {
    pub script: String,
    pub template: Option<String>,
    pub config: Option<String>,
    /// Import ids to replay for dependency discovery.
    pub deps: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    hash: String,
    artifacts: CachedArtifacts,
}

pub struct ArtifactCache {
    cache_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(project_root: &Path, platform: Platform) -> Self {
        let cache_dir = project_root
            .join(".kaleido/cache")
            .join(platform.row().env_id);
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).ok();
        }
        ArtifactCache { cache_dir }
    }

    pub fn compute_hash(source: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source);
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, file_path: &Path) -> PathBuf {
        let safe_name = file_path
            .to_string_lossy()
            .replace(['/', '\\', ':'], "_");
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    pub fn get(&self, file_path: &Path, source: &[u8]) -> Option<CachedArtifacts> {
        let entry_path = self.entry_path(file_path);
        let data = fs::read_to_string(&entry_path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(_) => {
                // Corrupt entry, drop it.
                fs::remove_file(&entry_path).ok();
                return None;
            }
        };

        if entry.hash == Self::compute_hash(source) {
            debug!(path = %file_path.display(), "artifact cache hit");
            Some(entry.artifacts)
        } else {
            None
        }
    }

    pub fn set(&self, file_path: &Path, source: &[u8], artifacts: CachedArtifacts) {
        let entry = CacheEntry {
            hash: Self::compute_hash(source),
            artifacts,
        };
        if let Ok(data) = serde_json::to_string(&entry) {
            fs::write(self.entry_path(file_path), data).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_artifacts_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), Platform::Wx);
        let source = b"class A {}" as &[u8];
        let path = Path::new("/p/source/pages/a.js");

        assert!(cache.get(path, source).is_none());

        cache.set(
            path,
            source,
            CachedArtifacts {
                script: "compiled".into(),
                template: Some("<view />".into()),
                config: None,
                deps: vec!["./index.scss".into()],
            },
        );

        let hit = cache.get(path, source).unwrap();
        assert_eq!(hit.script, "compiled");
        assert_eq!(hit.deps, vec!["./index.scss".to_string()]);

        // Stale on content change.
        assert!(cache.get(path, b"class B {}").is_none());
    }

    #[test]
    fn corrupt_entries_are_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), Platform::Ali);
        let path = Path::new("/p/source/pages/a.js");

        std::fs::write(cache.entry_path(path), "not json").unwrap();
        assert!(cache.get(path, b"x").is_none());
        assert!(!cache.entry_path(path).exists());
    }

    #[test]
    fn platforms_use_separate_cache_trees() {
        let dir = tempfile::tempdir().unwrap();
        let wx = ArtifactCache::new(dir.path(), Platform::Wx);
        let ali = ArtifactCache::new(dir.path(), Platform::Ali);
        let path = Path::new("/p/source/pages/a.js");

        wx.set(
            path,
            b"src",
            CachedArtifacts {
                script: "wx".into(),
                template: None,
                config: None,
                deps: Vec::new(),
            },
        );
        assert!(ali.get(path, b"src").is_none());
        assert!(wx.get(path, b"src").is_some());
    }
}
