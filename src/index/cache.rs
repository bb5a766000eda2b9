// src/index/cache.rs
// Persisted embedding cache: one binary artifact, atomically replaced.
//
// Writers serialize across processes through an advisory lock on a
// sibling lock file. Readers never take the lock: the atomic rename
// guarantees they see either the old file or the new file in full.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// On-disk cache artifact. The model identifier and dimensionality act
/// as a format guard: any mismatch discards the whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheFile {
    pub model: String,
    pub dimensions: u32,
    /// content_hash -> unit-norm vector
    pub vectors: BTreeMap<String, Vec<f32>>,
    /// "{source}:{session_id}" -> session fingerprint (live sessions only)
    pub fingerprints: BTreeMap<String, String>,
}

/// Handle to the cache artifact under a cache directory.
pub struct CacheStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl CacheStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join("index.bin"),
            lock_path: cache_dir.join("index.lock"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted cache, or an empty one.
    ///
    /// A missing file, a corrupt file, and a model/dimension mismatch all
    /// resolve to an empty cache; rebuilding is a one-time cost, never
    /// fatal.
    pub fn load(&self, model: &str, dimensions: usize) -> CacheFile {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(_) => {
                debug!(path = %self.path.display(), "No persisted cache, starting empty");
                return CacheFile::empty(model, dimensions);
            }
        };

        let cache: CacheFile = match postcard::from_bytes(&bytes) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding corrupt embedding cache");
                return CacheFile::empty(model, dimensions);
            }
        };

        if cache.model != model || cache.dimensions as usize != dimensions {
            warn!(
                cached_model = %cache.model,
                cached_dimensions = cache.dimensions,
                model,
                dimensions,
                "Embedding model changed, discarding cache"
            );
            return CacheFile::empty(model, dimensions);
        }

        debug!(
            vectors = cache.vectors.len(),
            sessions = cache.fingerprints.len(),
            "Loaded persisted embedding cache"
        );
        cache
    }

    /// Persist the cache atomically: temp file + fsync + rename, under an
    /// exclusive advisory lock shared across processes.
    pub fn persist(&self, cache: &CacheFile) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;

        let result = self.write_locked(cache);

        // Explicit unlock so an error path doesn't hold the lock until drop
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    fn write_locked(&self, cache: &CacheFile) -> Result<()> {
        let bytes = postcard::to_allocvec(cache)?;
        let tmp_path = self.path.with_extension("bin.tmp");

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;

        // fsync parent directory (Unix-specific for crash safety)
        #[cfg(unix)]
        {
            if let Some(dir) = self.path.parent() {
                if let Ok(dir_file) = File::open(dir) {
                    let _ = dir_file.sync_all();
                }
            }
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "Persisted embedding cache");
        Ok(())
    }
}

impl CacheFile {
    fn empty(model: &str, dimensions: usize) -> Self {
        Self {
            model: model.to_string(),
            dimensions: dimensions as u32,
            vectors: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(model: &str) -> CacheFile {
        let mut vectors = BTreeMap::new();
        vectors.insert("abc".to_string(), vec![0.6, 0.8]);
        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("cli:s1".to_string(), "fp1".to_string());
        CacheFile {
            model: model.to_string(),
            dimensions: 2,
            vectors,
            fingerprints,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        store.persist(&sample("all-minilm")).unwrap();
        let loaded = store.load("all-minilm", 2);

        assert_eq!(loaded.vectors["abc"], vec![0.6, 0.8]);
        assert_eq!(loaded.fingerprints["cli:s1"], "fp1");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let loaded = store.load("all-minilm", 384);
        assert!(loaded.vectors.is_empty());
        assert!(loaded.fingerprints.is_empty());
    }

    #[test]
    fn test_model_mismatch_discards() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.persist(&sample("all-minilm")).unwrap();

        let loaded = store.load("mxbai-embed-large", 2);
        assert!(loaded.vectors.is_empty());
        assert_eq!(loaded.model, "mxbai-embed-large");
    }

    #[test]
    fn test_dimension_mismatch_discards() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.persist(&sample("all-minilm")).unwrap();

        let loaded = store.load("all-minilm", 384);
        assert!(loaded.vectors.is_empty());
    }

    #[test]
    fn test_corrupt_file_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        fs::write(store.path(), b"definitely not postcard").unwrap();

        let loaded = store.load("all-minilm", 2);
        assert!(loaded.vectors.is_empty());
    }

    #[test]
    fn test_persist_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        store.persist(&sample("all-minilm")).unwrap();

        let mut next = sample("all-minilm");
        next.vectors.insert("def".to_string(), vec![1.0, 0.0]);
        store.persist(&next).unwrap();

        let loaded = store.load("all-minilm", 2);
        assert_eq!(loaded.vectors.len(), 2);
        // No stray temp file left behind
        assert!(!dir.path().join("index.bin.tmp").exists());
    }
}
