//! Directory-backed cache store.
//!
//! Each bucket lives in its own `<url-encoded name>.json` file. Every
//! mutation is written through, via a temporary file and a rename, so a
//! crash never leaves a half-written bucket behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::store::{Cache, CacheEntry, CacheStorage, CacheStore, StoreError};

const BUCKET_EXTENSION: &str = "json";

/// Cache store persisted under a directory.
#[derive(Debug)]
pub struct DiskCacheStore {
    root: PathBuf,
    memory: CacheStorage,
}

impl DiskCacheStore {
    /// Open (creating if needed) the store rooted at `root` and load every bucket.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut memory = CacheStorage::new();
        for dir_entry in fs::read_dir(&root)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BUCKET_EXTENSION) {
                continue;
            }
            let cache = read_bucket(&path)?;
            debug!(bucket = %cache.name, entries = cache.len(), "Loaded bucket");
            memory.insert(cache);
        }

        Ok(Self { root, memory })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", urlencoding::encode(name), BUCKET_EXTENSION))
    }

    fn persist(&self, name: &str) -> Result<(), StoreError> {
        let Some(cache) = self.memory.get(name) else {
            return Ok(());
        };
        let path = self.bucket_path(name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(cache)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn read_bucket(path: &Path) -> Result<Cache, StoreError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

impl CacheStore for DiskCacheStore {
    fn has(&self, name: &str) -> bool {
        self.memory.has(name)
    }

    fn keys(&self) -> Vec<String> {
        self.memory.keys()
    }

    fn match_request(&self, name: &str, url: &str) -> Option<CacheEntry> {
        self.memory.match_request(name, url)
    }

    fn entry_count(&self, name: &str) -> Option<usize> {
        self.memory.entry_count(name)
    }

    fn open(&mut self, name: &str) -> Result<(), StoreError> {
        if self.memory.has(name) {
            return Ok(());
        }
        self.memory.open(name)?;
        self.persist(name)
    }

    fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), StoreError> {
        self.memory.put(name, entry)?;
        self.persist(name)
    }

    fn replace(&mut self, name: &str, entries: Vec<CacheEntry>) -> Result<(), StoreError> {
        self.memory.replace(name, entries)?;
        self.persist(name)
    }

    /// The file goes first, so a failed removal leaves the bucket in place.
    fn delete(&mut self, name: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.bucket_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.memory.has(name) {
                    warn!(bucket = name, "Bucket file already missing");
                }
            }
            Err(e) => return Err(e.into()),
        }
        self.memory.delete(name)
    }
}
