//! Cache buckets and the store that owns them.

use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a [`CacheStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt bucket file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    pub(crate) fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// One bucket: every entry cached for a single generation tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache {
    pub name: String,
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Build a bucket holding exactly `entries`.
    pub fn with_entries(name: &str, entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let mut cache = Self::new(name);
        for entry in entries {
            cache.put(entry);
        }
        cache
    }

    /// Match a request URL.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Insert or overwrite the entry for its URL.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// Cached URLs, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Store ====================

/// Key-value store of buckets keyed by generation tag.
///
/// The offline cache owns one of these behind a lock; nothing reaches a store
/// through global state.
pub trait CacheStore: Send + Sync {
    /// Check if a bucket exists.
    fn has(&self, name: &str) -> bool;

    /// All bucket names, sorted.
    fn keys(&self) -> Vec<String>;

    /// Look up `url` in bucket `name`.
    fn match_request(&self, name: &str, url: &str) -> Option<CacheEntry>;

    /// Number of entries in a bucket, `None` if it does not exist.
    fn entry_count(&self, name: &str) -> Option<usize>;

    /// Create the bucket if absent.
    fn open(&mut self, name: &str) -> Result<(), StoreError>;

    /// Store one entry, creating the bucket if absent.
    fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), StoreError>;

    /// Swap in a fully populated bucket in one step.
    fn replace(&mut self, name: &str, entries: Vec<CacheEntry>) -> Result<(), StoreError>;

    /// Delete a bucket. Returns whether it existed.
    fn delete(&mut self, name: &str) -> Result<bool, StoreError>;
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    pub(crate) fn insert(&mut self, cache: Cache) {
        self.caches.insert(cache.name.clone(), cache);
    }

    pub(crate) fn open_mut(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }
}

impl CacheStore for CacheStorage {
    fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn match_request(&self, name: &str, url: &str) -> Option<CacheEntry> {
        self.caches.get(name)?.match_request(url).cloned()
    }

    fn entry_count(&self, name: &str) -> Option<usize> {
        self.caches.get(name).map(Cache::len)
    }

    fn open(&mut self, name: &str) -> Result<(), StoreError> {
        self.open_mut(name);
        Ok(())
    }

    fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), StoreError> {
        self.open_mut(name).put(entry);
        Ok(())
    }

    fn replace(&mut self, name: &str, entries: Vec<CacheEntry>) -> Result<(), StoreError> {
        self.insert(Cache::with_entries(name, entries));
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<bool, StoreError> {
        Ok(self.caches.remove(name).is_some())
    }
}

#[cfg(test)]
pub(crate) fn entry(url: &str, body: &str) -> CacheEntry {
    CacheEntry {
        url: url.to_string(),
        method: "GET".to_string(),
        status: 200,
        headers: HashMap::new(),
        body: body.as_bytes().to_vec(),
        cached_at: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_match_and_delete() {
        let mut cache = Cache::new("whisky-goggles-v1");
        cache.put(entry("https://goggles.test/static/css/output.css", "body{}"));

        assert!(cache
            .match_request("https://goggles.test/static/css/output.css")
            .is_some());
        assert!(cache.match_request("https://goggles.test/other.css").is_none());

        assert!(cache.delete("https://goggles.test/static/css/output.css"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_keys_sorted() {
        let cache = Cache::with_entries(
            "v1",
            vec![
                entry("https://goggles.test/b.js", ""),
                entry("https://goggles.test/a.js", ""),
            ],
        );
        assert_eq!(
            cache.keys(),
            vec!["https://goggles.test/a.js", "https://goggles.test/b.js"]
        );
    }

    #[test]
    fn test_storage_open_and_delete() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1").unwrap();
        assert!(storage.has("v1"));
        assert_eq!(storage.entry_count("v1"), Some(0));

        assert!(storage.delete("v1").unwrap());
        assert!(!storage.delete("v1").unwrap());
        assert_eq!(storage.entry_count("v1"), None);
    }

    #[test]
    fn test_replace_drops_previous_entries() {
        let mut storage = CacheStorage::new();
        storage.put("v1", entry("https://goggles.test/old.js", "")).unwrap();
        storage
            .replace("v1", vec![entry("https://goggles.test/new.js", "")])
            .unwrap();

        assert!(storage.match_request("v1", "https://goggles.test/old.js").is_none());
        assert!(storage.match_request("v1", "https://goggles.test/new.js").is_some());
    }

    #[test]
    fn test_match_is_scoped_to_bucket() {
        let mut storage = CacheStorage::new();
        storage.put("v1", entry("https://goggles.test/", "v1")).unwrap();
        storage.open("v2").unwrap();

        assert!(storage.match_request("v2", "https://goggles.test/").is_none());
        assert_eq!(storage.keys(), vec!["v1".to_string(), "v2".to_string()]);
    }

    #[test]
    fn test_entry_body_serializes_as_base64() {
        let json = serde_json::to_value(entry("https://goggles.test/", "hi")).unwrap();
        assert_eq!(json["body"], "aGk=");

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.body, b"hi");
    }
}
