//! Response cache shared by concurrent enrichment workers.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EnrichmentEntry, EnrichmentStatus};
use crate::error::{CollateError, Result};
use crate::normalize::NormalizedKey;

/// Lookup results by key.
///
/// Reads are concurrent. Writes are at most once per key: when two workers
/// resolve the same key, the first insert is kept and the second is
/// discarded. Replacing an entry takes an explicit [`evict`] first.
///
/// [`evict`]: EnrichmentCache::evict
#[derive(Debug, Default)]
pub struct EnrichmentCache {
    entries: RwLock<HashMap<NormalizedKey, EnrichmentEntry>>,
}

/// On-disk layout of a saved cache.
#[derive(Serialize, Deserialize)]
struct CacheFile {
    saved_at: DateTime<Utc>,
    entries: Vec<EnrichmentEntry>,
}

impl EnrichmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &NormalizedKey) -> Option<EnrichmentEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert `entry` unless its key is already cached.
    ///
    /// Returns the entry that is cached afterwards, together with whether it
    /// was this call that wrote it.
    pub fn insert(&self, entry: EnrichmentEntry) -> (EnrichmentEntry, bool) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&entry.key) {
            Some(existing) => {
                tracing::debug!(key = %entry.key, "Discarding duplicate cache write");
                (existing.clone(), false)
            }
            None => {
                entries.insert(entry.key.clone(), entry.clone());
                (entry, true)
            }
        }
    }

    /// Remove a key so the next lookup goes to the catalog again.
    pub fn evict(&self, key: &NormalizedKey) -> Option<EnrichmentEntry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Drop every entry, for a cold start.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached entries with `status`.
    pub fn count(&self, status: EnrichmentStatus) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.status == status)
            .count()
    }

    /// Save the cache to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    CollateError::Persistence(format!(
                        "Failed to create directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let mut entries: Vec<EnrichmentEntry> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let file = File::create(path).map_err(|e| {
            CollateError::Persistence(format!(
                "Failed to create file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let contents = CacheFile {
            saved_at: Utc::now(),
            entries,
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &contents).map_err(|e| {
            CollateError::Persistence(format!("Failed to serialize enrichment cache: {}", e))
        })?;

        tracing::debug!(path = %path.display(), entries = contents.entries.len(), "Saved enrichment cache");
        Ok(())
    }

    /// Load a cache saved with [`EnrichmentCache::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|e| {
            CollateError::Persistence(format!(
                "Failed to open file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let contents: CacheFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            CollateError::Persistence(format!(
                "Failed to parse enrichment cache '{}': {}",
                path.display(),
                e
            ))
        })?;

        let entries = contents
            .entries
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::Metadata;
    use crate::normalize::KeyNamespace;
    use tempfile::tempdir;

    fn key(v: &str) -> NormalizedKey {
        NormalizedKey::new(KeyNamespace::Issn, v)
    }

    #[test]
    fn test_first_write_wins() {
        let cache = EnrichmentCache::new();
        let mut first_meta = Metadata::new();
        first_meta.insert("title".into(), "First".into());

        let (_, wrote) = cache.insert(EnrichmentEntry::success(key("00280836"), first_meta));
        assert!(wrote);
        let (kept, wrote) = cache.insert(EnrichmentEntry::not_found(key("00280836")));
        assert!(!wrote);
        assert_eq!(kept.status, EnrichmentStatus::Success);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evict_allows_replacement() {
        let cache = EnrichmentCache::new();
        cache.insert(EnrichmentEntry::failed(key("00280836"), "timeout"));
        cache.evict(&key("00280836"));
        let (_, wrote) = cache.insert(EnrichmentEntry::not_found(key("00280836")));
        assert!(wrote);
        assert_eq!(cache.count(EnrichmentStatus::NotFound), 1);
        assert_eq!(cache.count(EnrichmentStatus::Failed), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let cache = EnrichmentCache::new();
        cache.insert(EnrichmentEntry::not_found(key("00280836")));
        cache.insert(EnrichmentEntry::failed(key("1050124X"), "HTTP 500"));
        cache.save(&path).unwrap();

        let loaded = EnrichmentCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let failed = loaded.get(&key("1050124X")).unwrap();
        assert_eq!(failed.status, EnrichmentStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = EnrichmentCache::load("/definitely/not/here.json");
        assert!(matches!(result, Err(CollateError::Persistence(_))));
    }
}
