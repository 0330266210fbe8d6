//! LRU + TTL metadata cache.
//!
//! Caches per-session metadata and the full index under a separate slot.
//! Expired entries are evicted on access and counted as misses; inserting
//! at capacity evicts the least-recently-used entry.

use crate::types::SessionIndex;
use crate::types::SessionMetadata;
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use uuid::Uuid;

/// Flat bookkeeping cost added to every entry's JSON-derived estimate.
const ENTRY_OVERHEAD_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub hit_rate: f64,
    pub estimated_bytes: usize,
}

struct CachedEntry<T> {
    value: T,
    inserted: Instant,
    approx_bytes: usize,
}

impl<T: Serialize> CachedEntry<T> {
    fn new(value: T) -> Self {
        let approx_bytes = serde_json::to_string(&value)
            .map(|s| s.len() * 2)
            .unwrap_or(0)
            + ENTRY_OVERHEAD_BYTES;
        Self {
            value,
            inserted: Instant::now(),
            approx_bytes,
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() > ttl
    }
}

struct CacheInner {
    entries: LruCache<Uuid, CachedEntry<SessionMetadata>>,
    index: Option<CachedEntry<SessionIndex>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

pub struct MetadataCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl MetadataCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                index: None,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<SessionMetadata> {
        let mut inner = self.lock();
        let expired = inner
            .entries
            .get(&id)
            .is_some_and(|entry| entry.expired(self.config.ttl));
        if expired {
            inner.entries.pop(&id);
            inner.evictions += 1;
            inner.misses += 1;
            return None;
        }
        let value = inner.entries.get(&id).map(|entry| entry.value.clone());
        match value {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, metadata: SessionMetadata) {
        let id = metadata.id;
        let mut inner = self.lock();
        if let Some((evicted_key, _)) = inner.entries.push(id, CachedEntry::new(metadata))
            && evicted_key != id
        {
            inner.evictions += 1;
        }
    }

    pub fn invalidate(&self, id: Uuid) {
        self.lock().entries.pop(&id);
    }

    pub fn get_index(&self) -> Option<SessionIndex> {
        let mut inner = self.lock();
        let expired = inner
            .index
            .as_ref()
            .is_some_and(|entry| entry.expired(self.config.ttl));
        if expired {
            inner.index = None;
            inner.evictions += 1;
            inner.misses += 1;
            return None;
        }
        let value = inner.index.as_ref().map(|entry| entry.value.clone());
        match value {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put_index(&self, index: SessionIndex) {
        self.lock().index = Some(CachedEntry::new(index));
    }

    pub fn invalidate_index(&self) {
        self.lock().index = None;
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.index = None;
    }

    /// Drop expired entries; returns how many were removed.
    pub fn maintenance(&self) -> usize {
        let mut inner = self.lock();
        let expired: Vec<Uuid> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expired(self.config.ttl))
            .map(|(id, _)| *id)
            .collect();
        let mut removed = expired.len();
        for id in expired {
            inner.entries.pop(&id);
        }
        if inner
            .index
            .as_ref()
            .is_some_and(|entry| entry.expired(self.config.ttl))
        {
            inner.index = None;
            removed += 1;
        }
        inner.evictions += removed as u64;
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        let estimated_bytes = inner
            .entries
            .iter()
            .map(|(_, entry)| entry.approx_bytes)
            .sum::<usize>()
            + inner.index.as_ref().map_or(0, |entry| entry.approx_bytes);
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            estimated_bytes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned lock only means another thread panicked mid-update;
        // the cache is advisory, so keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CURRENT_SCHEMA_VERSION;
    use crate::types::TokenCount;
    use chrono::Utc;
    use std::path::PathBuf;

    fn metadata(id: Uuid) -> SessionMetadata {
        let now = Utc::now();
        SessionMetadata {
            id,
            created: now,
            last_modified: now,
            model: "gpt-4o".into(),
            message_count: 0,
            token_count: TokenCount::default(),
            workspace_root: PathBuf::from("/w"),
            context_files: Vec::new(),
            tags: Vec::new(),
            title: None,
            preview: None,
            last_message: None,
        }
    }

    fn index_with(version: &str) -> SessionIndex {
        SessionIndex {
            version: version.to_string(),
            last_updated: Utc::now(),
            sessions: Default::default(),
        }
    }

    #[test]
    fn hit_and_miss_counting() {
        let cache = MetadataCache::new(CacheConfig::default());
        let id = Uuid::new_v4();
        assert!(cache.get(id).is_none());
        cache.insert(metadata(id));
        assert!(cache.get(id).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert!(stats.estimated_bytes > ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn expired_entry_counts_as_miss_and_eviction() {
        let cache = MetadataCache::new(CacheConfig {
            ttl: Duration::from_millis(0),
            max_entries: 10,
        });
        let id = Uuid::new_v4();
        cache.insert(metadata(id));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(id).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn capacity_eviction_is_lru() {
        let cache = MetadataCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            max_entries: 2,
        });
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        cache.insert(metadata(a));
        cache.insert(metadata(b));
        assert!(cache.get(a).is_some()); // a is now most recent
        cache.insert(metadata(c)); // evicts b

        assert!(cache.get(b).is_none());
        assert!(cache.get(a).is_some());
        assert!(cache.get(c).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn index_slot_roundtrips() {
        let cache = MetadataCache::new(CacheConfig::default());
        assert!(cache.get_index().is_none());
        cache.put_index(index_with(CURRENT_SCHEMA_VERSION));
        assert_eq!(cache.get_index().unwrap().version, CURRENT_SCHEMA_VERSION);
        cache.invalidate_index();
        assert!(cache.get_index().is_none());
    }

    #[test]
    fn maintenance_drops_expired() {
        let cache = MetadataCache::new(CacheConfig {
            ttl: Duration::from_millis(0),
            max_entries: 10,
        });
        cache.insert(metadata(Uuid::new_v4()));
        cache.insert(metadata(Uuid::new_v4()));
        cache.put_index(index_with("1.0.0"));
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(cache.maintenance(), 3);
        assert_eq!(cache.stats().entries, 0);
    }
}
