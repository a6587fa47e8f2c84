//! Pending digests awaiting a detached checksum file.
//!
//! When an artifact body is written its computed digests are parked here
//! under the artifact's key. A later upload of `<artifact>.<alg>` takes the
//! entry out and compares. Entries that never see a checksum file expire
//! after the configured TTL.

use crate::metrics::CHECKSUM_CACHE_EVICTIONS;
use dashmap::DashMap;
use depot_core::{DigestAlgorithm, DigestMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    checksums: DigestMap,
    inserted_at: Instant,
}

/// Concurrent checksum cache with per-key locking.
#[derive(Debug)]
pub struct ChecksumCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ChecksumCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }

    /// Record one digest for `base_path`, keeping the other algorithms.
    pub fn put(&self, base_path: &str, algorithm: DigestAlgorithm, digest: impl Into<String>) {
        let now = Instant::now();
        let digest = digest.into();
        self.entries
            .entry(base_path.to_string())
            .and_modify(|entry| {
                if now.saturating_duration_since(entry.inserted_at) >= self.ttl {
                    entry.checksums.clear();
                }
                entry.checksums.insert(algorithm, digest.clone());
                entry.inserted_at = now;
            })
            .or_insert_with(|| CacheEntry {
                checksums: DigestMap::from([(algorithm, digest)]),
                inserted_at: now,
            });
    }

    /// Replace the digests for `base_path` with a freshly computed set.
    pub fn put_all(&self, base_path: &str, checksums: DigestMap) {
        if checksums.is_empty() {
            return;
        }
        self.entries.insert(
            base_path.to_string(),
            CacheEntry {
                checksums,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Digests for `base_path`, if present and not expired.
    pub fn get(&self, base_path: &str) -> Option<DigestMap> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(base_path)
            && !self.is_expired(&entry, now)
        {
            return Some(entry.checksums.clone());
        }

        // Expired or absent; drop it if it is still the expired one.
        if self
            .entries
            .remove_if(base_path, |_, entry| self.is_expired(entry, now))
            .is_some()
        {
            CHECKSUM_CACHE_EVICTIONS.inc();
        }
        None
    }

    /// Take the entry for `base_path` out of the cache.
    ///
    /// The whole entry goes, whichever algorithm the checksum file carried:
    /// a base path is reconciled at most once. `algorithm` is the one the
    /// checksum file carried and only labels the log. Returns the removed
    /// digests unless the entry was absent or already expired.
    pub fn remove(&self, base_path: &str, algorithm: DigestAlgorithm) -> Option<DigestMap> {
        let (_, entry) = self.entries.remove(base_path)?;
        if self.is_expired(&entry, Instant::now()) {
            tracing::debug!(
                path = %base_path,
                algorithm = %algorithm,
                "Discarded expired checksum cache entry"
            );
            CHECKSUM_CACHE_EVICTIONS.inc();
            return None;
        }
        Some(entry.checksums)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            CHECKSUM_CACHE_EVICTIONS.inc_by(evicted as u64);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn a background task that evicts expired entries every `interval`.
    ///
    /// `interval` must be non-zero.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let evicted = self.evict_expired();
                if evicted > 0 {
                    tracing::info!(
                        evicted = evicted,
                        remaining = self.len(),
                        "Checksum cache sweep evicted stale entries"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_put_get_remove() {
        let cache = ChecksumCache::new(HOUR);
        cache.put("a/b.jar", DigestAlgorithm::Md5, "m");
        cache.put("a/b.jar", DigestAlgorithm::Sha1, "s");

        let digests = cache.get("a/b.jar").unwrap();
        assert_eq!(digests.len(), 2);
        assert_eq!(digests[&DigestAlgorithm::Md5], "m");

        let removed = cache.remove("a/b.jar", DigestAlgorithm::Md5).unwrap();
        assert_eq!(removed[&DigestAlgorithm::Sha1], "s");

        // Removed as a whole, even though only the md5 was reconciled.
        assert!(cache.get("a/b.jar").is_none());
        assert!(cache.remove("a/b.jar", DigestAlgorithm::Sha1).is_none());
    }

    #[test]
    fn test_put_all_replaces_previous_digests() {
        let cache = ChecksumCache::new(HOUR);
        cache.put("p", DigestAlgorithm::Md5, "old");
        cache.put("p", DigestAlgorithm::Sha256, "old256");
        cache.put_all("p", DigestMap::from([(DigestAlgorithm::Md5, "new".to_string())]));

        let digests = cache.get("p").unwrap();
        assert_eq!(digests.len(), 1);
        assert_eq!(digests[&DigestAlgorithm::Md5], "new");

        cache.put_all("q", DigestMap::new());
        assert!(cache.get("q").is_none());
    }

    #[test]
    fn test_expired_entries_are_invisible() {
        let cache = ChecksumCache::new(Duration::ZERO);
        cache.put("p", DigestAlgorithm::Md5, "m");
        assert_eq!(cache.len(), 1);

        assert!(cache.get("p").is_none());
        assert!(cache.is_empty());

        cache.put("q", DigestAlgorithm::Md5, "m");
        assert!(cache.remove("q", DigestAlgorithm::Md5).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_expired_keeps_live_entries() {
        let expired = ChecksumCache::new(Duration::ZERO);
        expired.put("a", DigestAlgorithm::Md5, "1");
        expired.put("b", DigestAlgorithm::Md5, "2");
        assert_eq!(expired.evict_expired(), 2);
        assert!(expired.is_empty());

        let live = ChecksumCache::new(HOUR);
        live.put("a", DigestAlgorithm::Md5, "1");
        assert_eq!(live.evict_expired(), 0);
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_concurrent_puts_to_same_key_are_not_lost() {
        let cache = Arc::new(ChecksumCache::new(HOUR));
        let handles: Vec<_> = DigestAlgorithm::ALL
            .into_iter()
            .map(|alg| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.put("shared", alg, alg.extension()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.get("shared").unwrap().len(), DigestAlgorithm::ALL.len());
    }

    #[tokio::test]
    async fn test_sweeper_evicts() {
        let cache = Arc::new(ChecksumCache::new(Duration::ZERO));
        cache.put("a", DigestAlgorithm::Md5, "1");

        let handle = cache.clone().spawn_sweeper(Duration::from_millis(10));
        for _ in 0..100 {
            if cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(cache.is_empty());
    }
}
