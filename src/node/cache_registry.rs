//! In-memory access-time and file-size bookkeeping shared by the proxy
//! handler, the downloader, and the garbage collector.
//!
//! Reconstructed from scratch on restart — there is no sidecar metadata on
//! disk. Serving code and the downloader write
//! entries; the GC only deletes them, on eviction.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    atime: HashMap<String, SystemTime>,
    size: HashMap<String, u64>,
    insertion_order: Vec<String>,
}

/// Tracks, per fingerprint, the last-served time and file size.
#[derive(Default)]
pub struct CacheRegistry {
    inner: Mutex<Inner>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by serving code on a hit and by the downloader on a completed
    /// fetch. Re-touching an existing fingerprint does not change its
    /// position in insertion order.
    pub async fn touch(&self, fingerprint: &str, size: u64) {
        let mut inner = self.inner.lock().await;
        if !inner.size.contains_key(fingerprint) {
            inner.insertion_order.push(fingerprint.to_owned());
        }
        inner.atime.insert(fingerprint.to_owned(), SystemTime::now());
        inner.size.insert(fingerprint.to_owned(), size);
    }

    pub async fn known(&self, fingerprint: &str) -> bool {
        self.inner.lock().await.size.contains_key(fingerprint)
    }

    /// Registers a file found directly on disk (a warm cache on restart)
    /// with its real mtime/atime rather than the current instant.
    pub async fn adopt(&self, fingerprint: &str, atime: SystemTime, size: u64) {
        let mut inner = self.inner.lock().await;
        if !inner.size.contains_key(fingerprint) {
            inner.insertion_order.push(fingerprint.to_owned());
        }
        inner.atime.insert(fingerprint.to_owned(), atime);
        inner.size.insert(fingerprint.to_owned(), size);
    }

    pub async fn forget(&self, fingerprint: &str) {
        let mut inner = self.inner.lock().await;
        inner.atime.remove(fingerprint);
        inner.size.remove(fingerprint);
        inner.insertion_order.retain(|f| f != fingerprint);
    }

    pub async fn total_size(&self) -> u64 {
        self.inner.lock().await.size.values().sum()
    }

    /// Fingerprints with a recorded access-time older than `max_age`,
    /// relative to now. Files with no recorded atime are skipped.
    pub async fn stale(&self, max_age: Duration) -> Vec<String> {
        let inner = self.inner.lock().await;
        let now = SystemTime::now();
        inner
            .atime
            .iter()
            .filter(|(_, atime)| now.duration_since(**atime).unwrap_or_default() > max_age)
            .map(|(fp, _)| fp.clone())
            .collect()
    }

    /// Fingerprints in insertion order, oldest first, for size eviction.
    pub async fn by_insertion_order(&self) -> Vec<String> {
        self.inner.lock().await.insertion_order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_then_forget_clears_all_bookkeeping() {
        let registry = CacheRegistry::new();
        registry.touch("fp1", 100).await;
        assert_eq!(registry.total_size().await, 100);
        registry.forget("fp1").await;
        assert_eq!(registry.total_size().await, 0);
        assert_eq!(registry.by_insertion_order().await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn retouching_does_not_duplicate_insertion_order() {
        let registry = CacheRegistry::new();
        registry.touch("fp1", 100).await;
        registry.touch("fp1", 150).await;
        assert_eq!(registry.by_insertion_order().await, vec!["fp1".to_owned()]);
        assert_eq!(registry.total_size().await, 150);
    }

    #[tokio::test]
    async fn stale_skips_files_with_no_recorded_atime() {
        let registry = CacheRegistry::new();
        assert!(registry.stale(Duration::from_secs(0)).await.is_empty());
        registry.touch("fp1", 10).await;
        let stale = registry.stale(Duration::from_secs(0)).await;
        assert_eq!(stale, vec!["fp1".to_owned()]);
    }

    #[tokio::test]
    async fn adopt_seeds_atime_from_the_given_instant_not_now() {
        let registry = CacheRegistry::new();
        let old = SystemTime::now() - Duration::from_secs(3600);
        registry.adopt("fp1", old, 42).await;

        assert!(registry.known("fp1").await);
        assert_eq!(registry.total_size().await, 42);
        assert_eq!(registry.stale(Duration::from_secs(1)).await, vec!["fp1".to_owned()]);
    }

    #[tokio::test]
    async fn insertion_order_preserves_arrival_sequence() {
        let registry = CacheRegistry::new();
        registry.touch("fp1", 10).await;
        registry.touch("fp2", 20).await;
        assert_eq!(
            registry.by_insertion_order().await,
            vec!["fp1".to_owned(), "fp2".to_owned()]
        );
    }
}
