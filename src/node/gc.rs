//! Age- and size-based eviction over the data directory.
//!
//! Owns the killswitch exclusively: nothing else ever engages or releases
//! it. Age eviction drops anything past its TTL; size eviction only
//! engages the killswitch (stalling the downloader, not user traffic) while
//! it walks the insertion-ordered file list back under the cap.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use std::sync::Arc;

use crate::node::{CacheRegistry, NodeState};

pub struct GarbageCollector {
    data_dir: PathBuf,
    max_atime_age: Duration,
    max_disk_usage: u64,
    registry: Arc<CacheRegistry>,
    state: Arc<NodeState>,
}

impl GarbageCollector {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        max_atime_age: Duration,
        max_disk_usage: u64,
        registry: Arc<CacheRegistry>,
        state: Arc<NodeState>,
    ) -> Self {
        GarbageCollector {
            data_dir: data_dir.into(),
            max_atime_age,
            max_disk_usage,
            registry,
            state,
        }
    }

    /// Runs one sweep: reconcile against the data directory, then age
    /// eviction, then size eviction.
    pub async fn sweep(&self) {
        self.reconcile_with_disk().await;
        self.evict_stale().await;
        self.evict_oversized().await;
    }

    /// Enumerates the data directory (skipping `.tmp/`) and adopts any file
    /// the registry doesn't already know about, using the file's own mtime
    /// as its atime. Without this, a node restarting with a warm disk would
    /// report zero usage until every pre-existing file happened to be
    /// re-served, letting it blow past the size cap unnoticed.
    async fn reconcile_with_disk(&self) {
        let data_dir = self.data_dir.clone();
        let found = tokio::task::spawn_blocking(move || -> Vec<(String, SystemTime, u64)> {
            let mut found = Vec::new();
            for entry in walkdir::WalkDir::new(&data_dir)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.path() == data_dir || !entry.file_type().is_file() {
                    continue;
                }
                let meta = match entry.metadata() {
                    Ok(meta) => meta,
                    Err(_) => continue,
                };
                let atime = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or_else(|_| SystemTime::now());
                found.push((entry.file_name().to_string_lossy().into_owned(), atime, meta.len()));
            }
            found
        })
        .await
        .unwrap_or_default();

        for (fingerprint, atime, size) in found {
            if !self.registry.known(&fingerprint).await {
                log::info!("gc: adopted untracked file {} found on disk", fingerprint);
                self.registry.adopt(&fingerprint, atime, size).await;
            }
        }
    }

    async fn evict_stale(&self) {
        for fingerprint in self.registry.stale(self.max_atime_age).await {
            let path = self.data_dir.join(&fingerprint);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    self.registry.forget(&fingerprint).await;
                    log::info!("gc: evicted {} (past atime ttl)", fingerprint);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    self.registry.forget(&fingerprint).await;
                }
                Err(err) => log::warn!("gc: failed to remove {}: {}", fingerprint, err),
            }
        }
    }

    async fn evict_oversized(&self) {
        if self.registry.total_size().await <= self.max_disk_usage {
            return;
        }

        self.state.engage_killswitch();
        for fingerprint in self.registry.by_insertion_order().await {
            if self.registry.total_size().await <= self.max_disk_usage {
                break;
            }
            let path = self.data_dir.join(&fingerprint);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    self.registry.forget(&fingerprint).await;
                    log::info!("gc: evicted {} (over disk cap)", fingerprint);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    self.registry.forget(&fingerprint).await;
                }
                Err(err) => log::warn!("gc: failed to remove {}: {}", fingerprint, err),
            }
        }
        self.state.release_killswitch();
    }

    /// Runs sweeps on a fixed interval. `dry_run` performs one sweep and
    /// returns, for tests.
    pub async fn run(&self, interval: Duration, dry_run: bool) {
        loop {
            self.sweep().await;
            if dry_run {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_file(dir: &std::path::Path, name: &str, contents: &[u8]) {
        tokio::fs::write(dir.join(name), contents).await.unwrap();
    }

    #[tokio::test]
    async fn stale_file_is_removed_and_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "fp1", b"data").await;

        let registry = Arc::new(CacheRegistry::new());
        registry.touch("fp1", 4).await;

        let gc = GarbageCollector::new(
            dir.path(),
            Duration::from_secs(0),
            u64::MAX,
            registry.clone(),
            Arc::new(NodeState::new()),
        );
        gc.sweep().await;

        assert!(!dir.path().join("fp1").exists());
        assert_eq!(registry.total_size().await, 0);
    }

    #[tokio::test]
    async fn fresh_file_under_ttl_survives() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "fp1", b"data").await;

        let registry = Arc::new(CacheRegistry::new());
        registry.touch("fp1", 4).await;

        let gc = GarbageCollector::new(
            dir.path(),
            Duration::from_secs(3600),
            u64::MAX,
            registry.clone(),
            Arc::new(NodeState::new()),
        );
        gc.sweep().await;

        assert!(dir.path().join("fp1").exists());
    }

    #[tokio::test]
    async fn oversized_dir_evicts_oldest_first_and_clears_killswitch() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "fp1", &[0u8; 5]).await;
        write_file(dir.path(), "fp2", &[0u8; 5]).await;

        let registry = Arc::new(CacheRegistry::new());
        registry.touch("fp1", 5).await;
        registry.touch("fp2", 5).await;

        let state = Arc::new(NodeState::new());
        let gc = GarbageCollector::new(dir.path(), Duration::from_secs(3600), 6, registry.clone(), state.clone());
        gc.sweep().await;

        assert!(!dir.path().join("fp1").exists());
        assert!(dir.path().join("fp2").exists());
        assert!(!state.is_killswitch_engaged());
    }

    #[tokio::test]
    async fn warm_disk_file_is_adopted_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "fp1", &[0u8; 5]).await;

        let registry = Arc::new(CacheRegistry::new());
        assert!(!registry.known("fp1").await);

        let gc = GarbageCollector::new(
            dir.path(),
            Duration::from_secs(3600),
            u64::MAX,
            registry.clone(),
            Arc::new(NodeState::new()),
        );
        gc.sweep().await;

        assert!(registry.known("fp1").await);
        assert_eq!(registry.total_size().await, 5);
        assert!(dir.path().join("fp1").exists());
    }

    #[tokio::test]
    async fn tmp_directory_contents_are_never_adopted() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join(".tmp")).await.unwrap();
        write_file(&dir.path().join(".tmp"), "partial", b"xx").await;

        let registry = Arc::new(CacheRegistry::new());
        let gc = GarbageCollector::new(
            dir.path(),
            Duration::from_secs(3600),
            u64::MAX,
            registry.clone(),
            Arc::new(NodeState::new()),
        );
        gc.sweep().await;

        assert!(!registry.known("partial").await);
        assert_eq!(registry.total_size().await, 0);
    }

    #[tokio::test]
    async fn under_cap_never_touches_killswitch() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "fp1", &[0u8; 5]).await;

        let registry = Arc::new(CacheRegistry::new());
        registry.touch("fp1", 5).await;

        let state = Arc::new(NodeState::new());
        let gc = GarbageCollector::new(dir.path(), Duration::from_secs(3600), 100, registry, state.clone());
        gc.sweep().await;

        assert!(!state.is_killswitch_engaged());
    }
}
