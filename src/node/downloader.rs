//! Bounded work queue + single worker that fetches items into the local
//! data directory.
//!
//! The queue is a `tokio::sync::mpsc` bounded channel. Killswitch
//! engagement never needs to recover an in-flight item because the worker
//! checks the switch *before* popping, never mid-transfer.
//!
//! A `HashSet` of fingerprints currently in flight implements the
//! single-flight guard: a `push` for a fingerprint already queued
//! or downloading is a silent no-op instead of enqueuing a duplicate fetch.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use hyper::client::HttpConnector;
use hyper::header::HeaderMap;
use hyper::{Client, Request};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use crate::node::state::NodeState;
use crate::Fingerprint;

/// Headers that must never be copied onto a prefetch request: connection
/// scoped headers, and `User-Agent` is suppressed outright.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "user-agent",
    "host",
];

#[derive(Debug, Clone)]
pub struct DownloadItem {
    pub fingerprint: Fingerprint,
    pub url: String,
    pub headers: HeaderMap,
    pub target_path: PathBuf,
}

impl DownloadItem {
    /// Builds a download descriptor from an inbound request's headers,
    /// stripping connection-scoped headers and the `User-Agent`.
    pub fn new(
        fingerprint: Fingerprint,
        url: String,
        source_headers: &HeaderMap,
        target_path: PathBuf,
    ) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in source_headers.iter() {
            if STRIPPED_HEADERS.contains(&name.as_str().to_ascii_lowercase().as_str()) {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }
        DownloadItem {
            fingerprint,
            url,
            headers,
            target_path,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    QueueFull,
    AlreadyInFlight,
}

pub struct Downloader {
    tx: mpsc::Sender<DownloadItem>,
    rx: Mutex<mpsc::Receiver<DownloadItem>>,
    inflight: Mutex<HashSet<Fingerprint>>,
    state: Arc<NodeState>,
    client: Client<HttpConnector>,
    tmp_dir: PathBuf,
}

impl Downloader {
    /// `capacity` is the bounded-queue size (≈100).
    pub fn new(capacity: usize, tmp_dir: PathBuf, state: Arc<NodeState>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Downloader {
            tx,
            rx: Mutex::new(rx),
            inflight: Mutex::new(HashSet::new()),
            state,
            client: Client::new(),
            tmp_dir,
        }
    }

    /// Non-blocking enqueue. Queue-full is a normal, recoverable signal
    /// not an error.
    pub async fn push(&self, item: DownloadItem) -> PushOutcome {
        {
            let mut inflight = self.inflight.lock().await;
            if inflight.contains(&item.fingerprint) {
                return PushOutcome::AlreadyInFlight;
            }
            inflight.insert(item.fingerprint.clone());
        }

        match self.tx.try_send(item) {
            Ok(()) => PushOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(item)) => {
                self.inflight.lock().await.remove(&item.fingerprint);
                PushOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(item)) => {
                self.inflight.lock().await.remove(&item.fingerprint);
                PushOutcome::QueueFull
            }
        }
    }

    /// Runs the worker loop. `dry_run` exits after a single pass, for tests.
    pub async fn run(&self, dry_run: bool) {
        loop {
            if self.state.is_killswitch_engaged() {
                tokio::time::sleep(Duration::from_millis(200)).await;
                if dry_run {
                    return;
                }
                continue;
            }

            let item = {
                let mut rx = self.rx.lock().await;
                if dry_run {
                    match rx.try_recv() {
                        Ok(item) => Some(item),
                        Err(_) => None,
                    }
                } else {
                    rx.recv().await
                }
            };

            let item = match item {
                Some(item) => item,
                None => {
                    if dry_run {
                        return;
                    }
                    continue;
                }
            };

            let fp = item.fingerprint.clone();
            if let Err(err) = self.download_one(item).await {
                log::warn!("download of {} failed: {}", fp, err);
            }
            self.inflight.lock().await.remove(&fp);

            if dry_run {
                return;
            }
        }
    }

    async fn download_one(&self, item: DownloadItem) -> Result<(), Error> {
        let mut builder = Request::builder().method("GET").uri(&item.url);
        for (name, value) in item.headers.iter() {
            builder = builder.header(name, value);
        }
        let req = builder
            .body(hyper::Body::empty())
            .context("building download request")?;

        let resp = self.client.request(req).await.context("download request")?;
        if !resp.status().is_success() {
            anyhow::bail!("unexpected status {}", resp.status());
        }

        let expected_len = resp
            .headers()
            .get(hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        tokio::fs::create_dir_all(&self.tmp_dir).await.ok();
        let tmp_path = self.tmp_dir.join(item.fingerprint.as_str());

        let mut written: u64 = 0;
        {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .context("creating temp file")?;
            let mut body = resp.into_body();
            use hyper::body::HttpBody;
            while let Some(chunk) = body.data().await {
                let chunk = chunk.context("reading download body")?;
                written += chunk.len() as u64;
                file.write_all(&chunk).await.context("writing temp file")?;
            }
            file.flush().await.ok();
        }

        if let Some(expected) = expected_len {
            if expected != written {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                anyhow::bail!(
                    "size mismatch for {}: expected {} got {}",
                    item.fingerprint,
                    expected,
                    written
                );
            }
        }

        tokio::fs::rename(&tmp_path, &item.target_path)
            .await
            .context("renaming temp file into place")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<NodeState> {
        Arc::new(NodeState::new())
    }

    fn item(fp: &str, target: PathBuf) -> DownloadItem {
        DownloadItem {
            fingerprint: Fingerprint::from(fp),
            url: "http://127.0.0.1:1/does-not-matter".to_owned(),
            headers: HeaderMap::new(),
            target_path: target,
        }
    }

    #[tokio::test]
    async fn push_then_pop_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(10, dir.path().join("tmp"), state());

        let outcome = downloader.push(item("fp1", dir.path().join("fp1"))).await;
        assert_eq!(outcome, PushOutcome::Queued);

        let mut rx = downloader.rx.lock().await;
        let popped = rx.try_recv().unwrap();
        assert_eq!(popped.fingerprint, Fingerprint::from("fp1"));
    }

    #[tokio::test]
    async fn pop_on_empty_queue_is_non_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(10, dir.path().join("tmp"), state());
        let mut rx = downloader.rx.lock().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn push_on_full_queue_reports_queue_full() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(1, dir.path().join("tmp"), state());

        assert_eq!(
            downloader.push(item("fp1", dir.path().join("fp1"))).await,
            PushOutcome::Queued
        );
        assert_eq!(
            downloader.push(item("fp2", dir.path().join("fp2"))).await,
            PushOutcome::QueueFull
        );
    }

    #[tokio::test]
    async fn duplicate_fingerprint_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(10, dir.path().join("tmp"), state());

        assert_eq!(
            downloader.push(item("fp1", dir.path().join("fp1"))).await,
            PushOutcome::Queued
        );
        assert_eq!(
            downloader.push(item("fp1", dir.path().join("fp1"))).await,
            PushOutcome::AlreadyInFlight
        );
    }

    #[tokio::test]
    async fn run_dry_run_exits_after_killswitch_check() {
        let dir = tempfile::tempdir().unwrap();
        let st = state();
        st.engage_killswitch();
        let downloader = Downloader::new(10, dir.path().join("tmp"), st);
        // Should return promptly instead of looping forever.
        downloader.run(true).await;
    }
}
