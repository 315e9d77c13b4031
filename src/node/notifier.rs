//! Filesystem-change pub/sub over the node's data directory.
//!
//! Built on the `notify` crate rather than binding `inotify` directly, one
//! level removed from the raw kernel API. `run` terminates on an
//! unrecoverable watcher error; `dry_run` stops after a single event for
//! tests.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Error};
use notify::{watcher, DebouncedEvent, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};

/// The two event kinds the scheduler client acts on; everything else is
/// forwarded for observation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Removed,
    Other,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub item: String,
    pub kind: EventKind,
}

fn basename(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn map_event(event: DebouncedEvent) -> Option<Event> {
    match event {
        DebouncedEvent::Create(path) => Some(Event {
            item: basename(&path),
            kind: EventKind::Created,
        }),
        DebouncedEvent::Remove(path) => Some(Event {
            item: basename(&path),
            kind: EventKind::Removed,
        }),
        DebouncedEvent::Write(path) | DebouncedEvent::Rename(path, _) => Some(Event {
            item: basename(&path),
            kind: EventKind::Other,
        }),
        DebouncedEvent::Error(err, path) => {
            log::warn!("notifier watch error on {:?}: {}", path, err);
            None
        }
        _ => None,
    }
}

pub struct Notifier {
    data_dir: PathBuf,
    subscribers: Mutex<Vec<mpsc::Sender<Event>>>,
}

impl Notifier {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Notifier {
            data_dir: data_dir.into(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a consumer. Multiple subscribers are allowed; delivery is
    /// best-effort non-blocking.
    pub async fn subscribe(&self, capacity: usize) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers.lock().await.push(tx);
        rx
    }

    async fn broadcast(&self, event: Event) {
        let subscribers = self.subscribers.lock().await;
        for sub in subscribers.iter() {
            if sub.try_send(event.clone()).is_err() {
                log::warn!("notifier: dropping event for a full/closed subscriber channel");
            }
        }
    }

    /// Starts watching `data_dir`. When `dry_run` is set, returns after
    /// delivering (or failing to deliver) a single event, for tests.
    pub async fn run(&self, dry_run: bool) -> Result<(), Error> {
        let data_dir = self.data_dir.clone();
        let (bridge_tx, mut bridge_rx) = mpsc::unbounded_channel::<DebouncedEvent>();

        let watch_task = tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let (tx, rx) = std::sync::mpsc::channel();
            let mut watcher =
                watcher(tx, Duration::from_millis(200)).context("creating filesystem watcher")?;
            watcher
                .watch(&data_dir, RecursiveMode::NonRecursive)
                .context("watching data directory")?;

            loop {
                match rx.recv() {
                    Ok(event) => {
                        if bridge_tx.send(event).is_err() {
                            return Ok(());
                        }
                    }
                    Err(_) => return Ok(()),
                }
                if dry_run {
                    return Ok(());
                }
            }
        });

        loop {
            match bridge_rx.recv().await {
                Some(raw_event) => {
                    if let Some(event) = map_event(raw_event) {
                        log::info!("{:?} event received for {}", event.kind, event.item);
                        self.broadcast(event).await;
                    }
                }
                None => break,
            }
            if dry_run {
                break;
            }
        }

        watch_task
            .await
            .context("notifier watch task panicked")??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_registers_a_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new(dir.path());
        let _rx = notifier.subscribe(10).await;
        assert_eq!(notifier.subscribers.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn create_event_reaches_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new(dir.path());
        let mut rx = notifier.subscribe(10).await;

        let file_path = dir.path().join("abc123");
        let watch_dir = dir.path().to_path_buf();
        let writer = tokio::task::spawn_blocking(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::fs::write(&file_path, b"data").unwrap();
            let _ = watch_dir;
        });

        notifier.run(true).await.unwrap();
        writer.await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within 1s")
            .expect("channel open");
        assert_eq!(event.item, "abc123");
    }
}
