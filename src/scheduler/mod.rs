//! The coordinator: node registry, item index, and peer selection.
//!
//! `Scheduler` is the single logical critical section — all
//! mutations of the registry and the index are serialized through one
//! [`tokio::sync::Mutex`]-guarded [`store::InMemoryStore`]. HTTP handlers
//! stay short and never hold the lock across network I/O.

mod api;
mod registry;
mod selector;
mod store;

pub use api::{run, SchedulerEnvelope};
#[cfg(test)]
pub(crate) use api::spawn_test_server;
pub use registry::NodeRecord;
pub use selector::select_peer;
pub use store::{InMemoryStore, ItemStore, NodeStore};

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::Fingerprint;

/// Coordinator state: a node registry, an item index, and the capacity rule
/// the selector enforces, all behind one mutex.
pub struct Scheduler {
    store: Mutex<InMemoryStore>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            store: Mutex::new(InMemoryStore::new()),
        }
    }

    pub fn with_store(store: InMemoryStore) -> Self {
        Scheduler {
            store: Mutex::new(store),
        }
    }

    /// Inserts or overwrites a node record by name. Idempotent: re-registration
    /// resets `connections` to 0.
    pub async fn register_node(&self, mut node: NodeRecord) -> Result<()> {
        node.validate()?;
        node.connections = 0;
        let mut store = self.store.lock().await;
        store.write_node(node);
        Ok(())
    }

    pub async fn get_node(&self, name: &str) -> Result<NodeRecord> {
        let store = self.store.lock().await;
        store
            .read_node(name)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(name.to_owned()))
    }

    pub async fn add_connection(&self, name: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let node = store
            .read_node_mut(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_owned()))?;
        node.connections += 1;
        Ok(())
    }

    pub async fn remove_connection(&self, name: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        let node = store
            .read_node_mut(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_owned()))?;
        node.connections = node.connections.saturating_sub(1);
        Ok(())
    }

    pub async fn set_connections(&self, name: &str, n: u32) -> Result<()> {
        let mut store = self.store.lock().await;
        let node = store
            .read_node_mut(name)
            .ok_or_else(|| Error::NodeNotFound(name.to_owned()))?;
        node.connections = n;
        Ok(())
    }

    /// Add: creates the entry if absent with counter 1, else increments.
    pub async fn add_item_node(&self, fp: &Fingerprint, name: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        store.add_item_node(fp, name);
        Ok(())
    }

    /// Remove: decrements; the pair is deleted at 0, the item entry is
    /// deleted once empty.
    pub async fn remove_item_node(&self, fp: &Fingerprint, name: &str) -> Result<()> {
        let mut store = self.store.lock().await;
        store.remove_item_node(fp, name);
        Ok(())
    }

    /// Runs the selector over the current index/registry snapshot.
    pub async fn select_peer(&self, fp: &Fingerprint) -> Result<NodeRecord> {
        let store = self.store.lock().await;
        let holders = store.read_item(fp);
        let candidate = selector::select_peer(holders, |name| store.read_node(name));
        candidate.cloned().ok_or(Error::NoPeerAvailable)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedScheduler = Arc<Scheduler>;
