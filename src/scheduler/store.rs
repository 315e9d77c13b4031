//! Storage backend for the node registry and item index.
//!
//! Exposed only through narrow traits (`NodeStore`, `ItemStore`) so a
//! replicated or remote-KV backend could be substituted later without
//! touching [`super::Scheduler`] or the HTTP layer. The only backend shipped
//! is [`InMemoryStore`]; cross-restart persistence is out of scope, so
//! anything more elaborate stays hypothetical.

use std::collections::HashMap;

use crate::scheduler::registry::NodeRecord;
use crate::Fingerprint;

/// Read/write access to the node registry.
pub trait NodeStore {
    fn write_node(&mut self, node: NodeRecord);
    fn read_node(&self, name: &str) -> Option<&NodeRecord>;
    fn read_node_mut(&mut self, name: &str) -> Option<&mut NodeRecord>;
}

/// Read/write access to the fingerprint -> node -> hit-count index.
pub trait ItemStore {
    fn add_item_node(&mut self, fp: &Fingerprint, node: &str);
    fn remove_item_node(&mut self, fp: &Fingerprint, node: &str);
    fn read_item(&self, fp: &Fingerprint) -> Vec<&str>;
}

/// In-process, mutex-free (caller serializes access) map-backed store.
#[derive(Default)]
pub struct InMemoryStore {
    nodes: HashMap<String, NodeRecord>,
    index: HashMap<Fingerprint, HashMap<String, u32>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for InMemoryStore {
    fn write_node(&mut self, node: NodeRecord) {
        self.nodes.insert(node.name.clone(), node);
    }

    fn read_node(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    fn read_node_mut(&mut self, name: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(name)
    }
}

impl ItemStore for InMemoryStore {
    fn add_item_node(&mut self, fp: &Fingerprint, node: &str) {
        let entry = self.index.entry(fp.clone()).or_insert_with(HashMap::new);
        *entry.entry(node.to_owned()).or_insert(0) += 1;
    }

    fn remove_item_node(&mut self, fp: &Fingerprint, node: &str) {
        let empty_item = if let Some(holders) = self.index.get_mut(fp) {
            if let Some(count) = holders.get_mut(node) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    holders.remove(node);
                }
            }
            holders.is_empty()
        } else {
            false
        };
        if empty_item {
            self.index.remove(fp);
        }
    }

    fn read_item(&self, fp: &Fingerprint) -> Vec<&str> {
        self.index
            .get(fp)
            .map(|holders| holders.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_leaves_no_trace() {
        let mut store = InMemoryStore::new();
        let fp = Fingerprint::compute("http://o/x", "v1");

        store.add_item_node(&fp, "n1");
        store.remove_item_node(&fp, "n1");

        assert!(store.read_item(&fp).is_empty());
        assert!(!store.index.contains_key(&fp));
    }

    #[test]
    fn add_increments_existing_counter() {
        let mut store = InMemoryStore::new();
        let fp = Fingerprint::compute("http://o/x", "v1");

        store.add_item_node(&fp, "n1");
        store.add_item_node(&fp, "n1");

        assert_eq!(store.index.get(&fp).unwrap()["n1"], 2);
    }

    #[test]
    fn remove_on_absent_entry_is_a_no_op() {
        let mut store = InMemoryStore::new();
        let fp = Fingerprint::compute("http://o/x", "v1");
        store.remove_item_node(&fp, "n1");
        assert!(store.read_item(&fp).is_empty());
    }
}
