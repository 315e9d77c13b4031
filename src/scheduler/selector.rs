//! Peer-selection policy.
//!
//! Among the nodes the index lists for a fingerprint: filter to those with
//! spare capacity, pick the least-loaded, break ties lexicographically by
//! name, and short-circuit on the first zero-connection node found. Nodes
//! present in the index whose registry entry has vanished (a race with
//! deregistration, which never actually happens today, but the index is a
//! claim rather than a proof) are skipped silently.

use crate::scheduler::registry::NodeRecord;

pub fn select_peer<'a>(
    mut holders: Vec<&str>,
    lookup: impl Fn(&str) -> Option<&'a NodeRecord>,
) -> Option<&'a NodeRecord> {
    // Sort first so that "first node observed with connections == 0" and
    // tie-breaking by name are both deterministic regardless of the
    // index's internal (hash map) iteration order.
    holders.sort_unstable();

    let mut best: Option<&'a NodeRecord> = None;
    for name in holders {
        let node = match lookup(name) {
            Some(node) => node,
            None => continue,
        };
        if !node.has_capacity() {
            continue;
        }
        if node.connections == 0 {
            return Some(node);
        }
        best = match best {
            Some(current) if current.connections <= node.connections => Some(current),
            _ => Some(node),
        };
    }
    best
}
