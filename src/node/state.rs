//! Node-instance state: the downloader killswitch and the "have we
//! completed our first registration" flag. Both live here as instance
//! state behind atomics, owned by the node root and shared via `Arc` with
//! whichever components need to read or (for the killswitch) write them.
//! Tests construct their own instance instead of racing a process-wide
//! global.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct NodeState {
    killswitch: AtomicBool,
    registered: AtomicBool,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engages the killswitch. Only the garbage collector calls this.
    pub fn engage_killswitch(&self) {
        self.killswitch.store(true, Ordering::SeqCst);
    }

    /// Releases the killswitch. Only the garbage collector calls this.
    pub fn release_killswitch(&self) {
        self.killswitch.store(false, Ordering::SeqCst);
    }

    pub fn is_killswitch_engaged(&self) -> bool {
        self.killswitch.load(Ordering::SeqCst)
    }

    pub fn mark_registered(&self) {
        self.registered.store(true, Ordering::SeqCst);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}
