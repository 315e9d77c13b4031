//! P2P caching tier in front of an HTTP origin.
//!
//! Two roles share this crate: the [`scheduler`] tracks which [`node`] holds
//! which item and how loaded it is, and each node runs the request pipeline
//! (proxy, downloader, garbage collector, notifier) that actually serves
//! bytes from local disk or a peer instead of the origin.

pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod node;
pub mod scheduler;

pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
