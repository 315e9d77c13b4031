//! Typed errors for the scheduler's core operations.
//!
//! Everything else in the crate (the node-side proxy, downloader, GC,
//! notifier) propagates failures as [`anyhow::Error`], matching the
//! surrounding ecosystem convention; this module exists for the one seam
//! where a caller needs to branch on *kind* of failure rather than just log
//! and move on: mapping scheduler operations to HTTP status codes.

use thiserror::Error;

/// Scheduler-level result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`crate::scheduler`] operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("node '{0}' is not registered")]
    NodeNotFound(String),

    #[error("no peer available")]
    NoPeerAvailable,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status code this error should be reported as.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NodeNotFound(_) => 500,
            Error::NoPeerAvailable => 404,
            Error::Internal(_) => 500,
        }
    }
}
