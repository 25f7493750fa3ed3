//! Shared error kinds for the resource/IO/audio substrate.
//!
//! Every subsystem crate (`packrt`) maps its own error enum onto these
//! kinds at the boundary so callers distinguishing "what class of failure
//! was this" do not need to know which module produced it.

use thiserror::Error;

/// Common result type for substrate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared across the allocator, scheduler, package loader,
/// resource manager and audio pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller contract breach (bad argument, invalid handle, etc). Logged,
    /// returns a failure sentinel, no state changes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failed in the named pool.
    #[error("out of memory in {pool} pool")]
    OutOfMemory { pool: &'static str },

    /// A bounded capacity table (requests, handles) is full.
    #[error("too many {0}")]
    TooMany(&'static str),

    /// Underlying read/seek/open failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No matching package entry and no raw filesystem fallback.
    #[error("not found: {0}")]
    NotFound(String),

    /// Header or stream mismatch (archive or audio format).
    #[error("bad format: {0}")]
    BadFormat(String),

    /// Cooperative cancellation took effect.
    #[error("canceled")]
    Canceled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
