//! Local error type for the `packrt` binary/library boundary.
//!
//! Mirrors `packrt_common::Error`'s failure kinds one-to-one so
//! this crate's public API never leaks the shared crate's type directly,
//! while still converting freely in both directions.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of memory in {pool} pool")]
    OutOfMemory { pool: &'static str },
    #[error("too many {0}")]
    TooMany(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad format: {0}")]
    BadFormat(String),
    #[error("canceled")]
    Canceled,
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<packrt_common::Error> for Error {
    fn from(e: packrt_common::Error) -> Self {
        match e {
            packrt_common::Error::InvalidArgument(s) => Error::InvalidArgument(s),
            packrt_common::Error::OutOfMemory { pool } => Error::OutOfMemory { pool },
            packrt_common::Error::TooMany(what) => Error::TooMany(what),
            packrt_common::Error::Io(e) => Error::Io(e),
            packrt_common::Error::NotFound(s) => Error::NotFound(s),
            packrt_common::Error::BadFormat(s) => Error::BadFormat(s),
            packrt_common::Error::Canceled => Error::Canceled,
            packrt_common::Error::Config(s) => Error::Config(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_from_common_error() {
        let common = packrt_common::Error::NotFound("x".into());
        let local: Error = common.into();
        assert!(matches!(local, Error::NotFound(s) if s == "x"));
    }
}
