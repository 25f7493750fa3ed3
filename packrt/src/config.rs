//! Re-exports the shared runtime configuration.
//!
//! Kept as its own module, rather than importing `packrt_common::Config`
//! directly everywhere, so callers of this crate have one stable path to
//! depend on regardless of how the shared crate reorganizes internally.

pub use packrt_common::Config;
