//! The asynchronous-read substrate shared by every resource consumer:
//! `FileReadScheduler` and the `FileHandle` layer built on top
//! of it.

pub mod handle;
pub mod scheduler;

pub use handle::{FileHandle, Whence};
pub use scheduler::{FileReadScheduler, Outcome, PollStatus, ReadSource, RequestId};
