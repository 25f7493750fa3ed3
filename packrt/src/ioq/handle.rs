//! Per-file handle layer over the scheduler.
//!
//! Each handle owns a mutex that serializes field mutation and the virtual
//! seek position; the scheduler itself does absolute offset reads so
//! concurrent outstanding async requests on one handle never race on a
//! shared kernel cursor.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use packrt_common::error::Error;
use packrt_common::Result;

use super::scheduler::{FileReadScheduler, Outcome, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    file: Option<Arc<std::fs::File>>,
    size: u64,
    position: u64,
}

/// A single open file. `read_sync`/`read_async` submit through the shared
/// `FileReadScheduler`; the handle mutex only protects `position` and the
/// (possibly-`None`-during-suspend) kernel fd.
#[derive(Debug)]
pub struct FileHandle {
    inner: Mutex<Inner>,
}

impl FileHandle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let size = file.metadata().map_err(Error::Io)?.len();
        Ok(FileHandle {
            inner: Mutex::new(Inner {
                path,
                file: Some(Arc::new(file)),
                size,
                position: 0,
            }),
        })
    }

    /// Duplicate this handle: a fresh `FileHandle` sharing the same path and
    /// size but an independent virtual position.
    pub fn dup(&self) -> Result<Self> {
        let inner = self.inner.lock().unwrap();
        Self::open(&inner.path)
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    pub fn seek(&self, pos: i64, whence: Whence) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let base = match whence {
            Whence::Start => 0i64,
            Whence::Current => inner.position as i64,
            Whence::End => inner.size as i64,
        };
        let new_pos = base
            .checked_add(pos)
            .filter(|p| *p >= 0)
            .ok_or_else(|| Error::invalid_argument("seek out of range"))?;
        inner.position = new_pos as u64;
        Ok(inner.position)
    }

    /// Synchronous read: submits an immediate request through the
    /// scheduler and waits.
    pub fn read_sync(&self, scheduler: &FileReadScheduler, buf: &mut [u8]) -> Result<usize> {
        let (source, start) = {
            let inner = self.inner.lock().unwrap();
            let file = inner
                .file
                .clone()
                .ok_or_else(|| Error::invalid_argument("handle paused"))?;
            (file, inner.position)
        };
        let id = scheduler
            .submit(source, start, buf.len(), false, None)
            .ok_or(Error::TooMany("read requests"))?;
        let outcome = scheduler
            .wait(id)
            .map_err(|e| Error::invalid_argument(e))?;
        match outcome {
            Outcome::Done { buffer, bytes_read } => {
                buf[..bytes_read].copy_from_slice(&buffer[..bytes_read]);
                let mut inner = self.inner.lock().unwrap();
                inner.position += bytes_read as u64;
                Ok(bytes_read)
            }
            Outcome::Canceled => Err(Error::Canceled),
            Outcome::Io(msg) => Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, msg))),
        }
    }

    /// Submit an async read at an explicit absolute position (does not
    /// touch the virtual cursor — callers advance it themselves once the
    /// request completes, same as `FileReadScheduler::submit`).
    pub fn read_async(
        &self,
        scheduler: &FileReadScheduler,
        len: usize,
        pos: u64,
        timed: bool,
        time_limit_micros: Option<i64>,
    ) -> Result<RequestId> {
        let source = {
            let inner = self.inner.lock().unwrap();
            inner
                .file
                .clone()
                .ok_or_else(|| Error::invalid_argument("handle paused"))?
        };
        scheduler
            .submit(source, pos, len, timed, time_limit_micros)
            .ok_or(Error::TooMany("read requests"))
    }

    /// Drain an in-flight async wait and close the kernel fd while keeping
    /// the virtual position, for system suspend.
    pub fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.file = None;
    }

    /// Reopen by path and continue from the same virtual position.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let file = std::fs::File::open(&inner.path).map_err(Error::Io)?;
        inner.size = file.metadata().map_err(Error::Io)?.len();
        inner.file = Some(Arc::new(file));
        Ok(())
    }

    pub fn close(self) {}
}
