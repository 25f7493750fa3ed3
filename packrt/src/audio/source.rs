//! Uniform decoder source abstraction (`MemBuf` or `File`) plus a
//! ~16 KiB read-ahead ring with a half-buffer compact/refill rule.
//!
//! Async prefetch off disk is already how `ResourceManager` gets bytes;
//! once a decoder backend owns a source it only needs blocking
//! `Read + Seek` (symphonia's
//! `MediaSource` bound, and `hound`-style WAV scanning besides), so the
//! ring here does synchronous on-demand reads through the same
//! `ReadSource` trait the scheduler uses rather than duplicating its
//! async machinery.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::ioq::ReadSource;

const RING_CAPACITY: usize = 16 * 1024;

/// Either an in-memory buffer or a byte range within a file/archive.
pub enum Source {
    MemBuf(Vec<u8>),
    File {
        source: Arc<dyn ReadSource>,
        base_offset: u64,
        len: u64,
    },
}

impl Source {
    pub fn len(&self) -> u64 {
        match self {
            Source::MemBuf(v) => v.len() as u64,
            Source::File { len, .. } => *len,
        }
    }

    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::MemBuf(v) => {
                if pos >= v.len() as u64 {
                    return Ok(0);
                }
                let start = pos as usize;
                let n = buf.len().min(v.len() - start);
                buf[..n].copy_from_slice(&v[start..start + n]);
                Ok(n)
            }
            Source::File { source, base_offset, len } => {
                let remaining = len.saturating_sub(pos);
                let want = (buf.len() as u64).min(remaining) as usize;
                if want == 0 {
                    return Ok(0);
                }
                source.read_at(base_offset + pos, &mut buf[..want])
            }
        }
    }
}

/// A `Read + Seek` view over a `Source` with a small read-ahead ring:
/// reads past the cached window top up the cache, and once the cursor
/// crosses the window's midpoint, the ring compacts (drops the consumed
/// half) and refills from the source.
pub struct ReadAhead {
    source: Source,
    pos: u64,
    window_start: u64,
    ring: Vec<u8>,
}

impl ReadAhead {
    pub fn new(source: Source) -> Self {
        ReadAhead {
            source,
            pos: 0,
            window_start: 0,
            ring: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.source.len()
    }

    fn ensure_filled(&mut self, want_end: u64) -> io::Result<()> {
        let window_end = self.window_start + self.ring.len() as u64;
        if want_end <= window_end {
            return Ok(());
        }
        let to_read = (want_end - window_end).max(RING_CAPACITY as u64 / 2) as usize;
        let mut chunk = vec![0u8; to_read];
        let n = self.source.read_at(window_end, &mut chunk)?;
        chunk.truncate(n);
        self.ring.extend_from_slice(&chunk);
        Ok(())
    }

    fn compact_if_past_midpoint(&mut self) {
        if self.ring.is_empty() {
            return;
        }
        let consumed = self.pos.saturating_sub(self.window_start) as usize;
        if consumed * 2 >= self.ring.len() && consumed > 0 {
            self.ring.drain(0..consumed.min(self.ring.len()));
            self.window_start += consumed as u64;
        }
    }
}

impl Read for ReadAhead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_filled(self.pos + buf.len() as u64)?;
        let offset_in_ring = self.pos.saturating_sub(self.window_start) as usize;
        if offset_in_ring >= self.ring.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.ring.len() - offset_in_ring);
        buf[..n].copy_from_slice(&self.ring[offset_in_ring..offset_in_ring + n]);
        self.pos += n as u64;
        self.compact_if_past_midpoint();
        Ok(n)
    }
}

impl Seek for ReadAhead {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.source.len() as i64 + d,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.pos = new_pos as u64;
        // A seek outside the cached window invalidates it outright rather
        // than trying to patch the ring up.
        if self.pos < self.window_start || self.pos > self.window_start + self.ring.len() as u64 {
            self.ring.clear();
            self.window_start = self.pos;
        }
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_sequential_bytes_from_membuf() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut ra = ReadAhead::new(Source::MemBuf(data.clone()));
        let mut buf = [0u8; 10];
        ra.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[0..10]);
    }

    #[test]
    fn seek_then_read_returns_correct_bytes() {
        let data: Vec<u8> = (0..200u8).collect();
        let mut ra = ReadAhead::new(Source::MemBuf(data.clone()));
        ra.seek(SeekFrom::Start(150)).unwrap();
        let mut buf = [0u8; 10];
        ra.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[150..160]);
    }

    #[test]
    fn compacts_past_midpoint_without_losing_data() {
        let data: Vec<u8> = (0..(RING_CAPACITY as u32 * 4) as u32)
            .map(|i| (i % 251) as u8)
            .collect();
        let mut ra = ReadAhead::new(Source::MemBuf(data.clone()));
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = ra.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, data);
    }
}
