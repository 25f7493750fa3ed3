//! The `PackageModule` capability trait and the PKG archive backend that
//! implements it. A console resource layer would express this capability
//! set as a function-pointer vtable (`init`/`cleanup`/`list_start`/
//! `list_next`/`has_path`/`file_info`/`decompress`); here it's a trait
//! object instead.

use std::io::Read;
use std::sync::{Arc, Mutex};

use flate2::read::DeflateDecoder;
use packrt_common::error::Error;
use packrt_common::Result;

use crate::ioq::ReadSource;

use super::format::{self, Header, IndexEntry};

/// Everything a consumer needs to open a seekable view onto a packaged (or
/// raw-filesystem) file.
#[derive(Clone)]
pub struct FileInfo {
    pub source: Arc<dyn ReadSource>,
    pub offset: u64,
    pub stored_len: u32,
    pub original_len: u32,
    pub deflated: bool,
}

/// Capability record every package backend implements. `init`/`cleanup`
/// from the C vtable become the constructor and `Drop`; everything else
/// maps directly. `has_path` defaults to "yes, managed by this module" so
/// a miss is a real miss rather than a filesystem-fallback signal.
pub trait PackageModule: Send + Sync {
    /// Path prefix this module claims. The manager picks the first
    /// registered module whose prefix is a prefix of the requested path.
    fn prefix(&self) -> &str;

    /// Whether a miss inside this module should still fall back to the raw
    /// filesystem (`false`) or is a hard `NotFound` (`true`, the default).
    fn has_path(&self, _path: &str) -> bool {
        true
    }

    fn list_start(&self);
    fn list_next(&self) -> Option<String>;
    fn file_info(&self, path: &str) -> Result<FileInfo>;
    fn decompress(&self, input: &[u8], out: &mut [u8]) -> Result<usize>;
}

struct ParsedArchive {
    entries: Vec<IndexEntry>,
    names: Vec<u8>,
}

impl ParsedArchive {
    fn name_of(&self, entry: &IndexEntry) -> &str {
        let start = entry.name_offset as usize;
        let end = self.names[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(self.names.len());
        std::str::from_utf8(&self.names[start..end]).unwrap_or("")
    }

    /// Binary search first on hash, then ASCII case-insensitive name,
    /// returning the earliest (lowest index) entry among exact ties.
    fn find(&self, path: &str) -> Option<usize> {
        let target_hash = format::hash_name(path);
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entries[mid].hash < target_hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        // `lo` is the first entry with hash >= target_hash.
        let mut idx = lo;
        let mut found = None;
        while idx < self.entries.len() && self.entries[idx].hash == target_hash {
            if format::ci_cmp(self.name_of(&self.entries[idx]), path) == std::cmp::Ordering::Equal {
                found = Some(idx);
                break;
            }
            idx += 1;
        }
        found
    }
}

/// A parsed PKG archive, opened once and consulted for every lookup under
/// its `prefix`.
pub struct PkgArchive {
    prefix: String,
    archive: Arc<std::fs::File>,
    parsed: ParsedArchive,
    list_cursor: Mutex<usize>,
}

impl PkgArchive {
    pub fn open(prefix: impl Into<String>, path: impl AsRef<std::path::Path>) -> Result<Self> {
        let mut file = std::fs::File::open(path.as_ref()).map_err(Error::Io)?;
        let mut header_buf = [0u8; Header::ENCODED_LEN];
        file.read_exact(&mut header_buf).map_err(Error::Io)?;
        let header = Header::decode(&header_buf)
            .ok_or_else(|| Error::BadFormat("truncated PKG header".into()))?;
        if &header.magic != format::MAGIC {
            return Err(Error::BadFormat("bad PKG magic".into()));
        }
        if header.header_size != format::HEADER_SIZE {
            return Err(Error::BadFormat("unexpected PKG header size".into()));
        }

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut entry_buf = vec![0u8; header.entry_size as usize];
        for _ in 0..header.entry_count {
            file.read_exact(&mut entry_buf).map_err(Error::Io)?;
            let entry = IndexEntry::decode(&entry_buf)
                .ok_or_else(|| Error::BadFormat("truncated PKG index entry".into()))?;
            entries.push(entry);
        }

        let mut names = vec![0u8; header.name_table_size as usize];
        file.read_exact(&mut names).map_err(Error::Io)?;

        Ok(PkgArchive {
            prefix: prefix.into(),
            archive: Arc::new(file),
            parsed: ParsedArchive { entries, names },
            list_cursor: Mutex::new(0),
        })
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(&self.prefix).unwrap_or(path)
    }
}

impl PackageModule for PkgArchive {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn list_start(&self) {
        *self.list_cursor.lock().unwrap() = 0;
    }

    fn list_next(&self) -> Option<String> {
        let mut cursor = self.list_cursor.lock().unwrap();
        if *cursor >= self.parsed.entries.len() {
            return None;
        }
        let name = self.parsed.name_of(&self.parsed.entries[*cursor]).to_string();
        *cursor += 1;
        Some(name)
    }

    fn file_info(&self, path: &str) -> Result<FileInfo> {
        let key = self.strip_prefix(path);
        let idx = self
            .parsed
            .find(key)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let entry = &self.parsed.entries[idx];
        Ok(FileInfo {
            source: Arc::clone(&self.archive) as Arc<dyn ReadSource>,
            offset: entry.offset as u64,
            stored_len: entry.stored_len,
            original_len: entry.original_len,
            deflated: entry.deflated,
        })
    }

    fn decompress(&self, input: &[u8], out: &mut [u8]) -> Result<usize> {
        let mut decoder = DeflateDecoder::new(input);
        let mut produced = 0usize;
        // Read into `out` directly; succeeds iff 0 < produced <= out.len().
        loop {
            if produced == out.len() {
                break;
            }
            match decoder.read(&mut out[produced..]) {
                Ok(0) => break,
                Ok(n) => produced += n,
                Err(e) => return Err(Error::BadFormat(format!("inflate failed: {e}"))),
            }
        }
        if produced == 0 {
            return Err(Error::BadFormat("inflate produced no data".into()));
        }
        Ok(produced)
    }
}

/// Filesystem-backed fallback: a "module" whose prefix is empty (matches
/// everything) and which never manages anything — `has_path` always
/// returns `false` so the manager falls through to the raw filesystem.
/// Mirrors the per-archive override the source uses to let a `"_mods/"`
/// subtree bypass its own package in favor of loose files.
pub struct FsFallthrough {
    prefix: String,
}

impl FsFallthrough {
    pub fn new(prefix: impl Into<String>) -> Self {
        FsFallthrough { prefix: prefix.into() }
    }
}

impl PackageModule for FsFallthrough {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn has_path(&self, _path: &str) -> bool {
        false
    }

    fn list_start(&self) {}
    fn list_next(&self) -> Option<String> {
        None
    }
    fn file_info(&self, path: &str) -> Result<FileInfo> {
        Err(Error::NotFound(path.to_string()))
    }
    fn decompress(&self, _input: &[u8], _out: &mut [u8]) -> Result<usize> {
        Err(Error::invalid_argument("FsFallthrough never stores compressed data"))
    }
}
