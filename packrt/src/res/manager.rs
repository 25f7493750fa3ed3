//! `ResourceManager`: async-load orchestration, mark/sync barriers,
//! alias/link rings, and allocation-order teardown.
//!
//! Resources live in a dense slot array addressed by index rather than
//! raw pointer, so unlike a C array that has to relocate on growth and
//! fix up every live link-ring pointer afterward, `Vec::resize` here
//! never invalidates an index.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use flate2::read::DeflateDecoder;
use packrt_common::error::Error;
use packrt_common::Result;
use tracing::warn;

use crate::alloc::{Allocator, Flags};
use crate::ioq::{FileReadScheduler, Outcome, PollStatus, ReadSource};
use crate::pkg::Registry;

use super::types::{wrapping_lt, PendingLoad, ResourceInfo, ResourceType, SlotState};

const DEFAULT_SLOT_HINT: usize = 100;
const SLOT_GROWTH: usize = 64;
/// Bound on link-ring walks; a ring that doesn't close within this many
/// hops is treated as corrupt.
const LINK_WALK_BOUND: usize = 4096;

struct Enumeration {
    remaining: VecDeque<String>,
}

/// Owns a dense slot array of resources plus the plumbing to load them
/// asynchronously through a `FileReadScheduler` and finalize them on
/// `sync`/`wait`.
pub struct ResourceManager {
    allocator: Arc<Allocator>,
    scheduler: Arc<FileReadScheduler>,
    registry: Arc<Registry>,
    slots: Mutex<Vec<ResourceInfo>>,
    next_alloc_order: Mutex<u32>,
    next_mark: Mutex<u32>,
    enumeration: Mutex<Option<Enumeration>>,
    /// `(align, flags)` the caller asked for, keyed by slot, consulted once
    /// at finalize time when the final allocation is actually made.
    pending_flags: Mutex<HashMap<usize, (usize, Flags)>>,
}

impl ResourceManager {
    pub fn new(allocator: Arc<Allocator>, scheduler: Arc<FileReadScheduler>, registry: Arc<Registry>) -> Self {
        Self::with_capacity_hint(allocator, scheduler, registry, DEFAULT_SLOT_HINT)
    }

    pub fn with_capacity_hint(
        allocator: Arc<Allocator>,
        scheduler: Arc<FileReadScheduler>,
        registry: Arc<Registry>,
        hint: usize,
    ) -> Self {
        let hint = if hint == 0 { DEFAULT_SLOT_HINT } else { hint };
        ResourceManager {
            allocator,
            scheduler,
            registry,
            slots: Mutex::new((0..hint).map(|_| ResourceInfo::unused()).collect()),
            // Seeded at i32::MIN so the wrap-safe comparison used by
            // `free_all` behaves correctly from the very first allocation.
            next_alloc_order: Mutex::new(i32::MIN as u32),
            next_mark: Mutex::new(1),
            enumeration: Mutex::new(None),
            pending_flags: Mutex::new(HashMap::new()),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.registry.find(path).is_ok() || Path::new(path).exists()
    }

    pub fn list_files_start(&self, prefix: &str) -> Result<()> {
        let mut enumeration = self.enumeration.lock().unwrap();
        if enumeration.is_some() {
            return Err(Error::invalid_argument("an enumeration is already active"));
        }
        // Best-effort: filesystem enumeration is out of scope for packaged
        // listings, so only package-backed names are surfaced here.
        let names = self.registry.list_names_with_prefix(prefix);
        *enumeration = Some(Enumeration {
            remaining: names.into(),
        });
        Ok(())
    }

    pub fn list_files_next(&self) -> Option<String> {
        let mut enumeration = self.enumeration.lock().unwrap();
        let active = enumeration.as_mut()?;
        let next = active.remaining.pop_front();
        if next.is_none() {
            *enumeration = None;
        }
        next
    }

    /// Returns a seekable view onto the raw (uncompressed) bytes of `path`.
    /// Compressed package entries are refused.
    pub fn open_as_file(&self, path: &str) -> Result<(Arc<dyn ReadSource>, u64, u64)> {
        match self.registry.find(path) {
            Ok(info) => {
                if info.deflated {
                    return Err(Error::invalid_argument("open_as_file refuses compressed entries"));
                }
                Ok((info.source, info.offset, info.original_len as u64))
            }
            Err(_) => {
                let file = std::fs::File::open(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::NotFound(path.to_string())
                    } else {
                        Error::Io(e)
                    }
                })?;
                let size = file.metadata().map_err(Error::Io)?.len();
                Ok((Arc::new(file) as Arc<dyn ReadSource>, 0, size))
            }
        }
    }

    fn alloc_slot(&self, ty: ResourceType) -> Result<usize> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots.iter().position(|s| matches!(s.state, SlotState::Unused));
        let idx = match idx {
            Some(idx) => idx,
            None => {
                let base = slots.len();
                slots.extend((0..SLOT_GROWTH).map(|_| ResourceInfo::unused()));
                base
            }
        };
        let mut order = self.next_alloc_order.lock().unwrap();
        let alloc_order = *order;
        *order = order.wrapping_add(1);
        let mark = *self.next_mark.lock().unwrap();

        slots[idx] = ResourceInfo {
            state: SlotState::Registered,
            ty,
            ptr: None,
            size: 0,
            alloc_order,
            submitted_mark: mark,
            link_next: idx,
        };
        Ok(idx)
    }

    /// Begin an async load of `path` (package or raw filesystem) into a
    /// freshly allocated buffer. Returns the slot index; the consumer must
    /// `sync`/`wait` before touching its payload.
    pub fn load_data(&self, path: &str, align: usize, flags: Flags) -> Result<usize> {
        self.load_typed(path, align, flags, ResourceType::Data)
    }

    pub fn load_texture(&self, path: &str, flags: Flags) -> Result<usize> {
        self.load_typed(path, 16, flags, ResourceType::Texture)
    }

    fn load_typed(&self, path: &str, align: usize, flags: Flags, ty: ResourceType) -> Result<usize> {
        let (source, offset, stored_len, original_len, deflated) = match self.registry.find(path) {
            Ok(info) => (info.source, info.offset, info.stored_len, info.original_len, info.deflated),
            Err(_) => {
                let file = std::fs::File::open(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::NotFound(path.to_string())
                    } else {
                        Error::Io(e)
                    }
                })?;
                let size = file.metadata().map_err(Error::Io)?.len() as u32;
                (Arc::new(file) as Arc<dyn ReadSource>, 0u64, size, size, false)
            }
        };

        let idx = self.alloc_slot(ty)?;
        let request_id = self
            .scheduler
            .submit(source, offset, stored_len as usize, false, None)
            .ok_or(Error::TooMany("read requests"))?;

        let mut slots = self.slots.lock().unwrap();
        slots[idx].state = SlotState::Submitted(PendingLoad {
            request_id,
            deflated,
            stored_len,
            original_len,
        });
        slots[idx].size = original_len as usize;
        drop(slots);
        // Alignment and allocation flags only matter for the final,
        // decompressed allocation, so they're stashed until finalize.
        self.pending_flags.lock().unwrap().insert(idx, (align, flags));
        Ok(idx)
    }

    /// Register an already-materialized buffer as a live resource directly,
    /// skipping the scheduler entirely.
    pub fn new_data(&self, bytes: &[u8], align: usize, flags: Flags) -> Result<usize> {
        let idx = self.alloc_slot(ResourceType::Data)?;
        let ptr = self.allocator.alloc(bytes.len(), align, flags)?;
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) };
        let mut slots = self.slots.lock().unwrap();
        slots[idx].state = SlotState::Live;
        slots[idx].ptr = Some(ptr);
        slots[idx].size = bytes.len();
        Ok(idx)
    }

    pub fn strdup(&self, s: &str, flags: Flags) -> Result<usize> {
        let idx = self.alloc_slot(ResourceType::Str)?;
        let ptr = self.allocator.strdup(s, flags)?;
        let mut slots = self.slots.lock().unwrap();
        slots[idx].state = SlotState::Live;
        slots[idx].ptr = Some(ptr);
        slots[idx].size = s.len() + 1;
        Ok(idx)
    }

    /// Hand ownership of a raw allocator pointer to a fresh slot.
    pub fn take_data(&self, ptr: NonNull<u8>, size: usize) -> Result<usize> {
        let idx = self.alloc_slot(ResourceType::Data)?;
        let mut slots = self.slots.lock().unwrap();
        slots[idx].state = SlotState::Live;
        slots[idx].ptr = Some(ptr);
        slots[idx].size = size;
        Ok(idx)
    }

    /// Alias `slot` as a new ring member; both now share the same payload.
    pub fn link(&self, slot: usize) -> Result<usize> {
        let mut slots = self.slots.lock().unwrap();
        if slot >= slots.len() || matches!(slots[slot].state, SlotState::Unused) {
            return Err(Error::invalid_argument("link of unused slot"));
        }
        let new_idx = slots
            .iter()
            .position(|s| matches!(s.state, SlotState::Unused))
            .unwrap_or(slots.len());
        if new_idx == slots.len() {
            slots.extend((0..SLOT_GROWTH).map(|_| ResourceInfo::unused()));
        }

        let mut order = self.next_alloc_order.lock().unwrap();
        let alloc_order = *order;
        *order = order.wrapping_add(1);

        let old_next = slots[slot].link_next;
        slots[new_idx] = ResourceInfo {
            state: SlotState::Live,
            ty: slots[slot].ty,
            ptr: slots[slot].ptr,
            size: slots[slot].size,
            alloc_order,
            submitted_mark: *self.next_mark.lock().unwrap(),
            link_next: old_next,
        };
        slots[slot].link_next = new_idx;
        Ok(new_idx)
    }

    /// The payload pointer written back for `slot`, or `None` if it is still
    /// loading, was never allocated, or finalize failed. The manager owns
    /// the storage; callers only ever dereference the handle.
    pub fn ptr(&self, slot: usize) -> Option<NonNull<u8>> {
        self.slots.lock().unwrap().get(slot).and_then(|s| s.ptr)
    }

    pub fn size(&self, slot: usize) -> usize {
        self.slots.lock().unwrap().get(slot).map(|s| s.size).unwrap_or(0)
    }

    pub fn is_live(&self, slot: usize) -> bool {
        matches!(
            self.slots.lock().unwrap().get(slot).map(|s| &s.state),
            Some(SlotState::Live)
        )
    }

    pub fn is_failed(&self, slot: usize) -> bool {
        matches!(
            self.slots.lock().unwrap().get(slot).map(|s| &s.state),
            Some(SlotState::Failed)
        )
    }

    /// Monotonic mark; never returns 0 so callers can treat 0 as "no mark".
    pub fn mark(&self) -> u32 {
        let mut next = self.next_mark.lock().unwrap();
        let mut m = *next;
        *next = next.wrapping_add(1);
        if *next == 0 {
            *next = 1;
        }
        if m == 0 {
            m = 1;
            *next = 2;
        }
        m
    }

    /// Non-blocking: finalizes everything submitted before `mark` that has
    /// finished reading, and reports whether all such loads are now `Live`
    /// or `Failed`.
    pub fn sync(&self, mark: u32) -> bool {
        let eligible: Vec<usize> = {
            let slots = self.slots.lock().unwrap();
            (0..slots.len())
                .filter(|&i| wrapping_lt(slots[i].submitted_mark, mark) || slots[i].submitted_mark == mark)
                .collect()
        };

        // Finalize in reverse slot order so decompression scratch for later
        // slots is freed before earlier Live payloads are touched —
        // collapsed here since decompression writes straight into the
        // destination buffer.
        let mut all_done = true;
        for &idx in eligible.iter().rev() {
            let is_submitted = {
                let slots = self.slots.lock().unwrap();
                matches!(slots[idx].state, SlotState::Submitted(_))
            };
            if !is_submitted {
                continue;
            }
            let request_id = {
                let slots = self.slots.lock().unwrap();
                match &slots[idx].state {
                    SlotState::Submitted(p) => p.request_id,
                    _ => continue,
                }
            };
            if self.scheduler.poll(request_id) != PollStatus::Done {
                all_done = false;
                continue;
            }
            self.finalize(idx);
        }
        all_done
    }

    /// Blocking variant of `sync`.
    pub fn wait(&self, mark: u32) {
        loop {
            if self.sync(mark) {
                return;
            }
            std::thread::yield_now();
        }
    }

    fn finalize(&self, idx: usize) {
        let pending = {
            let mut slots = self.slots.lock().unwrap();
            match std::mem::replace(&mut slots[idx].state, SlotState::Registered) {
                SlotState::Submitted(p) => p,
                other => {
                    slots[idx].state = other;
                    return;
                }
            }
        };

        // Already confirmed `Done` via `poll` above, so this never blocks.
        let outcome = match self.scheduler.wait(pending.request_id) {
            Ok(o) => o,
            Err(_) => {
                self.mark_failed(idx);
                return;
            }
        };

        let raw = match outcome {
            Outcome::Done { buffer, .. } => buffer,
            Outcome::Canceled | Outcome::Io(_) => {
                self.mark_failed(idx);
                return;
            }
        };

        let (align, flags) = self
            .pending_flags
            .lock()
            .unwrap()
            .remove(&idx)
            .unwrap_or((0, Flags::empty()));

        let final_bytes: Vec<u8> = if pending.deflated {
            let mut out = vec![0u8; pending.original_len as usize];
            let mut decoder = DeflateDecoder::new(&raw[..]);
            match decoder.read_exact(&mut out) {
                Ok(()) => out,
                Err(e) => {
                    warn!(slot = idx, error = %e, "BadFormat: truncated or corrupt DEFLATE stream");
                    self.mark_failed(idx);
                    return;
                }
            }
        } else {
            raw
        };

        let ptr = match self.allocator.alloc(final_bytes.len().max(1), align, flags) {
            Ok(ptr) => ptr,
            Err(e) => {
                warn!(slot = idx, error = %e, "finalize allocation failed");
                self.mark_failed(idx);
                return;
            }
        };
        unsafe {
            std::ptr::copy_nonoverlapping(final_bytes.as_ptr(), ptr.as_ptr(), final_bytes.len());
        }

        let mut slots = self.slots.lock().unwrap();
        slots[idx].ptr = Some(ptr);
        slots[idx].size = final_bytes.len();
        slots[idx].state = SlotState::Live;
    }

    fn mark_failed(&self, idx: usize) {
        let mut slots = self.slots.lock().unwrap();
        slots[idx].ptr = None;
        slots[idx].state = SlotState::Failed;
    }

    /// Free `slot`. An alias unlinks from its ring; the last member of a
    /// ring releases the payload.
    pub fn free(&self, slot: usize) {
        let mut slots = self.slots.lock().unwrap();
        if slot >= slots.len() || matches!(slots[slot].state, SlotState::Unused) {
            return;
        }

        if slots[slot].link_next == slot {
            let ptr = slots[slot].ptr.take();
            slots[slot].state = SlotState::Unused;
            drop(slots);
            if let Some(ptr) = ptr {
                self.allocator.free(ptr);
            }
            return;
        }

        // More than one ring member: find the predecessor and re-stitch.
        let mut pred = slot;
        let mut hops = 0;
        loop {
            hops += 1;
            if hops > LINK_WALK_BOUND {
                warn!(slot, "link ring exceeded safety bound, force-freeing payload");
                let ptr = slots[slot].ptr.take();
                slots[slot].state = SlotState::Unused;
                drop(slots);
                if let Some(ptr) = ptr {
                    self.allocator.free(ptr);
                }
                return;
            }
            let next = slots[pred].link_next;
            if next == slot {
                break;
            }
            pred = next;
        }
        let successor = slots[slot].link_next;
        slots[pred].link_next = successor;
        slots[slot].state = SlotState::Unused;
        slots[slot].ptr = None;
    }

    /// Destroy everything in strictly decreasing `alloc_order`, matching
    /// the dependency contract (a resource that indexes another resource
    /// frees first).
    pub fn free_all(&self) {
        loop {
            let next = {
                let slots = self.slots.lock().unwrap();
                let mut best: Option<usize> = None;
                for i in 0..slots.len() {
                    if matches!(slots[i].state, SlotState::Unused) {
                        continue;
                    }
                    best = match best {
                        None => Some(i),
                        Some(b) if wrapping_lt(slots[b].alloc_order, slots[i].alloc_order) => Some(i),
                        Some(b) => Some(b),
                    };
                }
                best
            };
            match next {
                Some(idx) => self.free(idx),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::Registry;
    use std::time::Duration;

    fn manager() -> ResourceManager {
        let allocator = Arc::new(Allocator::new(1 << 16, 1 << 14).unwrap());
        let scheduler = Arc::new(FileReadScheduler::new(
            16,
            65536,
            Duration::from_micros(50_000),
            Duration::from_micros(10_000),
        ));
        ResourceManager::new(allocator, scheduler, Arc::new(Registry::new()))
    }

    #[test]
    fn new_data_is_immediately_live() {
        let mgr = manager();
        let slot = mgr.new_data(b"hello", 0, Flags::empty()).unwrap();
        assert!(mgr.is_live(slot));
        assert_eq!(mgr.size(slot), 5);
        let ptr = mgr.ptr(slot).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 5) };
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn link_alias_shares_payload_and_unlinking_one_keeps_the_other_live() {
        let mgr = manager();
        let base = mgr.new_data(b"shared", 0, Flags::empty()).unwrap();
        let alias = mgr.link(base).unwrap();
        assert_eq!(mgr.ptr(base), mgr.ptr(alias));

        mgr.free(alias);
        // The ring had two members; freeing one must not release the
        // payload the other still points at.
        assert!(mgr.is_live(base));
        assert!(mgr.ptr(base).is_some());
    }

    #[test]
    fn freeing_the_last_ring_member_releases_the_payload() {
        let mgr = manager();
        let base = mgr.new_data(b"solo", 0, Flags::empty()).unwrap();
        mgr.free(base);
        assert!(!mgr.is_live(base));
        assert!(mgr.ptr(base).is_none());
    }

    #[test]
    fn strdup_round_trips_a_nul_terminated_string() {
        let mgr = manager();
        let slot = mgr.strdup("packrt", Flags::empty()).unwrap();
        let ptr = mgr.ptr(slot).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), mgr.size(slot)) };
        assert_eq!(&bytes[..6], b"packrt");
        assert_eq!(bytes[6], 0);
    }

    #[test]
    fn load_from_raw_filesystem_path_completes_on_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        std::fs::write(&path, b"from disk").unwrap();

        let mgr = manager();
        let slot = mgr.load_data(path.to_str().unwrap(), 0, Flags::empty()).unwrap();
        let mark = mgr.mark();
        mgr.wait(mark);

        assert!(mgr.is_live(slot));
        let ptr = mgr.ptr(slot).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), mgr.size(slot)) };
        assert_eq!(bytes, b"from disk");
    }

    #[test]
    fn missing_file_load_fails_rather_than_panicking() {
        let mgr = manager();
        assert!(mgr.load_data("/no/such/path/ever", 0, Flags::empty()).is_err());
    }
}
