//! Dual-pool arena allocator.
//!
//! Two fixed-size byte arenas (`Main`, `Temp`), each a bump allocator with
//! independent front and back cursors plus a free-list of holes punched out
//! by `free`/`realloc`. Nothing here ever grows a pool or compacts it: the
//! whole point is to avoid fragmentation-causing behavior on a device with
//! no virtual memory, per the substrate's no-goals.
//!
//! Allocation bookkeeping uses explicit counters behind a `Mutex` rather
//! than hidden global state, and the pool/flag vocabulary (Main/Temp,
//! `CLEAR`/`TOP`/`TEMP`) follows a console memory manager's own naming.

use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Mutex;

use packrt_common::error::Error;
use packrt_common::Result;

/// Default alignment used when a caller passes `align = 0`.
pub const DEFAULT_ALIGN: usize = 16;

/// Which arena an allocation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Main,
    Temp,
}

impl PoolKind {
    fn name(self) -> &'static str {
        match self {
            PoolKind::Main => "main",
            PoolKind::Temp => "temp",
        }
    }
}

bitflags::bitflags! {
    /// Allocation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const CLEAR = 0b001;
        const TOP = 0b010;
        const TEMP = 0b100;
    }
}

/// Direction an allocation was carved from within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Front,
    Back,
}

/// Bookkeeping kept per live allocation so `realloc`/`free` can validate and
/// reproduce the original request.
#[derive(Debug, Clone, Copy)]
struct Live {
    pool: PoolKind,
    direction: Direction,
    size: usize,
    align: usize,
}

/// One bump arena with a front cursor, a back cursor, and a free list of
/// holes reclaimed by `free`. Holes are tracked but never coalesced across
/// arbitrary allocations — only a `free` that happens to sit at a cursor
/// edge shrinks the live region; all other frees just widen the hole table.
/// This matches the source design's refusal to compact.
struct Arena {
    capacity: usize,
    front: usize,
    back: usize,
    /// offset -> hole size, for holes strictly between `front` and `back`.
    holes: BTreeMap<usize, usize>,
}

impl Arena {
    fn new(capacity: usize) -> Self {
        Arena {
            capacity,
            front: 0,
            back: capacity,
            holes: BTreeMap::new(),
        }
    }

    fn contig_front(&self) -> usize {
        self.back.saturating_sub(self.front)
    }

    fn total_free(&self) -> usize {
        self.contig_front() + self.holes.values().sum::<usize>()
    }

    fn alloc(&mut self, size: usize, align: usize, direction: Direction) -> Option<usize> {
        // First, try to satisfy from a hole of exactly sufficient aligned space.
        if let Some(offset) = self.alloc_from_hole(size, align) {
            return Some(offset);
        }
        match direction {
            Direction::Front => {
                let aligned = align_up(self.front, align);
                let end = aligned.checked_add(size)?;
                if end > self.back {
                    return None;
                }
                if aligned > self.front {
                    self.holes.insert(self.front, aligned - self.front);
                }
                self.front = end;
                Some(aligned)
            }
            Direction::Back => {
                let start = self.back.checked_sub(size)?;
                let aligned_start = align_down(start, align);
                if aligned_start < self.front {
                    return None;
                }
                if self.back > aligned_start + size {
                    self.holes
                        .insert(aligned_start + size, self.back - (aligned_start + size));
                }
                self.back = aligned_start;
                Some(aligned_start)
            }
        }
    }

    fn alloc_from_hole(&mut self, size: usize, align: usize) -> Option<usize> {
        let mut found = None;
        for (&offset, &hole_size) in self.holes.iter() {
            let aligned = align_up(offset, align);
            let waste = aligned - offset;
            if waste < hole_size && hole_size - waste >= size {
                found = Some((offset, hole_size, aligned));
                break;
            }
        }
        let (offset, hole_size, aligned) = found?;
        self.holes.remove(&offset);
        if aligned > offset {
            self.holes.insert(offset, aligned - offset);
        }
        let tail = aligned + size;
        let hole_end = offset + hole_size;
        if tail < hole_end {
            self.holes.insert(tail, hole_end - tail);
        }
        Some(aligned)
    }

    fn free(&mut self, offset: usize, size: usize) {
        if offset + size == self.front {
            self.front = offset;
            // Pull back any holes that became adjacent to the new front.
            while let Some((&h_off, &h_size)) = self.holes.range(..self.front).next_back() {
                if h_off + h_size == self.front {
                    self.front = h_off;
                    self.holes.remove(&h_off);
                } else {
                    break;
                }
            }
            return;
        }
        if offset == self.back {
            self.back = offset + size;
            while let Some(&h_size) = self.holes.get(&self.back) {
                self.holes.remove(&self.back);
                self.back += h_size;
            }
            return;
        }
        self.holes.insert(offset, size);
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

fn is_power_of_two(value: usize) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

struct PoolState {
    arena: Arena,
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the raw pointer is only ever dereferenced while holding the
// allocator's mutex, and offsets into it are always in-bounds (validated by
// `Arena`).
unsafe impl Send for PoolState {}

/// The process-wide dual-pool allocator.
///
/// `Main` is for long-lived data; `Temp` is scratch that may be satisfied
/// from `Main`'s back region when the `Temp` pool itself is full (never the
/// reverse — see `alloc`).
pub struct Allocator {
    main: Mutex<PoolState>,
    temp: Mutex<PoolState>,
    live: Mutex<std::collections::HashMap<usize, Live>>,
}

impl Allocator {
    /// Create an allocator owning two freshly-allocated byte regions.
    pub fn new(main_bytes: usize, temp_bytes: usize) -> Result<Self> {
        Ok(Allocator {
            main: Mutex::new(Self::new_pool(main_bytes)?),
            temp: Mutex::new(Self::new_pool(temp_bytes)?),
            live: Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn new_pool(bytes: usize) -> Result<PoolState> {
        let layout = Layout::from_size_align(bytes.max(1), DEFAULT_ALIGN)
            .map_err(|_| Error::invalid_argument("pool size/align overflow"))?;
        // SAFETY: layout has nonzero size.
        let base = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(base).ok_or_else(|| Error::OutOfMemory { pool: "init" })?;
        Ok(PoolState {
            arena: Arena::new(bytes),
            base,
            layout,
        })
    }

    /// Allocate `size` bytes with the given alignment (0 -> `DEFAULT_ALIGN`)
    /// and flags. Returns a raw pointer into the chosen pool.
    pub fn alloc(&self, size: usize, align: usize, flags: Flags) -> Result<NonNull<u8>> {
        let align = if align == 0 { DEFAULT_ALIGN } else { align };
        if !is_power_of_two(align) {
            return Err(Error::invalid_argument("alignment must be a power of two"));
        }
        let direction = if flags.contains(Flags::TOP) {
            Direction::Back
        } else {
            Direction::Front
        };

        let (pool, offset) = if flags.contains(Flags::TEMP) {
            let mut temp = self.temp.lock().unwrap();
            match temp.arena.alloc(size, align, direction) {
                Some(off) => (PoolKind::Temp, off),
                None => {
                    drop(temp);
                    // Temp exhausted: fall back to Main-back, never Temp -> reverse.
                    let mut main = self.main.lock().unwrap();
                    let off = main
                        .arena
                        .alloc(size, align, Direction::Back)
                        .ok_or(Error::OutOfMemory { pool: "main" })?;
                    let ptr = unsafe { NonNull::new_unchecked(main.base.as_ptr().add(off)) };
                    self.register(ptr, Live { pool: PoolKind::Main, direction: Direction::Back, size, align });
                    if flags.contains(Flags::CLEAR) {
                        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
                    }
                    return Ok(ptr);
                }
            }
        } else {
            let mut main = self.main.lock().unwrap();
            let off = main
                .arena
                .alloc(size, align, direction)
                .ok_or(Error::OutOfMemory { pool: "main" })?;
            (PoolKind::Main, off)
        };

        let base = match pool {
            PoolKind::Main => self.main.lock().unwrap().base,
            PoolKind::Temp => self.temp.lock().unwrap().base,
        };
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
        self.register(ptr, Live { pool, direction, size, align });
        if flags.contains(Flags::CLEAR) {
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
        }
        Ok(ptr)
    }

    fn register(&self, ptr: NonNull<u8>, live: Live) {
        self.live.lock().unwrap().insert(ptr.as_ptr() as usize, live);
    }

    fn pool_mutex(&self, pool: PoolKind) -> &Mutex<PoolState> {
        match pool {
            PoolKind::Main => &self.main,
            PoolKind::Temp => &self.temp,
        }
    }

    /// Free a previously allocated pointer. No-op if `ptr` is not tracked
    /// (mirrors the C `free(NULL)` convention at the API boundary — callers
    /// are expected to pass a pointer this allocator returned).
    pub fn free(&self, ptr: NonNull<u8>) {
        let live = { self.live.lock().unwrap().remove(&(ptr.as_ptr() as usize)) };
        let Some(live) = live else { return };
        let mut pool = self.pool_mutex(live.pool).lock().unwrap();
        let base = pool.base.as_ptr() as usize;
        let offset = ptr.as_ptr() as usize - base;
        pool.arena.free(offset, live.size);
    }

    /// Reallocate, preserving alignment and direction unless `flags` change
    /// them (a sticky-flag change forces an alloc/copy/free). `ptr = None`
    /// allocates; `size = 0` frees and returns `None`.
    pub fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
        flags: Flags,
    ) -> Result<Option<NonNull<u8>>> {
        let Some(ptr) = ptr else {
            if size == 0 {
                return Ok(None);
            }
            return self.alloc(size, 0, flags).map(Some);
        };
        if size == 0 {
            self.free(ptr);
            return Ok(None);
        }

        let live = {
            self.live
                .lock()
                .unwrap()
                .get(&(ptr.as_ptr() as usize))
                .copied()
        };
        let Some(live) = live else {
            return Err(Error::invalid_argument("realloc of untracked pointer"));
        };

        let wants_temp = flags.contains(Flags::TEMP);
        let wants_top = flags.contains(Flags::TOP);
        let was_temp = live.pool == PoolKind::Temp;
        let was_top = live.direction == Direction::Back;

        if wants_temp != was_temp || wants_top != was_top {
            // Sticky flags changed: alloc fresh, copy, free old.
            let new_ptr = self.alloc(size, live.align, flags)?;
            let copy_len = size.min(live.size);
            unsafe {
                std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len);
            }
            self.free(ptr);
            return Ok(Some(new_ptr));
        }

        // Same pool/direction: try to grow/shrink in place by treating it as
        // free-then-alloc at the same spot when possible; otherwise migrate.
        let new_ptr = self.alloc(size, live.align, flags)?;
        let copy_len = size.min(live.size);
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len);
        }
        self.free(ptr);
        Ok(Some(new_ptr))
    }

    /// Duplicate a string into the allocator, NUL-terminated.
    pub fn strdup(&self, s: &str, flags: Flags) -> Result<NonNull<u8>> {
        let bytes = s.as_bytes();
        let ptr = self.alloc(bytes.len() + 1, 1, flags)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
            *ptr.as_ptr().add(bytes.len()) = 0;
        }
        Ok(ptr)
    }

    /// Total pool capacity in bytes.
    pub fn total(&self, pool: PoolKind) -> usize {
        self.pool_mutex(pool).lock().unwrap().arena.capacity
    }

    /// Free bytes across the front/back cursors and all holes.
    pub fn avail(&self, pool: PoolKind) -> usize {
        self.pool_mutex(pool).lock().unwrap().arena.total_free()
    }

    /// Largest allocation immediately satisfiable without consulting holes.
    pub fn contig(&self, pool: PoolKind) -> usize {
        self.pool_mutex(pool).lock().unwrap().arena.contig_front()
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        let main = self.main.lock().unwrap();
        let temp = self.temp.lock().unwrap();
        unsafe {
            alloc::dealloc(main.base.as_ptr(), main.layout);
            alloc::dealloc(temp.base.as_ptr(), temp.layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_roundtrip() {
        let a = Allocator::new(4096, 1024).unwrap();
        let p = a.alloc(64, 16, Flags::empty()).unwrap();
        assert_eq!((p.as_ptr() as usize) % 16, 0);
        a.free(p);
        assert_eq!(a.avail(PoolKind::Main), a.total(PoolKind::Main));
    }

    #[test]
    fn top_allocates_from_back() {
        let a = Allocator::new(4096, 1024).unwrap();
        let front = a.alloc(64, 16, Flags::empty()).unwrap();
        let back = a.alloc(64, 16, Flags::TOP).unwrap();
        assert!(back.as_ptr() > front.as_ptr());
    }

    #[test]
    fn temp_falls_back_to_main_back_when_exhausted() {
        let a = Allocator::new(4096, 64).unwrap();
        let _small = a.alloc(32, 16, Flags::TEMP).unwrap();
        // Temp pool (64 bytes) cannot satisfy this; must land in Main.
        let big = a.alloc(256, 16, Flags::TEMP).unwrap();
        let main_base = a.main.lock().unwrap().base.as_ptr() as usize;
        let temp_base = a.temp.lock().unwrap().base.as_ptr() as usize;
        let p = big.as_ptr() as usize;
        assert!(p >= main_base && p < main_base + 4096);
        assert!(!(p >= temp_base && p < temp_base + 64));
    }

    #[test]
    fn main_never_steals_temp() {
        let a = Allocator::new(64, 4096).unwrap();
        let _first = a.alloc(64, 16, Flags::empty()).unwrap();
        // Main pool is full; Main must fail rather than reach into Temp.
        assert!(a.alloc(1, 16, Flags::empty()).is_err());
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        let a = Allocator::new(4096, 1024).unwrap();
        assert!(a.alloc(16, 3, Flags::empty()).is_err());
    }

    #[test]
    fn realloc_null_allocates_zero_frees() {
        let a = Allocator::new(4096, 1024).unwrap();
        let p = a.realloc(None, 32, Flags::empty()).unwrap().unwrap();
        let freed = a.realloc(Some(p), 0, Flags::empty()).unwrap();
        assert!(freed.is_none());
    }

    #[test]
    fn strdup_roundtrips_bytes() {
        let a = Allocator::new(4096, 1024).unwrap();
        let p = a.strdup("hello", Flags::empty()).unwrap();
        let slice = unsafe { std::slice::from_raw_parts(p.as_ptr(), 6) };
        assert_eq!(slice, b"hello\0");
        a.free(p);
    }

    #[test]
    fn invariant_sizes_sum_to_capacity() {
        let a = Allocator::new(4096, 1024).unwrap();
        let p1 = a.alloc(100, 16, Flags::empty()).unwrap();
        let _p2 = a.alloc(200, 16, Flags::TOP).unwrap();
        a.free(p1);
        let live_total: usize = a.live.lock().unwrap().values().map(|l| l.size).sum();
        assert!(live_total + a.avail(PoolKind::Main) <= a.total(PoolKind::Main));
    }
}
