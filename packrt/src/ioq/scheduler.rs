//! `FileReadScheduler`: the single background worker that fulfills raw
//! reads with mixed immediate/deadline priority.
//!
//! A `Mutex`-protected queue plus `Condvar` drives exactly one
//! `std::thread` worker, with a `stop` flag for clean shutdown. The queue
//! is two queues — an immediate FIFO and a deadline min-heap — rather
//! than one `BinaryHeap`, because the two classes have different
//! starvation rules.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

/// Anything the scheduler can issue an absolute-offset read against.
/// Implemented for `std::fs::File` via `FileExt::read_at`, so the worker
/// never needs a mutable seek position — it can safely interleave reads
/// against independently-submitted requests on the same fd.
pub trait ReadSource: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;
}

impl ReadSource for std::fs::File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

/// Dense, 1-based request identifier. Capacity or parameter errors are
/// modeled as `Option::None` rather than an in-band zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(NonZeroU32);

impl RequestId {
    fn from_index(idx: usize) -> Self {
        RequestId(NonZeroU32::new((idx + 1) as u32).expect("index fits in u32"))
    }
    fn to_index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Outcome of a finished (or aborted) request.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Bytes actually read; may be less than requested on EOF (a short
    /// read is not an error).
    Done { buffer: Vec<u8>, bytes_read: usize },
    Canceled,
    Io(String),
}

/// Non-blocking poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Done,
    InvalidId,
}

#[derive(Clone, Copy)]
enum Class {
    Immediate,
    Deadline(Instant),
}

struct Entry {
    source: Arc<dyn ReadSource>,
    cursor: u64,
    remaining: usize,
    buffer: Vec<u8>,
    bytes_read: usize,
    class: Class,
    seq: u64,
    aborted: bool,
    finished: Option<Outcome>,
    waited: bool,
}

struct State {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    immediate_q: VecDeque<usize>,
    deadline_q: BinaryHeap<Reverse<(Instant, u64, usize)>>,
    next_seq: u64,
}

impl State {
    fn new(capacity: usize) -> Self {
        State {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
            immediate_q: VecDeque::new(),
            deadline_q: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
    stop: AtomicBool,
    blocksize: usize,
    priority_time: Duration,
    priority_delay: Duration,
}

/// The scheduler itself: one background thread plus the shared queue state.
pub struct FileReadScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl FileReadScheduler {
    pub fn new(capacity: usize, blocksize: usize, priority_time: Duration, priority_delay: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new(capacity)),
            condvar: Condvar::new(),
            stop: AtomicBool::new(false),
            blocksize,
            priority_time,
            priority_delay,
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || Self::worker_loop(worker_shared));
        FileReadScheduler {
            shared,
            worker: Some(worker),
        }
    }

    /// Submit a read. Returns `None` on capacity exhaustion. A zero-length
    /// request is handled by returning a slot that is already `Done` on the
    /// next poll rather than rejecting it outright, so it completes
    /// immediately without a trip through the worker thread.
    pub fn submit(
        &self,
        source: Arc<dyn ReadSource>,
        start: u64,
        length: usize,
        timed: bool,
        time_limit_micros: Option<i64>,
    ) -> Option<RequestId> {
        let mut state = self.shared.state.lock().unwrap();
        let idx = state.free.pop()?;
        let seq = state.next_seq;
        state.next_seq += 1;

        let class = if timed {
            let deadline = Instant::now()
                + Duration::from_micros(time_limit_micros.unwrap_or(0).max(0) as u64);
            Class::Deadline(deadline)
        } else {
            Class::Immediate
        };

        let finished = if length == 0 {
            Some(Outcome::Done {
                buffer: Vec::new(),
                bytes_read: 0,
            })
        } else {
            None
        };
        let already_done = finished.is_some();

        state.slots[idx] = Some(Entry {
            source,
            cursor: start,
            remaining: length,
            buffer: Vec::with_capacity(length),
            bytes_read: 0,
            class,
            seq,
            aborted: false,
            finished,
            waited: false,
        });

        if !already_done {
            match class {
                Class::Immediate => state.immediate_q.push_back(idx),
                Class::Deadline(deadline) => state.deadline_q.push(Reverse((deadline, seq, idx))),
            }
        }
        drop(state);
        self.shared.condvar.notify_one();
        Some(RequestId::from_index(idx))
    }

    pub fn poll(&self, id: RequestId) -> PollStatus {
        let state = self.shared.state.lock().unwrap();
        match state.slots.get(id.to_index()) {
            Some(Some(entry)) => {
                if entry.finished.is_some() {
                    PollStatus::Done
                } else {
                    PollStatus::Pending
                }
            }
            _ => PollStatus::InvalidId,
        }
    }

    /// Block until the request finishes, then release its slot. At most one
    /// thread may wait on a given id; a second concurrent wait is rejected
    /// rather than left to race.
    pub fn wait(&self, id: RequestId) -> Result<Outcome, &'static str> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            let idx = id.to_index();
            match state.slots.get_mut(idx) {
                None => return Err("invalid request id"),
                Some(None) => return Err("invalid request id"),
                Some(Some(entry)) => {
                    if entry.waited {
                        return Err("request already has a waiter");
                    }
                    if entry.finished.is_some() {
                        entry.waited = true;
                        let outcome = entry.finished.take().unwrap();
                        state.slots[idx] = None;
                        state.free.push(idx);
                        return Ok(outcome);
                    }
                }
            }
            state = self.shared.condvar.wait(state).unwrap();
        }
    }

    /// Best-effort cooperative cancellation: the worker finalizes with
    /// `Canceled` the next time it encounters this request.
    pub fn abort(&self, id: RequestId) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(Some(entry)) = state.slots.get_mut(id.to_index()) {
            entry.aborted = true;
        }
        drop(state);
        self.shared.condvar.notify_one();
    }

    fn worker_loop(shared: Arc<Shared>) {
        let mut priority_until: Option<Instant> = None;
        loop {
            if shared.stop.load(Ordering::Relaxed) {
                return;
            }
            let mut state = shared.state.lock().unwrap();

            // Drop any aborted entries sitting at the head of either queue
            // before choosing what to service.
            Self::reap_aborted(&mut state);

            let now = Instant::now();
            let expired_deadline = matches!(state.deadline_q.peek(), Some(Reverse((d, _, _))) if *d <= now);

            if !expired_deadline && state.immediate_q.is_empty() && state.deadline_q.is_empty() {
                // Nothing to do: sleep until woken by submit/abort.
                let _unused = shared.condvar.wait_timeout(state, Duration::from_millis(250)).unwrap();
                continue;
            }

            let in_priority_window = priority_until.map_or(false, |t| now < t);

            let idx = if expired_deadline {
                priority_until = Some(now + shared.priority_time);
                let Reverse((_, _, idx)) = state.deadline_q.pop().unwrap();
                idx
            } else if in_priority_window {
                // Deadline-priority mode: ignore immediate requests; only
                // other already-expired deadlines may be served, and none
                // are (checked above), so sleep PRIORITY_DELAY and retry.
                drop(state);
                thread::sleep(shared.priority_delay);
                continue;
            } else if let Some(idx) = state.immediate_q.pop_front() {
                idx
            } else if let Some(Reverse((deadline, _, idx))) = state.deadline_q.peek().copied() {
                // No expired deadline, no immediate request: wait until the
                // earliest deadline actually arrives rather than spin.
                drop(state);
                let wait = deadline.saturating_duration_since(Instant::now());
                thread::sleep(wait.min(Duration::from_millis(50)));
                let _ = idx;
                continue;
            } else {
                drop(state);
                continue;
            };

            let one_shot = matches!(state.slots[idx].as_ref().map(|e| &e.class), Some(Class::Deadline(_)))
                && expired_deadline;

            // Pull out what we need, then release the lock before doing I/O:
            // no lock is held across a kernel I/O call.
            let (source, cursor, to_read, aborted) = {
                let entry = state.slots[idx].as_ref().unwrap();
                let to_read = if one_shot {
                    entry.remaining
                } else {
                    entry.remaining.min(shared.blocksize)
                };
                (Arc::clone(&entry.source), entry.cursor, to_read, entry.aborted)
            };
            drop(state);

            if aborted {
                let mut state = shared.state.lock().unwrap();
                Self::finish(&mut state, idx, Outcome::Canceled);
                shared.condvar.notify_all();
                continue;
            }

            let mut chunk = vec![0u8; to_read];
            let read_result = source.read_at(cursor, &mut chunk);

            let mut state = shared.state.lock().unwrap();
            let Some(entry) = state.slots[idx].as_mut() else {
                continue; // freed concurrently (shouldn't happen, but be safe)
            };
            match read_result {
                Ok(n) => {
                    chunk.truncate(n);
                    entry.buffer.extend_from_slice(&chunk);
                    entry.bytes_read += n;
                    entry.cursor += n as u64;
                    entry.remaining = entry.remaining.saturating_sub(n);
                    if n == 0 || entry.remaining == 0 {
                        let buffer = std::mem::take(&mut entry.buffer);
                        let bytes_read = entry.bytes_read;
                        Self::finish(&mut state, idx, Outcome::Done { buffer, bytes_read });
                    } else {
                        // Leave head-of-queue for the next iteration.
                        let requeue = match &entry.class {
                            Class::Immediate => None,
                            Class::Deadline(d) => Some((*d, entry.seq)),
                        };
                        match requeue {
                            None => state.immediate_q.push_front(idx),
                            Some((d, seq)) => {
                                state.deadline_q.push(Reverse((d, seq, idx)));
                            }
                        }
                    }
                }
                Err(e) => {
                    Self::finish(&mut state, idx, Outcome::Io(e.to_string()));
                }
            }
            shared.condvar.notify_all();
            if one_shot {
                trace!("entering deadline-priority mode");
            }
        }
    }

    fn reap_aborted(state: &mut State) {
        while let Some(&idx) = state.immediate_q.front() {
            if state.slots[idx].as_ref().map_or(false, |e| e.aborted) {
                state.immediate_q.pop_front();
                Self::finish(state, idx, Outcome::Canceled);
            } else {
                break;
            }
        }
    }

    fn finish(state: &mut State, idx: usize, outcome: Outcome) {
        if let Some(entry) = state.slots[idx].as_mut() {
            debug!(slot = idx, "request finished");
            entry.finished = Some(outcome);
        }
    }
}

impl Drop for FileReadScheduler {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.condvar.notify_all();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("scheduler worker thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file_with(bytes: &[u8]) -> (tempfile::TempDir, Arc<std::fs::File>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        (dir, Arc::new(std::fs::File::open(&path).unwrap()))
    }

    #[test]
    fn zero_length_read_completes_immediately() {
        let sched = FileReadScheduler::new(8, 4096, Duration::from_millis(50), Duration::from_millis(10));
        let (_dir, file) = temp_file_with(b"hello world");
        let id = sched.submit(file, 0, 0, false, None).unwrap();
        match sched.wait(id).unwrap() {
            Outcome::Done { bytes_read, buffer } => {
                assert_eq!(bytes_read, 0);
                assert!(buffer.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn immediate_read_returns_full_contents() {
        let sched = FileReadScheduler::new(8, 4, Duration::from_millis(50), Duration::from_millis(10));
        let (_dir, file) = temp_file_with(b"0123456789");
        let id = sched.submit(file, 0, 10, false, None).unwrap();
        match sched.wait(id).unwrap() {
            Outcome::Done { buffer, bytes_read } => {
                assert_eq!(bytes_read, 10);
                assert_eq!(buffer, b"0123456789");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn short_read_at_eof_is_not_an_error() {
        let sched = FileReadScheduler::new(8, 64 * 1024, Duration::from_millis(50), Duration::from_millis(10));
        let (_dir, file) = temp_file_with(b"short");
        let id = sched.submit(file, 0, 100, false, None).unwrap();
        match sched.wait(id).unwrap() {
            Outcome::Done { buffer, bytes_read } => {
                assert_eq!(bytes_read, 5);
                assert_eq!(buffer, b"short");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn abort_before_service_cancels() {
        let sched = FileReadScheduler::new(8, 64 * 1024, Duration::from_millis(50), Duration::from_millis(10));
        let (_dir, file) = temp_file_with(&vec![0u8; 1 << 20]);
        let id = sched.submit(file, 0, 1 << 20, false, None).unwrap();
        sched.abort(id);
        match sched.wait(id).unwrap() {
            Outcome::Canceled => {}
            other => panic!("expected Canceled, got {other:?}"),
        }
    }

    #[test]
    fn slot_is_released_after_wait() {
        let sched = FileReadScheduler::new(1, 4096, Duration::from_millis(50), Duration::from_millis(10));
        let (_dir, file) = temp_file_with(b"x");
        let id1 = sched.submit(Arc::clone(&file) as Arc<dyn ReadSource>, 0, 1, false, None).unwrap();
        sched.wait(id1).unwrap();
        // Capacity is 1; a second submit only succeeds if the first slot
        // was actually returned to the free pool (invariant #4).
        assert!(sched.submit(file, 0, 1, false, None).is_some());
    }

    #[test]
    fn immediate_before_deadline_then_deadline_priority_window() {
        let sched = FileReadScheduler::new(8, 4096, Duration::from_millis(50), Duration::from_millis(10));
        let (_dir, file) = temp_file_with(&vec![7u8; 1024]);

        let deadline_id = sched
            .submit(Arc::clone(&file) as Arc<dyn ReadSource>, 0, 512, true, Some(30_000))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let immediate_id = sched.submit(Arc::clone(&file) as Arc<dyn ReadSource>, 0, 16, false, None).unwrap();

        let immediate_first = sched.wait(immediate_id).unwrap();
        assert!(matches!(immediate_first, Outcome::Done { .. }));
        let deadline_outcome = sched.wait(deadline_id).unwrap();
        assert!(matches!(deadline_outcome, Outcome::Done { .. }));
    }
}
