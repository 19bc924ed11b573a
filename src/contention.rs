//! Classification of stopped threads into lock waiters, lock owners, and
//! active readers/writers, and the report built from them.

use std::collections::BTreeMap;
use std::io::{self, Write};

use log::warn;

use crate::inspect::{Frame, Inspector, ThreadInfo};
use crate::lockparse::{parse_lock_text, LockFields};
use crate::profile::{Landmark, VersionProfile};
use crate::walk::{FrameVisitor, WalkStats};

/// Which blocking primitive put the thread to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockedKind {
    Read,
    Write,
}

/// Where the classifier is within the current thread's stack.
///
/// Entering a blocking primitive or the read entry point commits the rest
/// of the stack to that interpretation; a thread never switches from one
/// sub-scan to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Outer,
    Owner,
    Blocked(BlockedKind),
}

/// What one thread's stack told us. Booleans so a recursive landmark frame
/// contributes at most one unit to each total.
#[derive(Debug, Default, Clone, Copy)]
struct ThreadObservation {
    reading: bool,
    writing: bool,
    worker: bool,
    blocked_read_under_readlock: bool,
    blocked_read_under_writelock: bool,
    blocked_write: bool,
}

/// One contended lock, keyed by the debugger's rendering of its address.
#[derive(Debug, Default, Clone)]
pub struct LockObservation {
    /// Lock-holder frames seen referring to this lock.
    pub occurrences: u64,
    /// Parsed counters, `None` when the state text never parsed.
    pub fields: Option<LockFields>,
}

/// Totals and per-lock tables accumulated over a whole walk.
#[derive(Debug, Default)]
pub struct ContentionAggregator {
    pub total_worker_threads: u64,
    pub total_reading: u64,
    pub total_writing: u64,
    pub total_waiting_read_under_readlock: u64,
    pub total_waiting_read_under_writelock: u64,
    pub total_waiting_write: u64,
    pub locks: BTreeMap<String, LockObservation>,
    pub owners: BTreeMap<String, Vec<u32>>,
}

impl ContentionAggregator {
    /// Register one lock-holder frame reference to `addr`. Returns true the
    /// first time `addr` is seen, which is when the caller should capture
    /// the lock state.
    fn first_sight(&mut self, addr: &str) -> bool {
        let lock = self.locks.entry(addr.to_string()).or_default();
        lock.occurrences += 1;
        lock.occurrences == 1
    }

    fn record_lock_state(&mut self, addr: &str, fields: Option<LockFields>) {
        if let Some(lock) = self.locks.get_mut(addr) {
            lock.fields = fields;
        }
    }

    /// Record `thread` as a read-side holder of `addr`, once per thread.
    fn record_owner(&mut self, addr: &str, thread: u32) {
        let owners = self.owners.entry(addr.to_string()).or_default();
        if !owners.contains(&thread) {
            owners.push(thread);
        }
    }

    fn fold(&mut self, obs: &ThreadObservation) {
        self.total_reading += obs.reading as u64;
        self.total_writing += obs.writing as u64;
        self.total_worker_threads += obs.worker as u64;
        self.total_waiting_read_under_readlock += obs.blocked_read_under_readlock as u64;
        self.total_waiting_read_under_writelock += obs.blocked_read_under_writelock as u64;
        self.total_waiting_write += obs.blocked_write as u64;
    }

    /// Write the contention report. Lock and owner tables iterate in
    /// address order so the report is stable for a given snapshot.
    pub fn render<W: Write>(&self, stats: &WalkStats, out: &mut W) -> io::Result<()> {
        writeln!(out, "total threads: {}", stats.threads)?;
        writeln!(out, "total unreadable threads: {}", stats.unreadable)?;
        writeln!(out, "total worker threads: {}", self.total_worker_threads)?;
        writeln!(
            out,
            "total waiting to read with a readlock: {}",
            self.total_waiting_read_under_readlock
        )?;
        writeln!(
            out,
            "total waiting to read with a writelock: {}",
            self.total_waiting_read_under_writelock
        )?;
        writeln!(out, "total waiting to write: {}", self.total_waiting_write)?;
        writeln!(out, "total threads reading: {}", self.total_reading)?;
        writeln!(out, "total threads writing: {}", self.total_writing)?;
        writeln!(out, "total num of locks: {}", self.locks.len())?;
        for (addr, lock) in &self.locks {
            writeln!(out, "threads waiting on lock {}: {}", addr, lock.occurrences)?;
            match &lock.fields {
                Some(fields) => {
                    writeln!(out, "    nr_readers: {}", fields.readers)?;
                    writeln!(out, "    nr_readers_wakeup: {}", fields.readers_wakeup)?;
                    writeln!(out, "    writers_wakeup: {}", fields.writer_wakeup)?;
                    writeln!(out, "    nr_readers_queued: {}", fields.readers_queued)?;
                    writeln!(out, "    nr_writers_queued: {}", fields.writers_queued)?;
                    writeln!(out, "    writer: {}", fields.writer)?;
                    writeln!(out, "    shared: {}", fields.shared)?;
                }
                None => writeln!(out, "    lock data unavailable")?,
            }
        }
        for (addr, owners) in &self.owners {
            writeln!(out, "Lock {} owned by:", addr)?;
            for thread in owners {
                writeln!(out, "    thread {}", thread)?;
            }
        }
        Ok(())
    }
}

/// Frame classifier for the contention walk.
pub struct ContentionVisitor {
    profile: VersionProfile,
    scan: Scan,
    obs: ThreadObservation,
    pub agg: ContentionAggregator,
}

impl ContentionVisitor {
    pub fn new(profile: VersionProfile) -> Self {
        ContentionVisitor {
            profile,
            scan: Scan::Outer,
            obs: ThreadObservation::default(),
            agg: ContentionAggregator::default(),
        }
    }

    fn capture_lock(&mut self, inspector: &mut dyn Inspector, thread: &ThreadInfo, frame: &Frame) {
        let addr = match inspector.eval_in_frame(frame, &self.profile.lock_ptr_expr) {
            Ok(addr) => addr,
            Err(e) => {
                warn!("thread {}: {}", thread.id, e);
                return;
            }
        };
        if self.agg.first_sight(&addr) {
            let fields = match inspector.eval_in_frame(frame, &self.profile.lock_state_expr) {
                Ok(text) => parse_lock_text(&text),
                Err(e) => {
                    warn!("thread {}: {}", thread.id, e);
                    None
                }
            };
            self.agg.record_lock_state(&addr, fields);
        }
    }
}

impl FrameVisitor for ContentionVisitor {
    fn on_frame(&mut self, inspector: &mut dyn Inspector, thread: &ThreadInfo, frame: &Frame) {
        let landmark = match self.profile.classify(frame.func_name()) {
            Some(landmark) => landmark,
            None => return,
        };
        match self.scan {
            Scan::Outer => match landmark {
                Landmark::ReadPrimitive => self.scan = Scan::Owner,
                Landmark::BlockingWrite => self.scan = Scan::Blocked(BlockedKind::Write),
                Landmark::BlockingRead => self.scan = Scan::Blocked(BlockedKind::Read),
                Landmark::ReadOp => self.obs.reading = true,
                Landmark::WriteOp => self.obs.writing = true,
                Landmark::WorkerEntry => self.obs.worker = true,
                Landmark::WritePrimitive | Landmark::LockHolder => {}
            },
            Scan::Owner => {
                if landmark == Landmark::LockHolder {
                    match inspector.eval_in_frame(frame, &self.profile.lock_ptr_expr) {
                        Ok(addr) => self.agg.record_owner(&addr, thread.id),
                        Err(e) => warn!("thread {}: {}", thread.id, e),
                    }
                }
            }
            Scan::Blocked(kind) => match landmark {
                Landmark::LockHolder => self.capture_lock(inspector, thread, frame),
                Landmark::ReadOp => {
                    self.obs.reading = true;
                    match kind {
                        BlockedKind::Read => self.obs.blocked_read_under_readlock = true,
                        BlockedKind::Write => self.obs.blocked_read_under_writelock = true,
                    }
                }
                Landmark::WriteOp => {
                    self.obs.writing = true;
                    self.obs.blocked_write = true;
                }
                Landmark::WorkerEntry => self.obs.worker = true,
                _ => {}
            },
        }
    }

    fn on_thread_done(&mut self, _thread: &ThreadInfo) {
        self.agg.fold(&self.obs);
        self.obs = ThreadObservation::default();
        self.scan = Scan::Outer;
    }
}
