//! Integration tests for the contention walk over a scripted target.
//!
//! Each test builds a MockInspector with hand-written stacks, runs the
//! walker with a ContentionVisitor, and checks the aggregated report.

mod common;

use common::{MockInspector, MockThread};
use lockwalk::contention::ContentionVisitor;
use lockwalk::profile::VersionProfile;
use lockwalk::walk::walk_threads;

const LOCK_PTR: &str = "&entry->content_lock";
const LOCK_STATE: &str = "entry->content_lock";

const LOCK_TEXT: &str = "readers = 2, readers_wakeup = 0, writer_wakeup = 1, \
                         readers_queued = 1, writers_queued = 3, writer = 1, shared = 0";

fn run(inspector: &mut MockInspector) -> (ContentionVisitor, lockwalk::walk::WalkStats) {
    let mut visitor = ContentionVisitor::new(VersionProfile::modern());
    let stats = walk_threads(inspector, &mut visitor).expect("walk failed");
    (visitor, stats)
}

fn render(visitor: &ContentionVisitor, stats: &lockwalk::walk::WalkStats) -> String {
    let mut out = Vec::new();
    visitor.agg.render(stats, &mut out).expect("render failed");
    String::from_utf8(out).expect("report is not utf-8")
}

// ---------------------------------------------------------------------------
// ownership
// ---------------------------------------------------------------------------

#[test]
fn read_holder_is_reported_as_owner() {
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            3,
            &["FSAL_read", "cache_inode_rdwr", "nfs_Read", "worker_run"],
        )
        .with_eval(1, LOCK_PTR, "(pthread_rwlock_t *) 0x7f2a10")],
    );
    let (visitor, stats) = run(&mut inspector);

    assert_eq!(
        visitor.agg.owners["(pthread_rwlock_t *) 0x7f2a10"],
        vec![3]
    );
    // The owner scan only looks for the lock-taking frame; the thread is
    // not also tallied as reading or as a worker.
    assert_eq!(visitor.agg.total_reading, 0);
    assert_eq!(visitor.agg.total_worker_threads, 0);
    assert!(visitor.agg.locks.is_empty());
    assert_eq!(inspector.eval_count(LOCK_STATE), 0);

    let report = render(&visitor, &stats);
    assert!(report.contains("Lock (pthread_rwlock_t *) 0x7f2a10 owned by:"));
    assert!(report.contains("    thread 3"));
}

#[test]
fn owner_recorded_once_despite_recursive_lock_frames() {
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            4,
            &["FSAL_read", "cache_inode_rdwr", "cache_inode_rdwr"],
        )
        .with_eval(1, LOCK_PTR, "0x7f2a10")
        .with_eval(2, LOCK_PTR, "0x7f2a10")],
    );
    let (visitor, _) = run(&mut inspector);

    assert_eq!(visitor.agg.owners["0x7f2a10"], vec![4]);
}

// ---------------------------------------------------------------------------
// blocked threads
// ---------------------------------------------------------------------------

#[test]
fn blocked_reader_under_writelock() {
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            5,
            &[
                "pthread_rwlock_wrlock",
                "cache_inode_rdwr",
                "nfs_Read",
                "worker_run",
            ],
        )
        .with_eval(1, LOCK_PTR, "0x7f2a10")
        .with_eval(1, LOCK_STATE, LOCK_TEXT)],
    );
    let (visitor, stats) = run(&mut inspector);

    assert_eq!(visitor.agg.total_waiting_read_under_writelock, 1);
    assert_eq!(visitor.agg.total_waiting_read_under_readlock, 0);
    assert_eq!(visitor.agg.total_reading, 1);
    assert_eq!(visitor.agg.total_worker_threads, 1);

    let lock = &visitor.agg.locks["0x7f2a10"];
    assert_eq!(lock.occurrences, 1);
    let fields = lock.fields.expect("lock state should have parsed");
    assert_eq!(fields.readers, 2);
    assert_eq!(fields.writers_queued, 3);
    assert_eq!(fields.writer, 1);

    let report = render(&visitor, &stats);
    assert!(report.contains("total waiting to read with a writelock: 1"));
    assert!(report.contains("threads waiting on lock 0x7f2a10: 1"));
    assert!(report.contains("    nr_writers_queued: 3"));
}

#[test]
fn blocked_reader_under_readlock() {
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            6,
            &["pthread_rwlock_rdlock", "cache_inode_rdwr", "nfs_Read"],
        )
        .with_eval(1, LOCK_PTR, "0x7f2a10")
        .with_eval(1, LOCK_STATE, LOCK_TEXT)],
    );
    let (visitor, _) = run(&mut inspector);

    assert_eq!(visitor.agg.total_waiting_read_under_readlock, 1);
    assert_eq!(visitor.agg.total_waiting_read_under_writelock, 0);
    assert_eq!(visitor.agg.total_reading, 1);
}

#[test]
fn blocked_writer() {
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            7,
            &[
                "pthread_rwlock_wrlock",
                "cache_inode_rdwr",
                "nfs_Write",
                "worker_run",
            ],
        )
        .with_eval(1, LOCK_PTR, "0x7f2a10")
        .with_eval(1, LOCK_STATE, LOCK_TEXT)],
    );
    let (visitor, _) = run(&mut inspector);

    assert_eq!(visitor.agg.total_waiting_write, 1);
    assert_eq!(visitor.agg.total_writing, 1);
    assert_eq!(visitor.agg.total_reading, 0);
}

#[test]
fn lock_state_is_evaluated_once_across_waiters() {
    let blocked = |id| {
        MockThread::new(
            id,
            &["pthread_rwlock_wrlock", "cache_inode_rdwr", "nfs_Read"],
        )
        .with_eval(1, LOCK_PTR, "0x7f2a10")
        .with_eval(1, LOCK_STATE, LOCK_TEXT)
    };
    let mut inspector = MockInspector::new(&[], vec![blocked(1), blocked(2)]);
    let (visitor, _) = run(&mut inspector);

    assert_eq!(visitor.agg.locks["0x7f2a10"].occurrences, 2);
    assert_eq!(inspector.eval_count(LOCK_STATE), 1);
    assert_eq!(inspector.eval_count(LOCK_PTR), 2);
}

#[test]
fn recursive_read_op_counts_once_per_thread() {
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            8,
            &[
                "pthread_rwlock_rdlock",
                "cache_inode_rdwr",
                "nfs_Read",
                "nfs_Read",
                "worker_run",
            ],
        )
        .with_eval(1, LOCK_PTR, "0x7f2a10")
        .with_eval(1, LOCK_STATE, LOCK_TEXT)],
    );
    let (visitor, _) = run(&mut inspector);

    assert_eq!(visitor.agg.total_reading, 1);
    assert_eq!(visitor.agg.total_waiting_read_under_readlock, 1);
}

// ---------------------------------------------------------------------------
// degraded data
// ---------------------------------------------------------------------------

#[test]
fn unparsed_lock_state_still_reports_the_lock() {
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            9,
            &["pthread_rwlock_wrlock", "cache_inode_rdwr", "nfs_Read"],
        )
        .with_eval(1, LOCK_PTR, "0x7f2a10")
        .with_eval(1, LOCK_STATE, "<optimized out>")],
    );
    let (visitor, stats) = run(&mut inspector);

    let lock = &visitor.agg.locks["0x7f2a10"];
    assert_eq!(lock.occurrences, 1);
    assert!(lock.fields.is_none());

    let report = render(&visitor, &stats);
    assert!(report.contains("threads waiting on lock 0x7f2a10: 1"));
    assert!(report.contains("lock data unavailable"));
}

#[test]
fn failed_pointer_evaluation_drops_the_occurrence_but_keeps_tallies() {
    // No canned evals at all: the pointer expression fails in the lock
    // frame, so no lock is recorded, but the protocol frames above it
    // still classify the thread.
    let mut inspector = MockInspector::new(
        &[],
        vec![MockThread::new(
            10,
            &[
                "pthread_rwlock_wrlock",
                "cache_inode_rdwr",
                "nfs_Write",
                "worker_run",
            ],
        )],
    );
    let (visitor, _) = run(&mut inspector);

    assert!(visitor.agg.locks.is_empty());
    assert_eq!(visitor.agg.total_waiting_write, 1);
    assert_eq!(visitor.agg.total_worker_threads, 1);
}

#[test]
fn unreadable_thread_is_skipped_and_counted() {
    let mut inspector = MockInspector::new(
        &[],
        vec![
            MockThread::new(1, &["worker_run"]).unfocusable(),
            MockThread::new(2, &["nfs_Read", "worker_run"]),
        ],
    );
    let (visitor, stats) = run(&mut inspector);

    assert_eq!(stats.threads, 2);
    assert_eq!(stats.unreadable, 1);
    assert_eq!(visitor.agg.total_reading, 1);
    assert_eq!(visitor.agg.total_worker_threads, 1);

    let report = render(&visitor, &stats);
    assert!(report.contains("total threads: 2"));
    assert!(report.contains("total unreadable threads: 1"));
}

// ---------------------------------------------------------------------------
// profile resolution
// ---------------------------------------------------------------------------

#[test]
fn legacy_profile_recognizes_its_worker_entry() {
    let mut inspector = MockInspector::new(
        &["/lib64/libc.so.6"],
        vec![MockThread::new(1, &["worker_thread"])],
    );
    let modules = {
        use lockwalk::inspect::Inspector;
        inspector.list_modules().expect("list_modules failed")
    };
    let profile = VersionProfile::detect(&modules).expect("detect failed");
    assert_eq!(profile.generation, "1.5");

    let mut visitor = ContentionVisitor::new(profile);
    walk_threads(&mut inspector, &mut visitor).expect("walk failed");
    assert_eq!(visitor.agg.total_worker_threads, 1);
}

#[test]
fn idle_threads_produce_an_empty_report() {
    let mut inspector = MockInspector::new(
        &[],
        vec![
            MockThread::new(1, &["epoll_wait", "event_loop"]),
            MockThread::new(2, &["futex_wait", "fridge_thread"]),
        ],
    );
    let (visitor, stats) = run(&mut inspector);

    let report = render(&visitor, &stats);
    assert!(report.contains("total threads: 2"));
    assert!(report.contains("total num of locks: 0"));
    assert!(report.contains("total threads reading: 0"));
    assert!(!report.contains("owned by"));
}
