//! Diagnose rwlock contention inside a stopped nfs-ganesha process.
//!
//! The pieces fit together like this: a [`gdbmi::GdbInspector`] (or any
//! other [`inspect::Inspector`]) exposes the stopped target,
//! [`walk::walk_threads`] iterates every thread's stack, and a visitor
//! classifies the frames, either [`contention::ContentionVisitor`] building
//! a lock report or [`backtrace::BacktraceVisitor`] dumping the stacks.

pub mod backtrace;
pub mod contention;
pub mod gdbmi;
pub mod inspect;
pub mod lockparse;
pub mod profile;
pub mod walk;

pub use contention::{ContentionAggregator, ContentionVisitor};
pub use inspect::{Frame, InspectError, Inspector, ThreadInfo};
pub use lockparse::{parse_lock_text, LockFields};
pub use profile::{ProfileOverrides, VersionProfile};
pub use walk::{walk_threads, FrameVisitor, WalkStats};
