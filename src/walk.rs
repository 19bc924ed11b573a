//! Thread and frame iteration over an [`Inspector`].

use log::warn;

use crate::inspect::{Frame, InspectError, Inspector, ThreadInfo};

/// Receives every readable frame of every walked thread, innermost first.
pub trait FrameVisitor {
    /// Called for each frame of `thread`, from the newest frame outwards.
    fn on_frame(&mut self, inspector: &mut dyn Inspector, thread: &ThreadInfo, frame: &Frame);

    /// Called once per thread after its last readable frame.
    fn on_thread_done(&mut self, thread: &ThreadInfo);
}

/// Tally of what a walk managed to cover.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    /// Threads the debugger reported.
    pub threads: u64,
    /// Threads skipped because they could not be focused or unwound.
    pub unreadable: u64,
}

/// Walk every thread of the target, feeding each stack to `visitor` one
/// frame at a time.
///
/// A thread that cannot be focused or whose innermost frame cannot be read
/// is counted and skipped; a failure partway up a stack truncates that
/// stack but keeps what was already seen. Only a dead debugger session
/// aborts the walk.
pub fn walk_threads(
    inspector: &mut dyn Inspector,
    visitor: &mut dyn FrameVisitor,
) -> Result<WalkStats, InspectError> {
    let threads = inspector.list_threads()?;
    let mut stats = WalkStats::default();
    for thread in &threads {
        stats.threads += 1;
        if let Err(e) = inspector.focus_thread(thread.id) {
            if let InspectError::Fatal(_) = e {
                return Err(e);
            }
            warn!("skipping thread {}: {}", thread.id, e);
            stats.unreadable += 1;
            continue;
        }
        let mut frame = match inspector.newest_frame() {
            Ok(frame) => frame,
            Err(InspectError::Fatal(msg)) => return Err(InspectError::Fatal(msg)),
            Err(e) => {
                warn!("skipping thread {}: {}", thread.id, e);
                stats.unreadable += 1;
                continue;
            }
        };
        loop {
            visitor.on_frame(inspector, thread, &frame);
            match inspector.older_frame(&frame) {
                Ok(Some(older)) => frame = older,
                Ok(None) => break,
                Err(InspectError::Fatal(msg)) => return Err(InspectError::Fatal(msg)),
                Err(e) => {
                    warn!("truncating thread {} stack: {}", thread.id, e);
                    break;
                }
            }
        }
        visitor.on_thread_done(thread);
    }
    Ok(stats)
}
