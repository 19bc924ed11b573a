//! Plain backtrace dump of every thread.

use std::io::{self, Write};

use crate::inspect::{Frame, Inspector, ThreadInfo};
use crate::walk::FrameVisitor;

/// Prints each thread header and its frames as the walker delivers them.
/// The first I/O error sticks and suppresses further output; callers pick
/// it up with [`BacktraceVisitor::finish`].
pub struct BacktraceVisitor<W: Write> {
    out: W,
    header_written: bool,
    result: io::Result<()>,
}

impl<W: Write> BacktraceVisitor<W> {
    pub fn new(out: W) -> Self {
        BacktraceVisitor {
            out,
            header_written: false,
            result: Ok(()),
        }
    }

    pub fn finish(self) -> io::Result<()> {
        self.result
    }

    fn emit(&mut self, line: &str) {
        if self.result.is_ok() {
            self.result = writeln!(self.out, "{}", line);
        }
    }

    fn frame_line(frame: &Frame) -> String {
        let mut line = String::new();
        if frame.pc != 0 {
            line.push_str(&format!("{:#x} ", frame.pc));
        }
        line.push_str(&format!("{} ()", frame.func_name()));
        match (&frame.file, frame.line) {
            (Some(file), Some(lineno)) => line.push_str(&format!(" at {}:{}", file, lineno)),
            (Some(file), None) => line.push_str(&format!(" at {}", file)),
            (None, _) => {}
        }
        line
    }
}

impl<W: Write> FrameVisitor for BacktraceVisitor<W> {
    fn on_frame(&mut self, _inspector: &mut dyn Inspector, thread: &ThreadInfo, frame: &Frame) {
        if !self.header_written {
            self.emit(&format!("Thread {}", thread.id));
            if let Some(name) = &thread.name {
                self.emit(&format!(" name: {}", name));
            }
            self.header_written = true;
        }
        self.emit(&Self::frame_line(frame));
    }

    fn on_thread_done(&mut self, _thread: &ThreadInfo) {
        self.emit("");
        self.header_written = false;
    }
}
