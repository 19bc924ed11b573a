//! Debugger-neutral view of a stopped process.
//!
//! Everything above this module works in terms of threads, frames, and
//! expression evaluation. The gdb backend implements [`Inspector`]; tests
//! substitute a scripted one.

use thiserror::Error;

/// A thread of the inspected process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Debugger-assigned thread number.
    pub id: u32,
    /// Target-assigned thread name, if the debugger knows one.
    pub name: Option<String>,
}

/// One stack frame of a stopped thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame level, 0 being the innermost.
    pub level: u32,
    /// Function name, if symbols resolve it.
    pub func: Option<String>,
    /// Program counter.
    pub pc: u64,
    /// Source file, if known.
    pub file: Option<String>,
    /// Source line, if known.
    pub line: Option<u32>,
}

impl Frame {
    /// The function name to classify and print, `"??"` when symbols are
    /// missing.
    pub fn func_name(&self) -> &str {
        self.func.as_deref().unwrap_or("??")
    }
}

#[derive(Debug, Error)]
pub enum InspectError {
    /// The session is unusable; abort the run.
    #[error("debugger session failed: {0}")]
    Fatal(String),
    /// One thread could not be examined; skip it and keep going.
    #[error("thread {id} unreadable: {reason}")]
    ThreadUnreadable { id: u32, reason: String },
    /// An expression did not evaluate in the chosen frame.
    #[error("cannot evaluate `{expr}`: {reason}")]
    Expression { expr: String, reason: String },
}

/// Read-only access to a stopped process or core dump.
///
/// The walker drives this one thread at a time: `focus_thread`, then
/// `newest_frame` and repeated `older_frame` until `None`. Expression
/// evaluation is always relative to an explicit frame so a visitor can
/// inspect locals at any depth of the stack it has already seen.
pub trait Inspector {
    /// Names of the loaded modules (shared libraries and the executable).
    fn list_modules(&mut self) -> Result<Vec<String>, InspectError>;

    /// All threads, in debugger order.
    fn list_threads(&mut self) -> Result<Vec<ThreadInfo>, InspectError>;

    /// Make `id` the current thread for subsequent frame calls.
    fn focus_thread(&mut self, id: u32) -> Result<(), InspectError>;

    /// Innermost frame of the focused thread.
    fn newest_frame(&mut self) -> Result<Frame, InspectError>;

    /// The caller of `frame`, or `None` at the outermost frame.
    fn older_frame(&mut self, frame: &Frame) -> Result<Option<Frame>, InspectError>;

    /// Evaluate `expr` in `frame` of the focused thread and return the
    /// debugger's textual rendering of the value.
    fn eval_in_frame(&mut self, frame: &Frame, expr: &str) -> Result<String, InspectError>;
}
