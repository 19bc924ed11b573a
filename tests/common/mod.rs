//! Common test utilities for lockwalk integration tests.

use std::collections::HashMap;

use lockwalk::inspect::{Frame, InspectError, Inspector, ThreadInfo};

/// Build a frame at `level` for function `func` with a synthetic pc.
pub fn frame(level: u32, func: &str) -> Frame {
    Frame {
        level,
        func: Some(func.to_string()),
        pc: 0x400000 + level as u64 * 0x10,
        file: None,
        line: None,
    }
}

/// One scripted thread: its stack from innermost to outermost, whether it
/// can be focused, and canned expression results keyed by frame level and
/// expression text.
pub struct MockThread {
    pub info: ThreadInfo,
    pub frames: Vec<Frame>,
    pub focusable: bool,
    pub evals: HashMap<(u32, String), String>,
}

impl MockThread {
    pub fn new(id: u32, funcs: &[&str]) -> Self {
        MockThread {
            info: ThreadInfo { id, name: None },
            frames: funcs
                .iter()
                .enumerate()
                .map(|(level, func)| frame(level as u32, func))
                .collect(),
            focusable: true,
            evals: HashMap::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.info.name = Some(name.to_string());
        self
    }

    pub fn with_eval(mut self, level: u32, expr: &str, value: &str) -> Self {
        self.evals
            .insert((level, expr.to_string()), value.to_string());
        self
    }

    pub fn unfocusable(mut self) -> Self {
        self.focusable = false;
        self
    }
}

/// In-memory [`Inspector`] over a scripted set of threads.
pub struct MockInspector {
    pub modules: Vec<String>,
    pub threads: Vec<MockThread>,
    focused: Option<usize>,
    /// Every evaluation performed, as (thread id, frame level, expression).
    pub eval_log: Vec<(u32, u32, String)>,
}

impl MockInspector {
    pub fn new(modules: &[&str], threads: Vec<MockThread>) -> Self {
        MockInspector {
            modules: modules.iter().map(|m| m.to_string()).collect(),
            threads,
            focused: None,
            eval_log: Vec::new(),
        }
    }

    /// How many times `expr` was evaluated across all threads.
    pub fn eval_count(&self, expr: &str) -> usize {
        self.eval_log.iter().filter(|(_, _, e)| e == expr).count()
    }
}

impl Inspector for MockInspector {
    fn list_modules(&mut self) -> Result<Vec<String>, InspectError> {
        Ok(self.modules.clone())
    }

    fn list_threads(&mut self) -> Result<Vec<ThreadInfo>, InspectError> {
        Ok(self.threads.iter().map(|t| t.info.clone()).collect())
    }

    fn focus_thread(&mut self, id: u32) -> Result<(), InspectError> {
        let idx = self
            .threads
            .iter()
            .position(|t| t.info.id == id)
            .ok_or_else(|| InspectError::ThreadUnreadable {
                id,
                reason: "no such thread".to_string(),
            })?;
        if !self.threads[idx].focusable {
            return Err(InspectError::ThreadUnreadable {
                id,
                reason: "cannot access thread registers".to_string(),
            });
        }
        self.focused = Some(idx);
        Ok(())
    }

    fn newest_frame(&mut self) -> Result<Frame, InspectError> {
        let thread = &self.threads[self.focused.expect("no focused thread")];
        thread
            .frames
            .first()
            .cloned()
            .ok_or_else(|| InspectError::ThreadUnreadable {
                id: thread.info.id,
                reason: "empty stack".to_string(),
            })
    }

    fn older_frame(&mut self, frame: &Frame) -> Result<Option<Frame>, InspectError> {
        let thread = &self.threads[self.focused.expect("no focused thread")];
        Ok(thread.frames.get(frame.level as usize + 1).cloned())
    }

    fn eval_in_frame(&mut self, frame: &Frame, expr: &str) -> Result<String, InspectError> {
        let idx = self.focused.expect("no focused thread");
        let id = self.threads[idx].info.id;
        self.eval_log.push((id, frame.level, expr.to_string()));
        self.threads[idx]
            .evals
            .get(&(frame.level, expr.to_string()))
            .cloned()
            .ok_or_else(|| InspectError::Expression {
                expr: expr.to_string(),
                reason: "No symbol in current context.".to_string(),
            })
    }
}
