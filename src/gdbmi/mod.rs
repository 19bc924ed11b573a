//! gdb backed implementation of [`Inspector`].
//!
//! Drives an external gdb over its machine interface: one command out, a
//! token-matched result record back. Attaching stops the target; dropping
//! the inspector detaches by asking gdb to exit, with a kill as the
//! fallback so a wedged gdb never outlives the run.

pub mod parser;

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, trace, warn};

use crate::gdbmi::parser::{parse_line, MiRecord, MiValue};
use crate::inspect::{Frame, InspectError, Inspector, ThreadInfo};

/// How long to give gdb to exit on its own before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Failures below the [`Inspector`] error taxonomy.
enum MiError {
    /// The gdb process or its pipes are gone.
    Transport(String),
    /// gdb answered `^error` to one command.
    Command(String),
}

pub struct GdbInspector {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    token: u64,
    /// Thread made current by the last successful `focus_thread`.
    focused: Option<u32>,
    /// Stack depth of the focused thread, queried lazily.
    depth: Option<u32>,
}

impl GdbInspector {
    /// Attach to a running process. gdb stops every thread of the target
    /// for as long as the inspector lives.
    pub fn attach_pid(gdb: &str, pid: u32) -> Result<Self> {
        let mut cmd = Command::new(gdb);
        cmd.args(["-nx", "-q", "--interpreter=mi"])
            .arg("-p")
            .arg(pid.to_string());
        Self::spawn(cmd)
    }

    /// Open a core dump with the executable that produced it.
    pub fn open_core(gdb: &str, exe: &Path, core: &Path) -> Result<Self> {
        let mut cmd = Command::new(gdb);
        cmd.args(["-nx", "-q", "--interpreter=mi"])
            .arg(exe)
            .arg(core);
        Self::spawn(cmd)
    }

    fn spawn(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().context("spawning gdb")?;
        let stdin = child.stdin.take().context("gdb stdin not captured")?;
        let stdout = BufReader::new(child.stdout.take().context("gdb stdout not captured")?);
        let mut inspector = GdbInspector {
            child,
            stdin,
            stdout,
            token: 0,
            focused: None,
            depth: None,
        };
        inspector
            .drain_to_prompt()
            .map_err(|e| anyhow::anyhow!("gdb did not come up: {}", describe(e)))?;
        Ok(inspector)
    }

    /// Read output lines until the ready prompt, logging whatever gdb has
    /// to say on the way.
    fn drain_to_prompt(&mut self) -> std::result::Result<(), MiError> {
        loop {
            match self.read_record()? {
                Some(MiRecord::Prompt) => return Ok(()),
                Some(record) => trace!("gdb startup: {:?}", record),
                None => {}
            }
        }
    }

    fn read_record(&mut self) -> std::result::Result<Option<MiRecord>, MiError> {
        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| MiError::Transport(format!("reading from gdb: {}", e)))?;
        if n == 0 {
            return Err(MiError::Transport("gdb exited unexpectedly".to_string()));
        }
        let line = line.trim_end();
        if line.is_empty() {
            return Ok(None);
        }
        match parse_line(line) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("ignoring unparsable gdb output {:?}: {}", line, e);
                Ok(None)
            }
        }
    }

    /// Send one MI command and return the results of its `^done` record.
    fn command(&mut self, cmd: &str) -> std::result::Result<Vec<(String, MiValue)>, MiError> {
        self.token += 1;
        let token = self.token;
        trace!("gdb <- {}{}", token, cmd);
        writeln!(self.stdin, "{}{}", token, cmd)
            .and_then(|_| self.stdin.flush())
            .map_err(|e| MiError::Transport(format!("writing to gdb: {}", e)))?;
        let mut outcome = None;
        loop {
            match self.read_record()? {
                Some(MiRecord::Prompt) => {
                    if let Some(outcome) = outcome.take() {
                        return outcome;
                    }
                }
                Some(MiRecord::Result {
                    token: Some(t),
                    class,
                    results,
                }) if t == token => {
                    trace!("gdb -> ^{}", class);
                    outcome = Some(match class.as_str() {
                        "error" => {
                            let msg = results
                                .iter()
                                .find(|(name, _)| name == "msg")
                                .and_then(|(_, value)| value.as_const())
                                .unwrap_or("unknown error")
                                .to_string();
                            Err(MiError::Command(msg))
                        }
                        "exit" => Err(MiError::Transport("gdb is exiting".to_string())),
                        _ => Ok(results),
                    });
                }
                Some(MiRecord::Result { class, .. }) => {
                    debug!("dropping stray result record ^{}", class);
                }
                Some(MiRecord::Async { kind, class, .. }) => {
                    debug!("gdb async {}{}", kind, class);
                }
                Some(MiRecord::Stream { text, .. }) => trace!("gdb says: {}", text.trim_end()),
                None => {}
            }
        }
    }

    fn fatal(e: MiError) -> InspectError {
        InspectError::Fatal(describe(e))
    }

    fn thread_unreadable(&self, e: MiError) -> InspectError {
        match e {
            MiError::Transport(msg) => InspectError::Fatal(msg),
            MiError::Command(msg) => InspectError::ThreadUnreadable {
                id: self.focused.unwrap_or(0),
                reason: msg,
            },
        }
    }

    fn expression(e: MiError, expr: &str) -> InspectError {
        match e {
            MiError::Transport(msg) => InspectError::Fatal(msg),
            MiError::Command(msg) => InspectError::Expression {
                expr: expr.to_string(),
                reason: msg,
            },
        }
    }

    fn stack_depth(&mut self) -> std::result::Result<u32, MiError> {
        if let Some(depth) = self.depth {
            return Ok(depth);
        }
        let results = self.command("-stack-info-depth")?;
        let depth = find_const(&results, "depth")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| MiError::Command("no depth in -stack-info-depth".to_string()))?;
        self.depth = Some(depth);
        Ok(depth)
    }
}

impl Inspector for GdbInspector {
    fn list_modules(&mut self) -> Result<Vec<String>, InspectError> {
        let results = self
            .command("-file-list-shared-libraries")
            .map_err(Self::fatal)?;
        let mut modules = Vec::new();
        if let Some(MiValue::List(items)) = lookup(&results, "shared-libraries") {
            for item in items {
                let entry = item
                    .lookup("library")
                    .unwrap_or(item);
                if let Some(name) = entry
                    .field("host-name")
                    .or_else(|| entry.field("target-name"))
                    .or_else(|| entry.field("id"))
                {
                    modules.push(name.to_string());
                }
            }
        }
        Ok(modules)
    }

    fn list_threads(&mut self) -> Result<Vec<ThreadInfo>, InspectError> {
        let results = self.command("-thread-info").map_err(Self::fatal)?;
        let items = match lookup(&results, "threads") {
            Some(MiValue::List(items)) => items,
            _ => {
                return Err(InspectError::Fatal(
                    "no thread list in -thread-info".to_string(),
                ))
            }
        };
        let mut threads = Vec::new();
        for item in items {
            let id = match item.field("id").and_then(|s| s.parse().ok()) {
                Some(id) => id,
                None => {
                    warn!("thread record without a usable id: {:?}", item);
                    continue;
                }
            };
            threads.push(ThreadInfo {
                id,
                name: item.field("name").map(str::to_string),
            });
        }
        Ok(threads)
    }

    fn focus_thread(&mut self, id: u32) -> Result<(), InspectError> {
        self.focused = Some(id);
        self.depth = None;
        self.command(&format!("-thread-select {}", id))
            .map_err(|e| self.thread_unreadable(e))?;
        Ok(())
    }

    fn newest_frame(&mut self) -> Result<Frame, InspectError> {
        let results = self
            .command("-stack-info-frame")
            .map_err(|e| self.thread_unreadable(e))?;
        let frame = lookup(&results, "frame").ok_or_else(|| InspectError::ThreadUnreadable {
            id: self.focused.unwrap_or(0),
            reason: "no frame in -stack-info-frame".to_string(),
        })?;
        Ok(parse_frame(frame))
    }

    fn older_frame(&mut self, frame: &Frame) -> Result<Option<Frame>, InspectError> {
        let depth = self.stack_depth().map_err(|e| self.thread_unreadable(e))?;
        let level = frame.level + 1;
        if level >= depth {
            return Ok(None);
        }
        let results = self
            .command(&format!("-stack-list-frames {} {}", level, level))
            .map_err(|e| self.thread_unreadable(e))?;
        let stack = match lookup(&results, "stack") {
            Some(MiValue::List(items)) => items,
            _ => {
                return Err(InspectError::ThreadUnreadable {
                    id: self.focused.unwrap_or(0),
                    reason: "no stack in -stack-list-frames".to_string(),
                })
            }
        };
        let frame = stack
            .first()
            .map(|item| item.lookup("frame").unwrap_or(item));
        Ok(frame.map(parse_frame))
    }

    fn eval_in_frame(&mut self, frame: &Frame, expr: &str) -> Result<String, InspectError> {
        self.command(&format!("-stack-select-frame {}", frame.level))
            .map_err(|e| Self::expression(e, expr))?;
        let results = self
            .command(&format!("-data-evaluate-expression {}", quote(expr)))
            .map_err(|e| Self::expression(e, expr))?;
        find_const(&results, "value")
            .map(str::to_string)
            .ok_or_else(|| InspectError::Expression {
                expr: expr.to_string(),
                reason: "no value in -data-evaluate-expression".to_string(),
            })
    }
}

impl Drop for GdbInspector {
    fn drop(&mut self) {
        // Ask nicely first so an attached target gets detached.
        let _ = writeln!(self.stdin, "-gdb-exit").and_then(|_| self.stdin.flush());
        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    sleep(Duration::from_millis(50));
                }
                Err(_) => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn describe(e: MiError) -> String {
    match e {
        MiError::Transport(msg) => msg,
        MiError::Command(msg) => msg,
    }
}

fn lookup<'a>(results: &'a [(String, MiValue)], name: &str) -> Option<&'a MiValue> {
    results
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

fn find_const<'a>(results: &'a [(String, MiValue)], name: &str) -> Option<&'a str> {
    lookup(results, name).and_then(MiValue::as_const)
}

fn parse_frame(value: &MiValue) -> Frame {
    let func = value
        .field("func")
        .filter(|f| *f != "??")
        .map(str::to_string);
    let pc = value
        .field("addr")
        .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .unwrap_or(0);
    Frame {
        level: value
            .field("level")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        func,
        pc,
        file: value.field("file").map(str::to_string),
        line: value.field("line").and_then(|s| s.parse().ok()),
    }
}

/// Quote `expr` as an MI c-string argument.
fn quote(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len() + 2);
    out.push('"');
    for c in expr.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
