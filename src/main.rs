use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use log::debug;

use lockwalk::backtrace::BacktraceVisitor;
use lockwalk::contention::ContentionVisitor;
use lockwalk::gdbmi::GdbInspector;
use lockwalk::inspect::Inspector;
use lockwalk::profile::{ProfileOverrides, VersionProfile};
use lockwalk::walk::walk_threads;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Report which threads are fighting over cache-inode rwlocks.
    Contention,
    /// Dump every thread's backtrace.
    Backtrace,
}

#[derive(Debug, Parser)]
struct Command {
    /// What to report about the stopped server.
    #[arg(value_enum)]
    mode: Mode,
    /// Attach to a running process.
    #[arg(short, long, conflicts_with_all = ["core", "exe"])]
    pid: Option<u32>,
    /// Open a core dump instead of attaching.
    #[arg(long, requires = "exe")]
    core: Option<PathBuf>,
    /// Executable that produced the core dump.
    #[arg(long, requires = "core")]
    exe: Option<PathBuf>,
    /// gdb binary to drive.
    #[arg(long, default_value = "gdb")]
    gdb: String,
    /// JSON file overriding individual symbol landmarks.
    #[arg(long)]
    profile_config: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

fn open_target(opts: &Command) -> Result<GdbInspector> {
    if let Some(pid) = opts.pid {
        return GdbInspector::attach_pid(&opts.gdb, pid);
    }
    if let (Some(core), Some(exe)) = (&opts.core, &opts.exe) {
        return GdbInspector::open_core(&opts.gdb, exe, core);
    }
    bail!("specify either --pid or --core with --exe");
}

fn resolve_profile(inspector: &mut dyn Inspector, opts: &Command) -> Result<VersionProfile> {
    let modules = inspector.list_modules()?;
    let mut profile = VersionProfile::detect(&modules)?;
    if let Some(path) = &opts.profile_config {
        let overrides = ProfileOverrides::from_file(path)?;
        profile.apply_overrides(&overrides);
    }
    Ok(profile)
}

fn contention(inspector: &mut dyn Inspector, opts: &Command) -> Result<()> {
    let profile = resolve_profile(inspector, opts)?;
    println!("Looking at threads waiting on cache-inode rwlocks");
    let mut visitor = ContentionVisitor::new(profile);
    let stats = walk_threads(inspector, &mut visitor)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    visitor.agg.render(&stats, &mut out)?;
    out.flush()?;
    Ok(())
}

fn backtrace(inspector: &mut dyn Inspector) -> Result<()> {
    println!("Printing backtrace");
    let stdout = io::stdout();
    let mut visitor = BacktraceVisitor::new(stdout.lock());
    walk_threads(inspector, &mut visitor)?;
    visitor.finish()?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Command::parse();
    let default_level = if opts.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut inspector = open_target(&opts)?;
    debug!("gdb session up");
    match opts.mode {
        Mode::Contention => contention(&mut inspector, &opts),
        Mode::Backtrace => backtrace(&mut inspector),
    }
}
