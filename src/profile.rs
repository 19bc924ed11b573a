//! Symbol landmarks for the ganesha generation being inspected.
//!
//! The functions and expressions that matter moved between server
//! generations, so the profile is picked by probing the loaded modules and
//! every name can be overridden from a JSON file for builds we have never
//! seen.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::RegexBuilder;
use serde::Deserialize;

/// Role a frame's function plays in the contention analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landmark {
    /// The read entry point under which a lock is held.
    ReadPrimitive,
    /// The write entry point. Carried for symmetry, classifies nothing
    /// today.
    WritePrimitive,
    /// The cache-inode function that takes the lock.
    LockHolder,
    /// pthread's blocking write acquisition.
    BlockingWrite,
    /// pthread's blocking read acquisition.
    BlockingRead,
    /// The protocol-level read operation.
    ReadOp,
    /// The protocol-level write operation.
    WriteOp,
    /// The worker thread entry point.
    WorkerEntry,
}

/// The symbol names and expressions for one server generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionProfile {
    pub generation: &'static str,
    pub read_primitive: String,
    pub write_primitive: String,
    pub lock_holder: String,
    pub lock_ptr_expr: String,
    pub lock_state_expr: String,
    pub blocking_write: String,
    pub blocking_read: String,
    pub read_op: String,
    pub write_op: String,
    pub worker_entry: String,
}

/// Library name that marks the modern generation, matched case-insensitively
/// against the loaded module list.
const MODERN_MARKER: &str = "libfsal";

impl VersionProfile {
    /// Profile for the 2.x servers.
    pub fn modern() -> Self {
        VersionProfile {
            generation: "2.0",
            read_primitive: "FSAL_read".to_string(),
            write_primitive: "FSAL_write".to_string(),
            lock_holder: "cache_inode_rdwr".to_string(),
            lock_ptr_expr: "&entry->content_lock".to_string(),
            lock_state_expr: "entry->content_lock".to_string(),
            blocking_write: "pthread_rwlock_wrlock".to_string(),
            blocking_read: "pthread_rwlock_rdlock".to_string(),
            read_op: "nfs_Read".to_string(),
            write_op: "nfs_Write".to_string(),
            worker_entry: "worker_run".to_string(),
        }
    }

    /// Profile for the 1.5 servers. Identical landmarks except the worker
    /// entry point.
    pub fn legacy() -> Self {
        VersionProfile {
            generation: "1.5",
            worker_entry: "worker_thread".to_string(),
            ..Self::modern()
        }
    }

    /// Pick the profile for the inspected target by probing its loaded
    /// modules for the modern FSAL library.
    pub fn detect(modules: &[String]) -> Result<Self> {
        let marker = RegexBuilder::new(MODERN_MARKER)
            .case_insensitive(true)
            .build()
            .context("building module marker regex")?;
        let profile = if modules.iter().any(|m| marker.is_match(m)) {
            Self::modern()
        } else {
            Self::legacy()
        };
        println!("Configuring for ganesha {}", profile.generation);
        Ok(profile)
    }

    /// The landmark role of `func`, if it is one we track.
    pub fn classify(&self, func: &str) -> Option<Landmark> {
        if func == self.read_primitive {
            Some(Landmark::ReadPrimitive)
        } else if func == self.write_primitive {
            Some(Landmark::WritePrimitive)
        } else if func == self.lock_holder {
            Some(Landmark::LockHolder)
        } else if func == self.blocking_write {
            Some(Landmark::BlockingWrite)
        } else if func == self.blocking_read {
            Some(Landmark::BlockingRead)
        } else if func == self.read_op {
            Some(Landmark::ReadOp)
        } else if func == self.write_op {
            Some(Landmark::WriteOp)
        } else if func == self.worker_entry {
            Some(Landmark::WorkerEntry)
        } else {
            None
        }
    }

    /// Replace any landmark that `overrides` names.
    pub fn apply_overrides(&mut self, overrides: &ProfileOverrides) {
        let fields = [
            (&mut self.read_primitive, &overrides.read_primitive),
            (&mut self.write_primitive, &overrides.write_primitive),
            (&mut self.lock_holder, &overrides.lock_holder),
            (&mut self.lock_ptr_expr, &overrides.lock_ptr_expr),
            (&mut self.lock_state_expr, &overrides.lock_state_expr),
            (&mut self.blocking_write, &overrides.blocking_write),
            (&mut self.blocking_read, &overrides.blocking_read),
            (&mut self.read_op, &overrides.read_op),
            (&mut self.write_op, &overrides.write_op),
            (&mut self.worker_entry, &overrides.worker_entry),
        ];
        for (slot, value) in fields {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
    }
}

/// Per-site overrides of the landmark table, loaded from a JSON file.
/// Absent keys keep the detected profile's value.
#[derive(Debug, Default, Deserialize)]
pub struct ProfileOverrides {
    pub read_primitive: Option<String>,
    pub write_primitive: Option<String>,
    pub lock_holder: Option<String>,
    pub lock_ptr_expr: Option<String>,
    pub lock_state_expr: Option<String>,
    pub blocking_write: Option<String>,
    pub blocking_read: Option<String>,
    pub read_op: Option<String>,
    pub write_op: Option<String>,
    pub worker_entry: Option<String>,
}

impl ProfileOverrides {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading profile config {}", path.display()))?;
        let overrides: ProfileOverrides = serde_json::from_str(&contents)
            .with_context(|| format!("parsing profile config {}", path.display()))?;
        Ok(overrides)
    }
}
