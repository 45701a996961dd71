//! Storage Error Types
//!
//! Every fallible engine operation returns `Result<T>` aliased to
//! `Result<T, Error>`. The variants collapse into three kinds, which is the
//! contract callers retry against:
//!
//! - **Io** — a required file operation (open, read, write, seek, rename,
//!   unlink, lock) failed for a surfaced but potentially transient reason.
//! - **File** — a structural invariant on disk is violated: index size not a
//!   multiple of 4, record sequence/CRC/length mismatch, a `.dat` missing
//!   for an indexed stem, or an unparseable delay log.
//! - **Create** — a directory could not be created, or a sentinel wait
//!   exhausted its retry budget (another process is stuck holding a marker).
//!
//! Write paths retry `File` errors with a full handle-cache reset; read
//! paths retry `Io` errors with a short backoff. `Create` is never retried
//! internally - by the time it surfaces, the bounded spin already happened.

use std::path::PathBuf;

use fileq_core::RecordError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Record(#[from] RecordError),

    #[error("index file {path} has size {size}, not a multiple of 4")]
    IndexMisaligned { path: PathBuf, size: u64 },

    #[error("segment data file missing for stem {stem}")]
    SegmentMissing { stem: i32 },

    #[error("delay log corrupt: {0}")]
    DelayCorrupt(String),

    #[error("create failed: {0}")]
    CreateFailed(String),
}

/// The three caller-visible failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    File,
    Create,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::CreateFailed(_) => ErrorKind::Create,
            Error::Record(_)
            | Error::IndexMisaligned { .. }
            | Error::SegmentMissing { .. }
            | Error::DelayCorrupt(_) => ErrorKind::File,
        }
    }
}
