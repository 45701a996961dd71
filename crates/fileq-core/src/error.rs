//! Record-Level Error Types
//!
//! Structural failures detected while decoding a framed record. These are
//! distinct from I/O errors: an I/O error means the bytes could not be read,
//! a `RecordError` means the bytes were read but do not form a valid record.
//!
//! The storage layer maps every variant here onto its `FileError` kind, so a
//! `RecordError` always signals on-disk corruption (or a reader pointed at
//! the wrong position), never a transient condition worth retrying.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecordError>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("CRC mismatch: header has {stored}, payload hashes to {computed}")]
    CrcMismatch { stored: i32, computed: i32 },

    #[error("sequence mismatch: expected {expected}, record header has {found}")]
    SequenceMismatch { expected: i32, found: i32 },

    #[error("length mismatch: header says {header} bytes, frame holds {actual}")]
    LengthMismatch { header: i32, actual: usize },

    #[error("truncated record: needed {needed} bytes, only {available} present")]
    Truncated { needed: usize, available: usize },
}
