//! fileq Storage Engine
//!
//! A durable, file-backed FIFO message queue: multiple named topics,
//! immediate and time-delayed messages, crash-safe appends under
//! multi-process concurrency, and unbounded lifetime through generational
//! rollover. The engine is a synchronous library - every bit of
//! coordination between concurrent producers and consumers happens through
//! OS advisory file locks, marker files and atomic renames, so any number
//! of processes can share one queue root.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────── FileQueue (façade) ─────────────────────────┐
//! │                                                                       │
//! │  push ─────────────► segment store     .dat/.index pairs, rotation,   │
//! │                      ▲                 partitionIndex manifest        │
//! │  push_delayed ──► delay log            delayMessage + promotion +     │
//! │                      │                 compaction                     │
//! │  pop ◄────────── cursor                `current`, advanced under an   │
//! │                      │                 exclusive lock                 │
//! │  (saturation) ◄─ generation manager    <topic>_<n> rollover chain     │
//! │                                                                       │
//! │  handle cache: (topic, role) → open file, read/write pools            │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use fileq_storage::{FileQueue, QueueConfig};
//! use std::time::Duration;
//!
//! let mut queue = FileQueue::open(QueueConfig::new("/var/lib/myapp/queue"))?;
//!
//! queue.push("emails", br#"{"to":"a@example.com"}"#.as_slice())?;
//! queue.push_delayed("emails", b"retry later".as_slice(), Duration::from_secs(60))?;
//!
//! while let Some(message) = queue.pop("emails")? {
//!     handle(&message.payload);
//! }
//! ```

pub mod config;
pub mod error;
pub mod queue;

mod cache;
mod cursor;
mod delay;
mod generation;
mod layout;
mod segment;

pub use config::QueueConfig;
pub use error::{Error, ErrorKind, Result};
pub use fileq_core::Message;
pub use queue::{FileQueue, DEFAULT_TOPIC};
