//! Consumer Cursor
//!
//! The `current` file holds one i32: the next sequence to consume in the
//! live generation. `pop` reads it under an exclusive lock, fetches the
//! record, and only then overwrites it with `sequence + 1` - several
//! processes sharing a cursor therefore each see a disjoint subset and
//! together cover the sequence space exactly once. An absent or short file
//! reads as position 0.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use fileq_core::codec::{pack_i32, read_i32_at};

use crate::cache::{HandleCache, OpenMode, Pool, Role};
use crate::config::QueueConfig;
use crate::error::Result;
use crate::layout::TopicDir;

/// Read the cursor through an already-locked handle.
pub(crate) fn read_position(file: &mut File) -> Result<i32> {
    if file.metadata()?.len() < 4 {
        return Ok(0);
    }
    Ok(read_i32_at(file, 0)?)
}

/// Overwrite the cursor through an already-locked handle.
pub(crate) fn write_position(file: &mut File, seq: i32) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&pack_i32(seq))?;
    Ok(())
}

/// Lock-free cursor read for the offset queries.
pub(crate) fn load(cache: &mut HandleCache, cfg: &QueueConfig, topic: &str) -> Result<i32> {
    let dir = TopicDir::new(&cfg.folder, topic);
    let path = dir.current();
    if !path.exists() {
        return Ok(0);
    }
    let file = cache.get(Pool::Read, topic, Role::Current, &path, OpenMode::READ)?;
    read_position(file)
}
