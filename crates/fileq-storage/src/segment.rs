//! Segment Store - Append-Only `.dat`/`.index` Pairs
//!
//! A topic's messages live in size-bounded segments. Each segment is a pair
//! of files named by the zero-padded start sequence ("stem"):
//!
//! ```text
//! 0000000000.dat     framed records, back to back (see fileq_core::record)
//! 0000000000.index   one i32 per record: byte offset past the END of it
//! ```
//!
//! Record `i` of a segment therefore spans `index[i-1] .. index[i]` (with
//! `index[-1] = 0`), and the record count is simply `index_size / 4`. The
//! `partitionIndex` file is the manifest: a dense ascending array of i32
//! stems, one per segment.
//!
//! ## Write protocol
//!
//! The exclusive lock on the current segment's `.index` file is the
//! serialization point for all writers of a topic; the `.dat` lock is
//! always taken after it. A batch is encoded into one `.dat` buffer and one
//! `.index` buffer and each is written with a single call, so concurrent
//! batches land contiguously in sequence space. Data is written at the
//! *index-derived* tail (the last `.index` entry), not at the `.dat` EOF:
//! a crashed writer can leave orphan bytes past the index-visible tail, and
//! writing at the derived tail overwrites them so record `i` always ends
//! exactly at `index[i]`. If the `.index` write fails after the `.dat`
//! write succeeded, the data file is truncated back to the derived tail -
//! a record exists exactly when its index entry does.
//!
//! ## Rotation, saturation, repair
//!
//! [`current_partition`] picks the segment a batch appends into: it seeds an
//! empty topic with stem 0, rotates to a new stem when the live `.dat`
//! exceeds the configured size, and - when the next batch would push the
//! sequence counter past the generation capacity - creates the `lock`
//! sentinel plus the successor directory `<topic>_<n+1>` and directs the
//! saturating batch there. A missing or torn `partitionIndex` is rebuilt
//! from the `<stem>.index` files actually on disk.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use fileq_core::codec::{pack_i32, read_i32_at, unpack_i32};
use fileq_core::record::{encode_record, RecordHeader, RECORD_HEADER_LEN};
use fileq_core::RecordError;
use tracing::{debug, info, warn};

use crate::cache::{HandleCache, LockGuard, OpenMode, Pool, Role};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::generation;
use crate::layout::{self, TopicDir};

/// Bounded spin on the generation-saturated sentinel: 500 polls, 10 ms apart.
const SENTINEL_SPIN: usize = 500;
const SENTINEL_SPIN_INTERVAL: Duration = Duration::from_millis(10);

/// Transient read failures are retried while a writer holds the write lock.
const READ_RETRIES: usize = 500;
const READ_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Where a batch is about to be appended: a topic (or successor) directory
/// plus the segment stem inside it.
#[derive(Debug)]
pub(crate) struct AppendTarget {
    pub dir: TopicDir,
    pub stem: i32,
}

/// Append a batch of payloads to `topic`, selecting (and possibly creating)
/// the segment first.
pub(crate) fn append(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
    payloads: &[Bytes],
) -> Result<()> {
    if payloads.is_empty() {
        return Ok(());
    }
    let target = current_partition(cache, cfg, topic, payloads.len() as i32)?;
    append_into(cache, topic, &target, payloads)
}

/// Append a batch into an already-selected segment.
fn append_into(
    cache: &mut HandleCache,
    topic: &str,
    target: &AppendTarget,
    payloads: &[Bytes],
) -> Result<()> {
    let index_path = target.dir.index(target.stem);
    let dat_path = target.dir.dat(target.stem);

    // The .index lock is the primary serialization point; take it first.
    let (mut index_lock, index_len) = {
        let index = cache.get(Pool::Write, topic, Role::Index, &index_path, OpenMode::APPEND)?;
        let lock = LockGuard::exclusive(index)?;
        let len = lock.file().metadata()?.len();
        (lock, len)
    };
    if index_len % 4 != 0 {
        return Err(Error::IndexMisaligned {
            path: index_path,
            size: index_len,
        });
    }
    let base_seq = target.stem + (index_len / 4) as i32;
    let dat_tail = if index_len == 0 {
        0
    } else {
        read_i32_at(index_lock.file_mut(), index_len - 4)? as u64
    };

    let mut dat_lock = {
        let dat = cache.get(Pool::Write, topic, Role::Data, &dat_path, OpenMode::READ_WRITE)?;
        LockGuard::exclusive(dat)?
    };

    let mut dat_buf = Vec::new();
    let mut index_buf = Vec::with_capacity(payloads.len() * 4);
    let now = layout::unix_now();
    let mut end = dat_tail;
    for (i, payload) in payloads.iter().enumerate() {
        end += encode_record(&mut dat_buf, base_seq + i as i32, now, payload) as u64;
        index_buf.extend_from_slice(&pack_i32(end as i32));
    }

    let dat = dat_lock.file_mut();
    dat.seek(SeekFrom::Start(dat_tail))?;
    dat.write_all(&dat_buf)?;
    if let Err(err) = index_lock.file_mut().write_all(&index_buf) {
        // Restore the invariant that a record exists iff its index entry
        // does; orphan data bytes would otherwise shadow the next batch.
        let _ = dat_lock.file_mut().set_len(dat_tail);
        warn!(topic, stem = target.stem, %err, "index append failed, truncated data file");
        return Err(err.into());
    }
    Ok(())
}

/// Select the segment the next `pad` messages append into.
pub(crate) fn current_partition(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
    pad: i32,
) -> Result<AppendTarget> {
    let dir = TopicDir::new(&cfg.folder, topic);
    fs::create_dir_all(dir.path()).map_err(|err| {
        Error::CreateFailed(format!("topic directory {}: {err}", dir.path().display()))
    })?;
    wait_for_sentinel_clear(&dir)?;

    let pidx_path = dir.partition_index();
    let mut lock = {
        let pidx = cache.get(
            Pool::Write,
            topic,
            Role::PartitionIndex,
            &pidx_path,
            OpenMode::READ_WRITE,
        )?;
        LockGuard::exclusive(pidx)?
    };

    let size = lock.file().metadata()?.len();
    let current_start = if size == 0 || size % 4 != 0 {
        // Missing, empty or torn manifest: rebuild it from the segment
        // files actually on disk. An empty topic seeds stem 0.
        let mut stems = scan_segment_stems(dir.path())?;
        if stems.is_empty() {
            stems.push(0);
        }
        if size != 0 {
            info!(topic, size, segments = stems.len(), "repaired torn partition index");
        }
        rewrite_entries(lock.file_mut(), &stems)?;
        *stems.last().expect("seeded above")
    } else {
        read_i32_at(lock.file_mut(), size - 4)?
    };

    if !dir.dat(current_start).exists() {
        return Ok(AppendTarget {
            dir,
            stem: current_start,
        });
    }

    let records = index_record_count(&dir, current_start)?;
    let last_seq = current_start as i64 + records;

    if last_seq + pad as i64 > cfg.label_size() as i64 {
        // Generation saturated. Block later writers, seed the successor and
        // direct this batch into it; a reader promotes the successor once
        // the live generation is drained.
        layout::touch(&dir.lock_sentinel())?;
        drop(lock);

        let label = generation::read_label(dir.path())?;
        let next = label + 1;
        let successor_path = layout::sibling_dir(&cfg.folder, topic, next);
        fs::create_dir_all(&successor_path).map_err(|err| {
            Error::CreateFailed(format!(
                "successor directory {}: {err}",
                successor_path.display()
            ))
        })?;
        let successor = TopicDir::from_path(successor_path);
        if !successor.label().exists() {
            fs::write(successor.label(), pack_i32(next))?;
        }
        if !successor.partition_index().exists() {
            fs::write(successor.partition_index(), pack_i32(0))?;
        }
        info!(topic, last_seq, generation = next, "generation saturated, writing into successor");
        return Ok(AppendTarget {
            dir: successor,
            stem: 0,
        });
    }

    let dat_size = fs::metadata(dir.dat(current_start))?.len();
    if dat_size > cfg.partition_size_bytes() {
        let stem = last_seq as i32;
        let pidx = lock.file_mut();
        pidx.seek(SeekFrom::End(0))?;
        pidx.write_all(&pack_i32(stem))?;
        debug!(topic, stem, dat_size, "rotating to new segment");
        return Ok(AppendTarget { dir, stem });
    }

    Ok(AppendTarget {
        dir,
        stem: current_start,
    })
}

fn wait_for_sentinel_clear(dir: &TopicDir) -> Result<()> {
    let sentinel = dir.lock_sentinel();
    if !sentinel.exists() {
        return Ok(());
    }
    for _ in 0..SENTINEL_SPIN {
        thread::sleep(SENTINEL_SPIN_INTERVAL);
        if !sentinel.exists() {
            return Ok(());
        }
    }
    Err(Error::CreateFailed(format!(
        "rollover sentinel {} still present after {} polls",
        sentinel.display(),
        SENTINEL_SPIN,
    )))
}

fn index_record_count(dir: &TopicDir, stem: i32) -> Result<i64> {
    let path = dir.index(stem);
    match fs::metadata(&path) {
        Ok(meta) => {
            let size = meta.len();
            if size % 4 != 0 {
                return Err(Error::IndexMisaligned { path, size });
            }
            Ok((size / 4) as i64)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err.into()),
    }
}

fn scan_segment_stems(dir: &Path) -> Result<Vec<i32>> {
    let mut stems = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(stem) = name.strip_suffix(".index") else {
            continue;
        };
        if stem.len() == 10 && stem.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(value) = stem.parse::<i32>() {
                stems.push(value);
            }
        }
    }
    stems.sort_unstable();
    Ok(stems)
}

fn rewrite_entries(file: &mut File, stems: &[i32]) -> Result<()> {
    let mut buf = Vec::with_capacity(stems.len() * 4);
    for stem in stems {
        buf.extend_from_slice(&pack_i32(*stem));
    }
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&buf)?;
    Ok(())
}

/// Load the manifest, repairing it from a directory scan when it is
/// missing or torn. An absent topic directory reads as no segments.
pub(crate) fn partition_entries(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
) -> Result<Vec<i32>> {
    let dir = TopicDir::new(&cfg.folder, topic);
    if !dir.path().is_dir() {
        return Ok(Vec::new());
    }
    let path = dir.partition_index();
    match fs::metadata(&path) {
        Ok(meta) if meta.len() > 0 && meta.len() % 4 == 0 => {
            let file = cache.get(Pool::Read, topic, Role::PartitionIndex, &path, OpenMode::READ)?;
            read_entries(file)
        }
        Ok(_) => repair_partition_index(cache, topic, &dir),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            repair_partition_index(cache, topic, &dir)
        }
        Err(err) => Err(err.into()),
    }
}

fn read_entries(file: &mut File) -> Result<Vec<i32>> {
    let mut raw = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut raw)?;
    if raw.len() % 4 != 0 {
        // Torn since the metadata check; let the caller's next query repair.
        raw.truncate(raw.len() - raw.len() % 4);
    }
    Ok(raw
        .chunks_exact(4)
        .map(|c| unpack_i32(c.try_into().expect("4-byte chunk")))
        .collect())
}

fn repair_partition_index(
    cache: &mut HandleCache,
    topic: &str,
    dir: &TopicDir,
) -> Result<Vec<i32>> {
    let path = dir.partition_index();
    let mut lock = {
        let pidx = cache.get(
            Pool::Write,
            topic,
            Role::PartitionIndex,
            &path,
            OpenMode::READ_WRITE,
        )?;
        LockGuard::exclusive(pidx)?
    };
    // Another process may have repaired while we waited for the lock.
    let size = lock.file().metadata()?.len();
    if size > 0 && size % 4 == 0 {
        return read_entries(lock.file_mut());
    }
    let stems = scan_segment_stems(dir.path())?;
    rewrite_entries(lock.file_mut(), &stems)?;
    info!(topic, segments = stems.len(), "rebuilt partition index from directory scan");
    Ok(stems)
}

/// Index into `entries` of the segment holding `offset`: the largest stem
/// `<= offset`. `None` when there is no such segment.
fn locate_index(entries: &[i32], offset: i32) -> Option<usize> {
    match entries.binary_search(&offset) {
        Ok(i) => Some(i),
        Err(0) => None,
        Err(i) => Some(i - 1),
    }
}

/// Read the single record at absolute sequence `seq`, if present.
pub(crate) fn read_at(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
    seq: i32,
) -> Result<Option<(RecordHeader, Bytes)>> {
    let entries = partition_entries(cache, cfg, topic)?;
    let Some(idx) = locate_index(&entries, seq) else {
        return Ok(None);
    };
    read_record(cache, cfg, topic, entries[idx], seq)
}

/// Non-destructive range read starting at `offset`, crossing segment
/// boundaries, up to `limit` records.
pub(crate) fn read_range(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
    offset: i32,
    limit: usize,
) -> Result<Vec<(i32, RecordHeader, Bytes)>> {
    let mut out = Vec::new();
    if limit == 0 {
        return Ok(out);
    }
    let entries = partition_entries(cache, cfg, topic)?;
    let Some(mut idx) = locate_index(&entries, offset) else {
        return Ok(out);
    };
    let mut seq = offset;
    while out.len() < limit {
        match read_record(cache, cfg, topic, entries[idx], seq)? {
            Some((header, payload)) => {
                out.push((seq, header, payload));
                seq += 1;
            }
            None => {
                // Past this segment's tail: fan out into the next one, if
                // the manifest says it starts at or before this sequence.
                if idx + 1 < entries.len() && entries[idx + 1] <= seq {
                    idx += 1;
                } else {
                    break;
                }
            }
        }
    }
    Ok(out)
}

/// One record by (stem, seq), with the transient-read retry loop.
fn read_record(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
    stem: i32,
    seq: i32,
) -> Result<Option<(RecordHeader, Bytes)>> {
    let dir = TopicDir::new(&cfg.folder, topic);
    let mut attempt = 0;
    loop {
        match try_read_record(cache, &dir, topic, stem, seq) {
            Err(Error::Io(err)) if attempt + 1 < READ_RETRIES => {
                if attempt == 0 {
                    debug!(topic, stem, seq, %err, "transient read failure, retrying");
                }
                attempt += 1;
                thread::sleep(READ_RETRY_INTERVAL);
            }
            other => return other,
        }
    }
}

fn try_read_record(
    cache: &mut HandleCache,
    dir: &TopicDir,
    topic: &str,
    stem: i32,
    seq: i32,
) -> Result<Option<(RecordHeader, Bytes)>> {
    let index_path = dir.index(stem);
    let index_size = match fs::metadata(&index_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if index_size % 4 != 0 {
        return Err(Error::IndexMisaligned {
            path: index_path,
            size: index_size,
        });
    }
    let pos = (seq as i64) - (stem as i64);
    if pos < 0 || pos >= (index_size / 4) as i64 {
        return Ok(None);
    }

    let (start, end) = {
        let index = cache.get(Pool::Read, topic, Role::Index, &index_path, OpenMode::READ)?;
        let start = if pos == 0 {
            0
        } else {
            read_i32_at(index, (pos as u64 - 1) * 4)? as i64
        };
        let end = read_i32_at(index, pos as u64 * 4)? as i64;
        (start, end)
    };
    if end < start + RECORD_HEADER_LEN as i64 {
        return Err(Error::Record(RecordError::Truncated {
            needed: RECORD_HEADER_LEN,
            available: (end - start).max(0) as usize,
        }));
    }

    let dat_path = dir.dat(stem);
    if !dat_path.exists() {
        return Err(Error::SegmentMissing { stem });
    }
    let dat = cache.get(Pool::Read, topic, Role::Data, &dat_path, OpenMode::READ)?;
    let mut frame = vec![0u8; (end - start) as usize];
    dat.seek(SeekFrom::Start(start as u64))?;
    dat.read_exact(&mut frame)?;

    let header = RecordHeader::parse(&frame)?;
    let payload = Bytes::from(frame).slice(RECORD_HEADER_LEN..);
    header.verify(seq, &payload)?;
    Ok(Some((header, payload)))
}

/// Sequence number one past the last record of the live generation.
pub(crate) fn max_offset_in_gen(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
) -> Result<i64> {
    let entries = partition_entries(cache, cfg, topic)?;
    let Some(&last) = entries.last() else {
        return Ok(0);
    };
    let dir = TopicDir::new(&cfg.folder, topic);
    Ok(last as i64 + index_record_count(&dir, last)?)
}
