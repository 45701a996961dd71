//! Delay Log - Time-Deferred Messages
//!
//! Delayed messages are appended to a per-topic `delayMessage` file in
//! arrival order and only moved ("promoted") into the segment store once
//! they mature. The file starts with a 4-byte `valid_start` header; records
//! before that offset are tombstoned copies of already-promoted data:
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────────┐
//! │ valid_start  │ due:i32 | len:i32 | payload  (repeated)  │
//! │ i32 LE, >= 4 │ live records start at valid_start        │
//! └──────────────┴─────────────────────────────────────────┘
//! ```
//!
//! ## Promotion
//!
//! [`promote`] runs at the start of every pop and length query. Under the
//! log's exclusive lock it replays any `delayRead` spillover from a prior
//! pass, scans the live tail, batch-appends everything already due into the
//! segment store, advances `valid_start` past what it consumed, and parks
//! the not-yet-due remainder in `delayRead` (staged via `delayTemp`). A
//! partial header at EOF is a torn concurrent append and is left for the
//! next pass; a record whose payload bytes are missing is corruption.
//!
//! ## Compaction
//!
//! The tombstoned prefix is reclaimed once it outgrows the segment size cap,
//! and only outside the 02:00-06:00 local window: the live tail is copied
//! behind a fresh header into `delayRebuild`, the old log is unlinked and
//! the staged file renamed into place. While `delayRebuild` exists it doubles
//! as a barrier: writers back off (1 µs doubling to 8192 µs) instead of
//! appending to a log that is about to be replaced.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use chrono::Timelike;
use fileq_core::codec::{pack_i32, read_i32_at, unpack_i32};
use tracing::{debug, info, warn};

use crate::cache::{same_inode, HandleCache, LockGuard, OpenMode, Pool, Role};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::layout::{self, TopicDir};
use crate::segment;

/// Byte length of the `valid_start` header.
const DELAY_HEADER_LEN: u64 = 4;

/// Barrier backoff: 1 µs doubling 14 times, to 8192 µs.
const REBUILD_WAIT_DOUBLINGS: u32 = 14;

/// Attempts to swap the rebuilt log into place.
const RENAME_RETRIES: usize = 100;

/// Attempts to re-acquire the log when it is replaced beneath the lock.
const REOPEN_ATTEMPTS: usize = 4;

/// Append `(delay_seconds, payload)` items to the topic's delay log.
pub(crate) fn write(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
    items: &[(u32, Bytes)],
) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let dir = TopicDir::new(&cfg.folder, topic);
    fs::create_dir_all(dir.path()).map_err(|err| {
        Error::CreateFailed(format!("topic directory {}: {err}", dir.path().display()))
    })?;
    wait_for_rebuild_clear(cache, topic, &dir)?;

    let mut guard = lock_log(cache, topic, &dir, OpenMode::APPEND)?;
    let mut buf = Vec::new();
    if guard.file().metadata()?.len() == 0 {
        buf.extend_from_slice(&pack_i32(DELAY_HEADER_LEN as i32));
    }
    let now = layout::unix_now();
    for (delay, payload) in items {
        buf.extend_from_slice(&pack_i32(now.saturating_add(*delay as i32)));
        buf.extend_from_slice(&pack_i32(payload.len() as i32));
        buf.extend_from_slice(payload);
    }
    guard.file_mut().write_all(&buf)?;
    debug!(topic, count = items.len(), "appended delayed messages");
    Ok(())
}

/// Move every matured delay message into the segment store.
pub(crate) fn promote(cache: &mut HandleCache, cfg: &QueueConfig, topic: &str) -> Result<()> {
    let dir = TopicDir::new(&cfg.folder, topic);
    if !dir.path().is_dir() {
        return Ok(());
    }
    let msg_path = dir.delay_message();
    let worth_scanning = fs::metadata(&msg_path)
        .map(|m| m.len() > DELAY_HEADER_LEN)
        .unwrap_or(false);
    if !worth_scanning && !dir.delay_read().exists() && !dir.delay_rebuild().exists() {
        return Ok(());
    }

    // One restart is enough: a compaction (or an adopted interrupted one)
    // leaves a log whose second pass cannot need either again.
    for _pass in 0..2 {
        let mut guard = lock_log(cache, topic, &dir, OpenMode::READ_WRITE)?;

        if dir.delay_rebuild().exists() {
            if guard.file().metadata()?.len() == 0 {
                // A compaction died between unlink and rename; its staged
                // file is the authoritative log. Adopt it.
                drop(guard);
                cache.close_role(Pool::Write, topic, Role::DelayMessage);
                cache.close_role(Pool::Read, topic, Role::DelayMessage);
                let _ = fs::remove_file(&msg_path);
                fs::rename(dir.delay_rebuild(), &msg_path)?;
                warn!(topic, "adopted interrupted delay-log rebuild");
                continue;
            }
            // Staged copy from a crash before the swap began: the data is
            // still live in the log itself.
            fs::remove_file(dir.delay_rebuild())?;
            warn!(topic, "discarded stale delay-log rebuild file");
        }

        let total = guard.file().metadata()?.len();
        let valid_start = if total >= DELAY_HEADER_LEN {
            let v = read_i32_at(guard.file_mut(), 0)?;
            if v < DELAY_HEADER_LEN as i32 {
                return Err(Error::DelayCorrupt(format!(
                    "valid_start {v} below header size"
                )));
            }
            (v as u64).min(total)
        } else {
            total
        };

        if valid_start > cfg.partition_size_bytes() && rebuild_window_open() {
            compact(cache, topic, &dir, guard, valid_start, total)?;
            continue;
        }

        return promote_pass(cache, cfg, topic, &dir, guard, valid_start, total);
    }
    Ok(())
}

fn promote_pass(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
    dir: &TopicDir,
    mut guard: LockGuard,
    valid_start: u64,
    total: u64,
) -> Result<()> {
    let now = layout::unix_now();
    let mut matured: Vec<Bytes> = Vec::new();
    let mut carried: Vec<u8> = Vec::new();

    let temp_path = dir.delay_temp();
    let mut temp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    let temp_guard = LockGuard::exclusive(&temp)?;

    // Replay spillover a previous pass (possibly of a crashed process)
    // parked; everything in it is a complete record by construction. The
    // file itself is only removed once this pass has landed - a failure
    // in between replays it again (at-least-once), never loses it.
    let read_path = dir.delay_read();
    let had_spill = read_path.exists();
    if had_spill {
        let mut spill = Vec::new();
        {
            let spill_file = File::open(&read_path)?;
            let _spill_lock = LockGuard::exclusive(&spill_file)?;
            let mut spill_file = spill_file;
            spill_file.read_to_end(&mut spill)?;
        }
        split_records(&spill, now, &mut matured, &mut carried)?;
    }

    let consumed = if total > valid_start {
        let file = guard.file_mut();
        file.seek(SeekFrom::Start(valid_start))?;
        let mut tail = Vec::with_capacity((total - valid_start) as usize);
        file.read_to_end(&mut tail)?;
        split_records(&tail, now, &mut matured, &mut carried)?
    } else {
        0
    };

    if !matured.is_empty() {
        segment::append(cache, cfg, topic, &matured)?;
        debug!(topic, promoted = matured.len(), "promoted matured delay messages");
    }

    if total >= DELAY_HEADER_LEN {
        // Tombstone what this pass consumed (promoted or parked).
        let file = guard.file_mut();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&pack_i32((valid_start + consumed) as i32))?;
    }

    if carried.is_empty() {
        drop(temp_guard);
        drop(temp);
        let _ = fs::remove_file(&temp_path);
        if had_spill {
            fs::remove_file(&read_path)?;
        }
    } else {
        temp.write_all(&carried)?;
        drop(temp_guard);
        drop(temp);
        // Atomically replaces any fully-consumed previous spillover.
        fs::rename(&temp_path, &read_path)?;
    }
    Ok(())
}

/// Split a run of delay records at `now`: due payloads into `matured`,
/// pending frames (verbatim) into `carried`. Returns the bytes consumed;
/// a trailing partial header is a torn concurrent append and is not
/// consumed.
fn split_records(
    bytes: &[u8],
    now: i32,
    matured: &mut Vec<Bytes>,
    carried: &mut Vec<u8>,
) -> Result<u64> {
    let mut pos = 0usize;
    while bytes.len() - pos >= 8 {
        let due = unpack_i32(bytes[pos..pos + 4].try_into().expect("4 bytes"));
        let len = unpack_i32(bytes[pos + 4..pos + 8].try_into().expect("4 bytes"));
        if len < 0 {
            return Err(Error::DelayCorrupt(format!("negative payload length {len}")));
        }
        let len = len as usize;
        let remaining = bytes.len() - pos - 8;
        if remaining < len {
            return Err(Error::DelayCorrupt(format!(
                "record claims {len} payload bytes, {remaining} remain"
            )));
        }
        let frame_end = pos + 8 + len;
        if due <= now {
            matured.push(Bytes::copy_from_slice(&bytes[pos + 8..frame_end]));
        } else {
            carried.extend_from_slice(&bytes[pos..frame_end]);
        }
        pos = frame_end;
    }
    Ok(pos as u64)
}

/// Rebuild the log without its tombstoned prefix. Consumes the lock guard;
/// the caller restarts promotion afterwards.
fn compact(
    cache: &mut HandleCache,
    topic: &str,
    dir: &TopicDir,
    mut guard: LockGuard,
    valid_start: u64,
    total: u64,
) -> Result<()> {
    let rebuild_path = dir.delay_rebuild();
    let msg_path = dir.delay_message();
    {
        let mut staged = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&rebuild_path)?;
        staged.write_all(&pack_i32(DELAY_HEADER_LEN as i32))?;
        if total > valid_start {
            let file = guard.file_mut();
            file.seek(SeekFrom::Start(valid_start))?;
            io::copy(file, &mut staged)?;
        }
    }

    // Unlink while still holding the lock, so no other promoter can mistake
    // the staged file for a stale leftover.
    fs::remove_file(&msg_path)?;
    drop(guard);
    cache.close_role(Pool::Write, topic, Role::DelayMessage);
    cache.close_role(Pool::Read, topic, Role::DelayMessage);

    let mut last_err = None;
    for _ in 0..RENAME_RETRIES {
        match fs::rename(&rebuild_path, &msg_path) {
            Ok(()) => {
                info!(topic, reclaimed = valid_start, "compacted delay log");
                return Ok(());
            }
            Err(err) => {
                last_err = Some(err);
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
    Err(last_err.expect("retry loop ran").into())
}

/// Compaction is suppressed between 02:00 and 06:00 local time.
fn rebuild_window_open() -> bool {
    let hour = chrono::Local::now().hour();
    hour < 2 || hour > 6
}

/// Acquire the delay log's exclusive lock, re-opening if the file was
/// replaced (compaction rename) between open and lock.
fn lock_log(
    cache: &mut HandleCache,
    topic: &str,
    dir: &TopicDir,
    mode: OpenMode,
) -> Result<LockGuard> {
    let path = dir.delay_message();
    for _ in 0..REOPEN_ATTEMPTS {
        let guard = {
            let file = cache.get(Pool::Write, topic, Role::DelayMessage, &path, mode)?;
            LockGuard::exclusive(file)?
        };
        if same_inode(guard.file(), &path)? {
            return Ok(guard);
        }
        drop(guard);
        cache.close_role(Pool::Write, topic, Role::DelayMessage);
    }
    Err(Error::CreateFailed(format!(
        "delay log {} kept changing beneath its lock",
        path.display()
    )))
}

fn wait_for_rebuild_clear(cache: &mut HandleCache, topic: &str, dir: &TopicDir) -> Result<()> {
    let barrier = dir.delay_rebuild();
    if !barrier.exists() {
        return Ok(());
    }
    let mut wait_us = 1u64;
    for _ in 0..REBUILD_WAIT_DOUBLINGS {
        // Release our lock window so the compactor can finish the swap.
        cache.close_role(Pool::Write, topic, Role::DelayMessage);
        thread::sleep(Duration::from_micros(wait_us));
        if !barrier.exists() {
            return Ok(());
        }
        wait_us = (wait_us * 2).min(8192);
    }
    Err(Error::CreateFailed(format!(
        "delay rebuild barrier {} still present",
        barrier.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_cfg(root: &Path) -> QueueConfig {
        QueueConfig {
            partition_size_mib: 1,
            ..QueueConfig::new(root)
        }
    }

    fn delayed(items: &[(u32, &str)]) -> Vec<(u32, Bytes)> {
        items
            .iter()
            .map(|(d, p)| (*d, Bytes::copy_from_slice(p.as_bytes())))
            .collect()
    }

    // ---------------------------------------------------------------
    // write
    // ---------------------------------------------------------------

    #[test]
    fn test_write_prepends_header_once() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();

        write(&mut cache, &cfg, "t", &delayed(&[(60, "a")])).unwrap();
        write(&mut cache, &cfg, "t", &delayed(&[(60, "bb")])).unwrap();

        let raw = fs::read(tmp.path().join("t").join(layout::DELAY_MESSAGE)).unwrap();
        assert_eq!(&raw[0..4], &pack_i32(4));
        // header + (8+1) + (8+2)
        assert_eq!(raw.len(), 4 + 9 + 10);
        assert_eq!(&raw[12..13], b"a");
    }

    // ---------------------------------------------------------------
    // split_records
    // ---------------------------------------------------------------

    fn frame(due: i32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&pack_i32(due));
        buf.extend_from_slice(&pack_i32(payload.len() as i32));
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_split_by_due_time() {
        let mut bytes = frame(100, b"due");
        bytes.extend(frame(200, b"pending"));
        let mut matured = Vec::new();
        let mut carried = Vec::new();

        let consumed = split_records(&bytes, 150, &mut matured, &mut carried).unwrap();
        assert_eq!(consumed, bytes.len() as u64);
        assert_eq!(matured, vec![Bytes::from_static(b"due")]);
        assert_eq!(carried, frame(200, b"pending"));
    }

    #[test]
    fn test_split_boundary_due_equal_now_matures() {
        let bytes = frame(150, b"x");
        let mut matured = Vec::new();
        let mut carried = Vec::new();
        split_records(&bytes, 150, &mut matured, &mut carried).unwrap();
        assert_eq!(matured.len(), 1);
        assert!(carried.is_empty());
    }

    #[test]
    fn test_split_torn_header_is_skipped_silently() {
        let mut bytes = frame(100, b"ok");
        bytes.extend_from_slice(&[1, 2, 3]); // partial header of a torn append
        let mut matured = Vec::new();
        let mut carried = Vec::new();

        let consumed = split_records(&bytes, 150, &mut matured, &mut carried).unwrap();
        assert_eq!(consumed, (bytes.len() - 3) as u64);
        assert_eq!(matured.len(), 1);
    }

    #[test]
    fn test_split_short_payload_is_corruption() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&pack_i32(100));
        bytes.extend_from_slice(&pack_i32(50)); // claims 50 bytes
        bytes.extend_from_slice(b"only-a-few");
        let mut matured = Vec::new();
        let mut carried = Vec::new();

        let err = split_records(&bytes, 150, &mut matured, &mut carried).unwrap_err();
        assert!(matches!(err, Error::DelayCorrupt(_)));
    }

    #[test]
    fn test_split_negative_length_is_corruption() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&pack_i32(100));
        bytes.extend_from_slice(&pack_i32(-1));
        let mut matured = Vec::new();
        let mut carried = Vec::new();

        let err = split_records(&bytes, 150, &mut matured, &mut carried).unwrap_err();
        assert!(matches!(err, Error::DelayCorrupt(_)));
    }

    // ---------------------------------------------------------------
    // promote
    // ---------------------------------------------------------------

    #[test]
    fn test_promote_moves_due_messages_into_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();

        write(&mut cache, &cfg, "t", &delayed(&[(0, "now"), (3600, "later")])).unwrap();
        promote(&mut cache, &cfg, "t").unwrap();

        // "now" is in the segment store...
        let (_, payload) = segment::read_at(&mut cache, &cfg, "t", 0).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"now");
        assert!(segment::read_at(&mut cache, &cfg, "t", 1).unwrap().is_none());

        // ..."later" is parked in delayRead, and the log is tombstoned.
        let dir = TopicDir::new(tmp.path(), "t");
        assert!(dir.delay_read().exists());
        assert!(!dir.delay_temp().exists());
        let raw = fs::read(dir.delay_message()).unwrap();
        assert_eq!(&raw[0..4], &pack_i32(raw.len() as i32));
    }

    #[test]
    fn test_promote_is_idempotent_when_nothing_matures() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();

        write(&mut cache, &cfg, "t", &delayed(&[(3600, "later")])).unwrap();
        promote(&mut cache, &cfg, "t").unwrap();
        promote(&mut cache, &cfg, "t").unwrap();

        assert!(segment::read_at(&mut cache, &cfg, "t", 0).unwrap().is_none());
        // Still exactly one pending copy in the spillover.
        let dir = TopicDir::new(tmp.path(), "t");
        let spill = fs::read(dir.delay_read()).unwrap();
        assert_eq!(spill.len(), 8 + 5);
    }

    #[test]
    fn test_promote_replays_spillover_when_due() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();
        fs::create_dir_all(tmp.path().join("t")).unwrap();

        // A pending record parked by an earlier (interrupted) pass, already
        // due by the time this pass runs.
        let dir = TopicDir::new(tmp.path(), "t");
        fs::write(dir.delay_read(), frame(layout::unix_now() - 1, b"old")).unwrap();

        promote(&mut cache, &cfg, "t").unwrap();

        let (_, payload) = segment::read_at(&mut cache, &cfg, "t", 0).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"old");
        assert!(!dir.delay_read().exists());
    }

    #[test]
    fn test_promote_ignores_absent_topic() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();
        promote(&mut cache, &cfg, "nope").unwrap();
    }

    #[test]
    fn test_promote_keeps_arrival_order_within_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();

        write(&mut cache, &cfg, "t", &delayed(&[(0, "first"), (0, "second")])).unwrap();
        promote(&mut cache, &cfg, "t").unwrap();

        let rows = segment::read_range(&mut cache, &cfg, "t", 0, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].2.as_ref(), b"first");
        assert_eq!(rows[1].2.as_ref(), b"second");
    }

    // ---------------------------------------------------------------
    // rebuild barrier
    // ---------------------------------------------------------------

    #[test]
    fn test_write_waits_out_rebuild_barrier() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();
        fs::create_dir_all(tmp.path().join("t")).unwrap();
        let dir = TopicDir::new(tmp.path(), "t");

        layout::touch(&dir.delay_rebuild()).unwrap();
        let barrier = dir.delay_rebuild();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(2));
                fs::remove_file(&barrier).unwrap();
            });
            write(&mut cache, &cfg, "t", &delayed(&[(60, "x")])).unwrap();
        });
        assert!(dir.delay_message().exists());
    }

    #[test]
    fn test_write_fails_when_barrier_never_clears() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();
        fs::create_dir_all(tmp.path().join("t")).unwrap();
        let dir = TopicDir::new(tmp.path(), "t");
        layout::touch(&dir.delay_rebuild()).unwrap();

        let err = write(&mut cache, &cfg, "t", &delayed(&[(60, "x")])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Create);
    }

    // ---------------------------------------------------------------
    // compaction
    // ---------------------------------------------------------------

    #[test]
    fn test_compact_preserves_pending_records() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();

        // One record matures and gets tombstoned, one stays pending.
        write(&mut cache, &cfg, "t", &delayed(&[(0, "dead"), (3600, "alive")])).unwrap();
        promote(&mut cache, &cfg, "t").unwrap();
        let dir = TopicDir::new(tmp.path(), "t");

        // Another pending record arrives after the tombstoned prefix.
        write(&mut cache, &cfg, "t", &delayed(&[(3600, "alive-too")])).unwrap();

        let total = fs::metadata(dir.delay_message()).unwrap().len();
        let valid_start = {
            let raw = fs::read(dir.delay_message()).unwrap();
            unpack_i32(raw[0..4].try_into().unwrap()) as u64
        };
        assert!(valid_start > DELAY_HEADER_LEN);

        let guard = lock_log(&mut cache, "t", &dir, OpenMode::READ_WRITE).unwrap();
        compact(&mut cache, "t", &dir, guard, valid_start, total).unwrap();

        // Prefix reclaimed, live tail byte-identical behind a fresh header.
        assert!(!dir.delay_rebuild().exists());
        let raw = fs::read(dir.delay_message()).unwrap();
        assert_eq!(&raw[0..4], &pack_i32(4));
        assert_eq!(raw.len() as u64, DELAY_HEADER_LEN + (total - valid_start));

        // The pending set survives: both records still park on promotion
        // and neither reaches the segment store.
        promote(&mut cache, &cfg, "t").unwrap();
        assert!(segment::read_at(&mut cache, &cfg, "t", 1).unwrap().is_none());
        let spill = fs::read(dir.delay_read()).unwrap();
        assert_eq!(spill.len(), (8 + 5) + (8 + 9));
    }

    #[test]
    fn test_promote_adopts_interrupted_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();
        fs::create_dir_all(tmp.path().join("t")).unwrap();
        let dir = TopicDir::new(tmp.path(), "t");

        // Crash happened after the old log was unlinked: only the staged
        // rebuild exists, holding one already-due record.
        let mut staged = pack_i32(4).to_vec();
        staged.extend(frame(layout::unix_now() - 1, b"rescued"));
        fs::write(dir.delay_rebuild(), staged).unwrap();

        promote(&mut cache, &cfg, "t").unwrap();

        assert!(!dir.delay_rebuild().exists());
        let (_, payload) = segment::read_at(&mut cache, &cfg, "t", 0).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"rescued");
    }

    #[test]
    fn test_promote_discards_stale_rebuild_when_log_is_live() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = test_cfg(tmp.path());
        let mut cache = HandleCache::new();

        write(&mut cache, &cfg, "t", &delayed(&[(0, "live")])).unwrap();
        let dir = TopicDir::new(tmp.path(), "t");
        fs::write(dir.delay_rebuild(), b"stale staging copy").unwrap();

        promote(&mut cache, &cfg, "t").unwrap();

        assert!(!dir.delay_rebuild().exists());
        let (_, payload) = segment::read_at(&mut cache, &cfg, "t", 0).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"live");
    }
}
