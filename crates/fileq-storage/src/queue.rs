//! Topic Façade - the Public Queue Surface
//!
//! [`FileQueue`] coordinates the segment store, delay log, cursor and
//! generation manager behind the narrow FIFO interface: push (immediate or
//! delayed, single or batch, direct or buffered), pop, non-destructive
//! range reads, and the offset/length queries.
//!
//! ```text
//! push ──────────► segment store ──┐
//! push_delayed ──► delay log ──────┤   promote() drains matured
//!                                  ▼   delay records on every
//!                            <topic>/ on disk   pop / length call
//!                                  │
//! pop ◄── cursor (`current`) ──────┘
//! ```
//!
//! A `FileQueue` value is a single client of the shared on-disk state: many
//! processes (or several values in one process) may operate on the same
//! root concurrently, serialized by the engine's advisory locks and marker
//! files. Methods take `&mut self` because the handle cache and the batch
//! buffer are per-client state, not because the queue itself is exclusive.

use std::collections::HashMap;
use std::fs;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use fileq_core::Message;
use tracing::{debug, warn};

use crate::cache::{HandleCache, LockGuard, OpenMode, Pool, Role};
use crate::config::QueueConfig;
use crate::cursor;
use crate::delay;
use crate::error::{Error, ErrorKind, Result};
use crate::generation;
use crate::layout::TopicDir;
use crate::segment;

/// Topic used by the single-argument convenience calls.
pub const DEFAULT_TOPIC: &str = "default";

/// Write-path retries for structural errors, with a handle-cache reset
/// between attempts.
const WRITE_RETRIES: usize = 100;

/// Generation-promotion retries from the pop path.
const ROLLOVER_RETRIES: usize = 100;
const ROLLOVER_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// A reader finding the live generation drained retries across at most this
/// many promotions before giving up.
const MAX_GENERATION_HOPS: usize = 4;

#[derive(Debug, Clone)]
struct Pending {
    delay_secs: u32,
    payload: Bytes,
}

/// One client of a queue root. See the module docs.
#[derive(Debug)]
pub struct FileQueue {
    cfg: QueueConfig,
    cache: HandleCache,
    pending: HashMap<String, Vec<Pending>>,
}

impl FileQueue {
    /// Open (creating if needed) the queue root named by `cfg.folder`.
    pub fn open(cfg: QueueConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.folder).map_err(|err| {
            Error::CreateFailed(format!("queue root {}: {err}", cfg.folder.display()))
        })?;
        Ok(Self {
            cfg,
            cache: HandleCache::new(),
            pending: HashMap::new(),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    // -----------------------------------------------------------------
    // Producing
    // -----------------------------------------------------------------

    /// Append one message to `topic`.
    pub fn push(&mut self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        self.append_with_retry(topic, std::slice::from_ref(&payload))
    }

    /// Append one message that becomes visible to consumers after `delay`.
    pub fn push_delayed(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        delay: Duration,
    ) -> Result<()> {
        let secs = delay.as_secs();
        if secs == 0 {
            return self.push(topic, payload);
        }
        delay::write(
            &mut self.cache,
            &self.cfg,
            topic,
            &[(secs as u32, payload.into())],
        )
    }

    /// Append a batch; the messages receive contiguous sequence numbers in
    /// argument order.
    pub fn push_multi<I, P>(&mut self, topic: &str, payloads: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        let payloads: Vec<Bytes> = payloads.into_iter().map(Into::into).collect();
        self.append_with_retry(topic, &payloads)
    }

    /// Append a batch of uniformly delayed messages.
    pub fn push_multi_delayed<I, P>(&mut self, topic: &str, payloads: I, delay: Duration) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        let secs = delay.as_secs();
        if secs == 0 {
            return self.push_multi(topic, payloads);
        }
        let items: Vec<(u32, Bytes)> = payloads
            .into_iter()
            .map(|p| (secs as u32, p.into()))
            .collect();
        delay::write(&mut self.cache, &self.cfg, topic, &items)
    }

    /// Buffer one message in memory; nothing touches disk until [`send`].
    ///
    /// [`send`]: FileQueue::send
    pub fn set_message(&mut self, topic: &str, payload: impl Into<Bytes>) {
        self.set_message_delayed(topic, payload, Duration::ZERO);
    }

    /// Buffer one delayed message in memory.
    pub fn set_message_delayed(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        delay: Duration,
    ) {
        self.pending.entry(topic.to_string()).or_default().push(Pending {
            delay_secs: delay.as_secs() as u32,
            payload: payload.into(),
        });
    }

    /// Flush buffered messages - for one topic, or all of them. Immediate
    /// messages of a topic land as a single contiguous batch.
    pub fn send(&mut self, topic: Option<&str>) -> Result<()> {
        let topics: Vec<String> = match topic {
            Some(t) => self.pending.contains_key(t).then(|| vec![t.to_string()]).unwrap_or_default(),
            None => self.pending.keys().cloned().collect(),
        };
        for t in topics {
            let batch = self.pending.remove(&t).unwrap_or_default();
            let mut immediate = Vec::new();
            let mut delayed = Vec::new();
            for item in batch {
                if item.delay_secs == 0 {
                    immediate.push(item.payload);
                } else {
                    delayed.push((item.delay_secs, item.payload));
                }
            }
            if !immediate.is_empty() {
                self.append_with_retry(&t, &immediate)?;
            }
            if !delayed.is_empty() {
                delay::write(&mut self.cache, &self.cfg, &t, &delayed)?;
            }
        }
        Ok(())
    }

    fn append_with_retry(&mut self, topic: &str, payloads: &[Bytes]) -> Result<()> {
        let mut last: Option<Error> = None;
        for attempt in 0..WRITE_RETRIES {
            match segment::append(&mut self.cache, &self.cfg, topic, payloads) {
                Err(err) if err.kind() == ErrorKind::File => {
                    if attempt == 0 {
                        warn!(topic, %err, "write hit a structural error, resetting handles");
                    }
                    self.cache.close_all();
                    last = Some(err);
                }
                other => return other,
            }
        }
        Err(last.expect("loop ran at least once"))
    }

    // -----------------------------------------------------------------
    // Consuming
    // -----------------------------------------------------------------

    /// Take the next message off `topic`, advancing the shared cursor.
    ///
    /// Returns `None` when the topic is fully drained. When the drained
    /// generation is saturated, promotes the successor and continues there.
    pub fn pop(&mut self, topic: &str) -> Result<Option<Message>> {
        delay::promote(&mut self.cache, &self.cfg, topic)?;

        let dir = TopicDir::new(&self.cfg.folder, topic);
        for _hop in 0..MAX_GENERATION_HOPS {
            if !dir.path().is_dir() {
                return Ok(None);
            }
            let cur_path = dir.current();
            let mut guard = {
                let file = self.cache.get(
                    Pool::Write,
                    topic,
                    Role::Current,
                    &cur_path,
                    OpenMode::READ_WRITE,
                )?;
                LockGuard::exclusive(file)?
            };
            let seq = cursor::read_position(guard.file_mut())?;
            match segment::read_at(&mut self.cache, &self.cfg, topic, seq)? {
                Some((header, payload)) => {
                    cursor::write_position(guard.file_mut(), seq + 1)?;
                    let label = generation::read_label(dir.path())?;
                    return Ok(Some(Message {
                        offset: seq as i64,
                        hash: header.crc,
                        len: header.len,
                        time: header.time,
                        payload,
                        label: label as i64,
                    }));
                }
                None => {
                    drop(guard);
                    if !dir.lock_sentinel().exists() {
                        return Ok(None);
                    }
                    if !self.promote_with_retry(topic)? {
                        // Sentinel without a successor: a writer died between
                        // the two steps of saturation. Nothing to read yet.
                        return Ok(None);
                    }
                    debug!(topic, "generation drained, retrying pop in successor");
                }
            }
        }
        Err(Error::CreateFailed(format!(
            "generation promotion for topic {topic} did not settle"
        )))
    }

    /// [`pop`], but errors are logged and swallowed.
    ///
    /// [`pop`]: FileQueue::pop
    pub fn pop_ignore_errors(&mut self, topic: &str) -> Option<Message> {
        match self.pop(topic) {
            Ok(message) => message,
            Err(err) => {
                warn!(topic, %err, "pop failed, returning none");
                None
            }
        }
    }

    fn promote_with_retry(&mut self, topic: &str) -> Result<bool> {
        let mut last: Option<Error> = None;
        for attempt in 0..ROLLOVER_RETRIES {
            match generation::try_promote(&mut self.cache, &self.cfg, topic) {
                Err(err) if err.kind() == ErrorKind::Io => {
                    if attempt == 0 {
                        warn!(topic, %err, "rollover failed, retrying");
                    }
                    last = Some(err);
                    thread::sleep(ROLLOVER_RETRY_INTERVAL);
                }
                other => return other,
            }
        }
        Err(last.expect("loop ran at least once"))
    }

    // -----------------------------------------------------------------
    // Non-destructive reads and queries
    // -----------------------------------------------------------------

    /// Read up to `limit` messages starting at in-generation `offset`,
    /// without touching the cursor.
    pub fn get_queue(&mut self, topic: &str, offset: i64, limit: usize) -> Result<Vec<Message>> {
        if offset < 0 || offset > i32::MAX as i64 {
            return Ok(Vec::new());
        }
        let rows = segment::read_range(&mut self.cache, &self.cfg, topic, offset as i32, limit)?;
        let dir = TopicDir::new(&self.cfg.folder, topic);
        let label = generation::read_label(dir.path())? as i64;
        Ok(rows
            .into_iter()
            .map(|(seq, header, payload)| Message {
                offset: seq as i64,
                hash: header.crc,
                len: header.len,
                time: header.time,
                payload,
                label,
            })
            .collect())
    }

    /// The message at `offset`, if present.
    pub fn get_message(&mut self, topic: &str, offset: i64) -> Result<Option<Message>> {
        Ok(self.get_queue(topic, offset, 1)?.pop())
    }

    /// Messages currently waiting between the cursor and the write head.
    pub fn length(&mut self, topic: &str) -> Result<i64> {
        let max = self.max_offset(topic, false)?;
        let current = self.current_offset(topic, false)?;
        Ok((max - current).max(0))
    }

    /// Sequence one past the newest stored message. With `from_start`, the
    /// global offset across all generations.
    pub fn max_offset(&mut self, topic: &str, from_start: bool) -> Result<i64> {
        delay::promote(&mut self.cache, &self.cfg, topic)?;
        let in_gen = segment::max_offset_in_gen(&mut self.cache, &self.cfg, topic)?;
        self.widen(topic, in_gen, from_start)
    }

    /// The consumer cursor. With `from_start`, the global offset across all
    /// generations.
    pub fn current_offset(&mut self, topic: &str, from_start: bool) -> Result<i64> {
        let in_gen = cursor::load(&mut self.cache, &self.cfg, topic)? as i64;
        self.widen(topic, in_gen, from_start)
    }

    /// The topic's generation counter.
    pub fn label(&mut self, topic: &str) -> Result<i64> {
        let dir = TopicDir::new(&self.cfg.folder, topic);
        Ok(generation::read_label(dir.path())? as i64)
    }

    fn widen(&mut self, topic: &str, in_gen: i64, from_start: bool) -> Result<i64> {
        if !from_start {
            return Ok(in_gen);
        }
        let dir = TopicDir::new(&self.cfg.folder, topic);
        let label = generation::read_label(dir.path())?;
        Ok(generation::global_offset(&self.cfg, label, in_gen))
    }

    // -----------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------

    /// Close every cached handle (releasing any advisory locks). The queue
    /// remains usable; handles reopen lazily.
    pub fn release(&mut self) {
        self.cache.close_all();
    }
}
