//! Generation Manager - Rollover of a Saturated Topic
//!
//! Sequence numbers are 32-bit; a topic outlives them by rolling the whole
//! directory over into a new **generation**. The writer side lives in the
//! segment store: on saturation it creates the `lock` sentinel and seeds
//! the successor directory `<topic>_<n+1>`. This module is the reader side:
//! once `pop` drains the live generation and finds the sentinel, the
//! successor is promoted with a rename chain:
//!
//! ```text
//! <topic>            -> <topic>_h_<n+1>      retire the live generation
//! .../delayMessage   -> <topic>_<n+1>/...    carry the delay log forward
//! .../delayRead      -> <topic>_<n+1>/...    carry the spillover forward
//! <topic>_<n+1>      -> <topic>              promote the successor
//! ```
//!
//! `<root>/<topic>.lock` is held across the chain. On any failure the
//! completed renames are reversed in LIFO order, leaving either the old
//! directory intact or the new one fully promoted - never a half state.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use fileq_core::codec::read_i32_at;
use tracing::{info, warn};

use crate::cache::HandleCache;
use crate::config::QueueConfig;
use crate::error::Result;
use crate::layout::{self, TopicDir};

/// The topic's generation counter; an absent `label` file is generation 0.
pub(crate) fn read_label(dir: &Path) -> Result<i32> {
    match File::open(dir.join(layout::LABEL)) {
        Ok(mut file) => match read_i32_at(&mut file, 0) {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            Err(err) => Err(err.into()),
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err.into()),
    }
}

/// Widen an in-generation offset to the global, monotonic i64 offset.
pub(crate) fn global_offset(cfg: &QueueConfig, label: i32, in_gen: i64) -> i64 {
    label as i64 * cfg.label_size() as i64 + in_gen
}

/// Promote `<topic>_<label+1>` over the drained live generation.
///
/// Returns `false` (without touching anything) when no successor directory
/// exists. Closes every cached handle for the topic before renaming - the
/// old descriptions would otherwise keep pointing into the retired tree.
pub(crate) fn try_promote(
    cache: &mut HandleCache,
    cfg: &QueueConfig,
    topic: &str,
) -> Result<bool> {
    let root = cfg.folder.as_path();
    let dir = TopicDir::new(root, topic);
    let label = read_label(dir.path())?;
    let next = label + 1;
    if !layout::sibling_dir(root, topic, next).is_dir() {
        return Ok(false);
    }

    let sentinel = layout::root_sentinel(root, topic);
    layout::touch(&sentinel)?;
    cache.close_topic(topic);
    let outcome = change_topic_store(root, topic, next);
    let _ = fs::remove_file(&sentinel);
    outcome?;

    info!(topic, generation = next, "promoted successor generation");
    Ok(true)
}

fn change_topic_store(root: &Path, topic: &str, next: i32) -> Result<()> {
    let live = root.join(topic);
    let retired = layout::retired_dir(root, topic, next);
    let successor = layout::sibling_dir(root, topic, next);

    let steps: [(PathBuf, PathBuf, bool); 4] = [
        (live.clone(), retired.clone(), true),
        (
            retired.join(layout::DELAY_MESSAGE),
            successor.join(layout::DELAY_MESSAGE),
            false,
        ),
        (
            retired.join(layout::DELAY_READ),
            successor.join(layout::DELAY_READ),
            false,
        ),
        (successor, live, true),
    ];

    let mut done: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (from, to, required) in steps {
        if !required && !from.exists() {
            continue;
        }
        match fs::rename(&from, &to) {
            Ok(()) => done.push((to, from)),
            Err(err) => {
                warn!(topic, from = %from.display(), %err, "rollover rename failed, unwinding");
                for (undo_from, undo_to) in done.iter().rev() {
                    let _ = fs::rename(undo_from, undo_to);
                }
                return Err(err.into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileq_core::codec::pack_i32;

    fn seed_generation(root: &Path, name: &str, label: i32, marker: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(layout::LABEL), pack_i32(label)).unwrap();
        fs::write(dir.join("marker"), marker).unwrap();
    }

    // ---------------------------------------------------------------
    // read_label
    // ---------------------------------------------------------------

    #[test]
    fn test_read_label_absent_is_zero() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_label(tmp.path()).unwrap(), 0);
    }

    #[test]
    fn test_read_label_value() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(layout::LABEL), pack_i32(7)).unwrap();
        assert_eq!(read_label(tmp.path()).unwrap(), 7);
    }

    #[test]
    fn test_read_label_short_file_is_zero() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(layout::LABEL), [1u8]).unwrap();
        assert_eq!(read_label(tmp.path()).unwrap(), 0);
    }

    // ---------------------------------------------------------------
    // global_offset
    // ---------------------------------------------------------------

    #[test]
    fn test_global_offset_widens_past_i32() {
        let cfg = QueueConfig::new("/q");
        // Generation 2 with the full default capacity: far past i32 range.
        let got = global_offset(&cfg, 2, 5);
        assert_eq!(got, 2 * (i32::MAX as i64) + 5);
    }

    #[test]
    fn test_global_offset_generation_zero() {
        let cfg = QueueConfig {
            label_size: 10,
            ..QueueConfig::new("/q")
        };
        assert_eq!(global_offset(&cfg, 0, 4), 4);
        assert_eq!(global_offset(&cfg, 1, 0), 10);
    }

    // ---------------------------------------------------------------
    // try_promote
    // ---------------------------------------------------------------

    #[test]
    fn test_promote_without_successor_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = QueueConfig::new(tmp.path());
        let mut cache = HandleCache::new();
        seed_generation(tmp.path(), "t", 0, "live");

        assert!(!try_promote(&mut cache, &cfg, "t").unwrap());
        assert!(tmp.path().join("t").is_dir());
        assert!(!layout::root_sentinel(tmp.path(), "t").exists());
    }

    #[test]
    fn test_promote_swaps_directories_and_moves_delay_state() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = QueueConfig::new(tmp.path());
        let mut cache = HandleCache::new();

        seed_generation(tmp.path(), "t", 0, "old");
        seed_generation(tmp.path(), "t_1", 1, "new");
        fs::write(tmp.path().join("t").join(layout::DELAY_MESSAGE), b"delayed").unwrap();
        fs::write(tmp.path().join("t").join(layout::DELAY_READ), b"spill").unwrap();

        assert!(try_promote(&mut cache, &cfg, "t").unwrap());

        let live = tmp.path().join("t");
        assert_eq!(fs::read(live.join("marker")).unwrap(), b"new");
        assert_eq!(read_label(&live).unwrap(), 1);
        assert_eq!(fs::read(live.join(layout::DELAY_MESSAGE)).unwrap(), b"delayed");
        assert_eq!(fs::read(live.join(layout::DELAY_READ)).unwrap(), b"spill");

        let retired = layout::retired_dir(tmp.path(), "t", 1);
        assert!(retired.is_dir());
        assert!(!retired.join(layout::DELAY_MESSAGE).exists());
        assert!(!layout::sibling_dir(tmp.path(), "t", 1).exists());
        assert!(!layout::root_sentinel(tmp.path(), "t").exists());
    }

    #[test]
    fn test_promote_without_delay_files() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = QueueConfig::new(tmp.path());
        let mut cache = HandleCache::new();

        seed_generation(tmp.path(), "t", 0, "old");
        seed_generation(tmp.path(), "t_1", 1, "new");

        assert!(try_promote(&mut cache, &cfg, "t").unwrap());
        assert_eq!(fs::read(tmp.path().join("t/marker")).unwrap(), b"new");
    }

    #[test]
    fn test_failed_chain_unwinds_in_lifo_order() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = QueueConfig::new(tmp.path());
        let mut cache = HandleCache::new();

        seed_generation(tmp.path(), "t", 0, "old");
        seed_generation(tmp.path(), "t_1", 1, "new");
        // Occupy the final rename's destination... it cannot fail that way,
        // since the first step moves `t` aside. Instead poison the delay
        // move by making its destination a non-empty directory.
        fs::write(tmp.path().join("t").join(layout::DELAY_MESSAGE), b"delayed").unwrap();
        let poison = tmp.path().join("t_1").join(layout::DELAY_MESSAGE);
        fs::create_dir_all(poison.join("occupied")).unwrap();

        let err = try_promote(&mut cache, &cfg, "t").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);

        // Everything restored: live generation back in place, delay log
        // still inside it, successor still waiting.
        let live = tmp.path().join("t");
        assert_eq!(fs::read(live.join("marker")).unwrap(), b"old");
        assert_eq!(fs::read(live.join(layout::DELAY_MESSAGE)).unwrap(), b"delayed");
        assert!(layout::sibling_dir(tmp.path(), "t", 1).is_dir());
        assert!(!layout::retired_dir(tmp.path(), "t", 1).exists());
        assert!(!layout::root_sentinel(tmp.path(), "t").exists());
    }
}
