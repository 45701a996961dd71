//! On-Disk Layout
//!
//! One root directory, one subdirectory per topic. Inside a topic directory
//! every file name is fixed:
//!
//! ```text
//! <root>/
//!   <topic>.lock            cross-topic rollover sentinel (transient)
//!   <topic>/
//!     partitionIndex        i32[] of segment start sequences, ascending
//!     0000000000.dat        segment data (stem = start sequence, 10 digits)
//!     0000000000.index      i32[] of end-of-record byte offsets
//!     delayMessage          delay log: valid_start header + records
//!     delayRead             not-yet-due spillover from the last promotion
//!     delayRebuild          compaction barrier + staging file (transient)
//!     delayTemp             promotion staging file (transient)
//!     current               i32 consumer cursor
//!     label                 i32 generation counter (absent = 0)
//!     lock                  generation-saturated sentinel (empty)
//!   <topic>_<n>/            successor generation awaiting promotion
//!   <topic>_h_<n>/          retired generation n-1, sealed
//! ```
//!
//! The marker files form a small state machine: `lock` blocks writers until
//! a reader promotes the successor; `delayRebuild` blocks delay writers
//! while the delay log is compacted; `<topic>.lock` under the root marks a
//! rename chain in flight.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const PARTITION_INDEX: &str = "partitionIndex";
pub(crate) const DELAY_MESSAGE: &str = "delayMessage";
pub(crate) const DELAY_READ: &str = "delayRead";
pub(crate) const DELAY_REBUILD: &str = "delayRebuild";
pub(crate) const DELAY_TEMP: &str = "delayTemp";
pub(crate) const CURRENT: &str = "current";
pub(crate) const LABEL: &str = "label";
pub(crate) const LOCK: &str = "lock";

pub(crate) const DAT_EXT: &str = "dat";
pub(crate) const INDEX_EXT: &str = "index";

/// Segment file stem: the start sequence, zero-padded to 10 digits.
pub(crate) fn stem_name(seq: i32) -> String {
    format!("{seq:010}")
}

/// A topic directory and the fixed file names inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TopicDir {
    dir: PathBuf,
}

impl TopicDir {
    pub fn new(root: &Path, topic: &str) -> Self {
        Self {
            dir: root.join(topic),
        }
    }

    pub fn from_path(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn partition_index(&self) -> PathBuf {
        self.dir.join(PARTITION_INDEX)
    }

    pub fn dat(&self, stem: i32) -> PathBuf {
        self.dir.join(format!("{}.{DAT_EXT}", stem_name(stem)))
    }

    pub fn index(&self, stem: i32) -> PathBuf {
        self.dir.join(format!("{}.{INDEX_EXT}", stem_name(stem)))
    }

    pub fn current(&self) -> PathBuf {
        self.dir.join(CURRENT)
    }

    pub fn label(&self) -> PathBuf {
        self.dir.join(LABEL)
    }

    pub fn lock_sentinel(&self) -> PathBuf {
        self.dir.join(LOCK)
    }

    pub fn delay_message(&self) -> PathBuf {
        self.dir.join(DELAY_MESSAGE)
    }

    pub fn delay_read(&self) -> PathBuf {
        self.dir.join(DELAY_READ)
    }

    pub fn delay_rebuild(&self) -> PathBuf {
        self.dir.join(DELAY_REBUILD)
    }

    pub fn delay_temp(&self) -> PathBuf {
        self.dir.join(DELAY_TEMP)
    }
}

/// `<root>/<topic>_<gen>` - successor generation waiting for promotion.
pub(crate) fn sibling_dir(root: &Path, topic: &str, gen: i32) -> PathBuf {
    root.join(format!("{topic}_{gen}"))
}

/// `<root>/<topic>_h_<gen>` - retired generation, sealed after rollover.
pub(crate) fn retired_dir(root: &Path, topic: &str, gen: i32) -> PathBuf {
    root.join(format!("{topic}_h_{gen}"))
}

/// `<root>/<topic>.lock` - cross-topic sentinel held across the rename chain.
pub(crate) fn root_sentinel(root: &Path, topic: &str) -> PathBuf {
    root.join(format!("{topic}.lock"))
}

/// Wall clock in unix seconds, as the i32 the record format stores.
pub(crate) fn unix_now() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or(0)
}

/// Create an empty marker file (or refresh an existing one).
pub(crate) fn touch(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
}
