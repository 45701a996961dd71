//! Engine Configuration
//!
//! [`QueueConfig`] carries everything the engine needs to open a queue root:
//!
//! - **folder**: the root directory; one subdirectory per topic
//! - **partition_size_mib**: segment rotation threshold (default: 500 MiB)
//! - **label_size**: generation capacity in messages (default: `i32::MAX`;
//!   lowering it - minimum 10 - exists so rollover can be exercised in tests
//!   without writing two billion records)
//!
//! Values outside the documented ranges are clamped at the point of use
//! rather than rejected, so a config deserialized from a host application's
//! file can never put the engine into an invalid state.
//!
//! ## Usage
//!
//! ```ignore
//! use fileq_storage::QueueConfig;
//!
//! let config = QueueConfig::new("/var/lib/myapp/queue");
//!
//! // Test config: tiny segments, ten-message generations
//! let config = QueueConfig {
//!     partition_size_mib: 1,
//!     label_size: 10,
//!     ..QueueConfig::new(tmp.path())
//! };
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Root directory holding one subdirectory per topic.
    pub folder: PathBuf,

    /// Segment rotation threshold in MiB, clamped to [1, 2000] (default: 500).
    #[serde(default = "default_partition_size_mib")]
    pub partition_size_mib: u32,

    /// Messages per generation, clamped to [10, i32::MAX] (default: i32::MAX).
    #[serde(default = "default_label_size")]
    pub label_size: i32,
}

impl QueueConfig {
    pub fn new(folder: impl AsRef<Path>) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
            partition_size_mib: default_partition_size_mib(),
            label_size: default_label_size(),
        }
    }

    /// Rotation threshold in bytes, after clamping the MiB value.
    pub fn partition_size_bytes(&self) -> u64 {
        u64::from(self.partition_size_mib.clamp(1, 2000)) << 20
    }

    /// Generation capacity, after clamping.
    pub fn label_size(&self) -> i32 {
        self.label_size.max(10)
    }
}

fn default_partition_size_mib() -> u32 {
    500
}

fn default_label_size() -> i32 {
    i32::MAX
}
