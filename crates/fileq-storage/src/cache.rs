//! Handle Cache - Keyed Pools of Open File Handles
//!
//! Opening, locking and closing files dominates the cost of small queue
//! operations, so the engine keeps two pools of open handles per
//! `(topic, role)` key: one for the read path and one for the write path.
//! The pools are never mixed - the write path always owns distinct file
//! descriptions so advisory-lock semantics stay unambiguous (two handles
//! from one `open()` share a lock; two separate `open()`s contend).
//!
//! ## Contract
//!
//! - `get` returns the cached handle when the open-mode fingerprint *and*
//!   path still match; otherwise the stale handle is unlocked, closed and
//!   replaced. The path check matters: the same `(topic, Data)` key moves
//!   between segment stems as rotation happens, and into a successor
//!   directory on generation rollover.
//! - Reuse additionally requires that the cached description is still what
//!   the path resolves to. Generation rollover renames whole directories and
//!   delay-log compaction replaces `delayMessage` by rename, so a handle
//!   whose inode no longer matches its path is quietly reopened (see
//!   [`same_inode`]).
//! - Every close releases the advisory lock first. Dropping the cache
//!   closes everything.
//! - The cache owns the handles; callers borrow `&mut File` and must not
//!   stash clones beyond the duration of a [`LockGuard`].

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

/// Which file a cached handle refers to within its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Role {
    Data,
    Index,
    Current,
    DelayMessage,
    PartitionIndex,
}

/// Read-path or write-path pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pool {
    Read,
    Write,
}

/// Open-mode fingerprint; a cached handle is reusable only for an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
}

impl OpenMode {
    pub(crate) const READ: Self = Self {
        read: true,
        write: false,
        append: false,
    };

    pub(crate) const APPEND: Self = Self {
        read: true,
        write: false,
        append: true,
    };

    pub(crate) const READ_WRITE: Self = Self {
        read: true,
        write: true,
        append: false,
    };

    fn open(self, path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.write || self.append)
            .open(path)
    }
}

#[derive(Debug)]
struct CachedHandle {
    mode: OpenMode,
    path: PathBuf,
    file: File,
}

/// Two keyed pools of open handles; see the module docs for the contract.
#[derive(Debug, Default)]
pub(crate) struct HandleCache {
    read: HashMap<(String, Role), CachedHandle>,
    write: HashMap<(String, Role), CachedHandle>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_mut(&mut self, pool: Pool) -> &mut HashMap<(String, Role), CachedHandle> {
        match pool {
            Pool::Read => &mut self.read,
            Pool::Write => &mut self.write,
        }
    }

    /// Borrow the handle for `(topic, role)`, opening (and evicting any
    /// stale handle) as needed.
    pub fn get(
        &mut self,
        pool: Pool,
        topic: &str,
        role: Role,
        path: &Path,
        mode: OpenMode,
    ) -> io::Result<&mut File> {
        let map = self.pool_mut(pool);
        let key = (topic.to_string(), role);

        let reusable = match map.get(&key) {
            Some(h) if h.mode == mode && h.path == path => {
                same_inode(&h.file, path).unwrap_or(false)
            }
            _ => false,
        };
        if !reusable {
            let file = mode.open(path)?;
            if let Some(stale) = map.insert(
                key.clone(),
                CachedHandle {
                    mode,
                    path: path.to_path_buf(),
                    file,
                },
            ) {
                debug!(topic, ?role, old = %stale.path.display(), new = %path.display(), "evicting cached handle");
                release(stale);
            }
        }
        Ok(&mut map.get_mut(&key).expect("handle just ensured").file)
    }

    /// Close one `(topic, role)` handle in one pool; no-op when absent.
    pub fn close_role(&mut self, pool: Pool, topic: &str, role: Role) {
        if let Some(h) = self.pool_mut(pool).remove(&(topic.to_string(), role)) {
            release(h);
        }
    }

    /// Close every handle belonging to `topic`, in both pools.
    pub fn close_topic(&mut self, topic: &str) {
        for map in [&mut self.read, &mut self.write] {
            let keys: Vec<_> = map.keys().filter(|(t, _)| t == topic).cloned().collect();
            for key in keys {
                if let Some(h) = map.remove(&key) {
                    release(h);
                }
            }
        }
    }

    /// Close everything in both pools.
    pub fn close_all(&mut self) {
        for map in [&mut self.read, &mut self.write] {
            for (_, h) in map.drain() {
                release(h);
            }
        }
    }
}

/// Does `file` still refer to whatever `path` currently resolves to?
///
/// False after the file was unlinked or replaced by a rename (including a
/// rename of an ancestor directory).
#[cfg(unix)]
pub(crate) fn same_inode(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let by_handle = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(by_path) => Ok(by_handle.ino() == by_path.ino() && by_handle.dev() == by_path.dev()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(not(unix))]
pub(crate) fn same_inode(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}

fn release(handle: CachedHandle) {
    // A never-locked handle unlocks as a no-op; closing must not leave a
    // lock behind under any circumstances.
    let _ = FileExt::unlock(&handle.file);
}

impl Drop for HandleCache {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Exclusive advisory lock scoped to a value's lifetime.
///
/// Holds a duplicated descriptor of the locked file: the duplicate shares
/// the open file description (and therefore the lock) with the cached
/// handle, so callers can release their `&mut File` borrow on the cache and
/// keep the lock alive - or keep doing positioned I/O through
/// [`LockGuard::file_mut`]. Dropping the guard releases the lock.
#[derive(Debug)]
pub(crate) struct LockGuard {
    file: File,
}

impl LockGuard {
    pub fn exclusive(file: &File) -> io::Result<Self> {
        let dup = file.try_clone()?;
        dup.lock_exclusive()?;
        Ok(Self { file: dup })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
