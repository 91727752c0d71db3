//! Advisory cross-process lock for state files.
//!
//! Two hooks can fire for overlapping tool calls, and a read-modify-write on
//! the same state file would lose one of the updates. Each store therefore
//! holds an exclusive advisory lock on a `.lock` sibling of its file for the
//! duration of one load-mutate-save cycle. The critical section is a few
//! milliseconds of local file I/O, so acquisition simply blocks.
//!
//! The lock file itself is left in place after release; only the OS lock is
//! dropped. Removing it would race with a peer that has already opened it.

use fs2::FileExt;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;

pub(crate) struct StateLock {
    file: File,
}

impl StateLock {
    /// Block until the advisory lock guarding `path` is held.
    pub(crate) fn acquire(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path_for(path))?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}
