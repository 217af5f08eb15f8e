//! Exclusive OS-level locks on backing files.
//!
//! Every open handle holds `flock`/`LockFileEx` locks on both of its backing
//! files for as long as it stays open. Locks are released when the file
//! handle is closed, including on process crash.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{PagerError, PagerResult};

/// Try to take an exclusive lock on `file` without blocking.
pub fn lock_exclusive(file: &File, path: &Path) -> PagerResult<()> {
    match file.try_lock_exclusive() {
        Ok(()) => {
            debug!(path = %path.display(), "acquired exclusive lock");
            Ok(())
        }
        Err(e) if is_contended(&e) => {
            warn!(path = %path.display(), "file is locked by another handle");
            Err(PagerError::Locked(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Release a lock taken with [`lock_exclusive`].
pub fn unlock(file: &File, path: &Path) -> PagerResult<()> {
    FileExt::unlock(file)?;
    debug!(path = %path.display(), "released exclusive lock");
    Ok(())
}

/// Open an existing file read-write and lock it.
pub fn open_locked(path: &Path) -> PagerResult<File> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    lock_exclusive(&file, path)?;
    Ok(file)
}

/// Fail with [`PagerError::Locked`] if another handle holds `path`.
///
/// Probes by taking and immediately releasing the lock.
pub fn ensure_unlocked(path: &Path) -> PagerResult<()> {
    let file = open_locked(path)?;
    unlock(&file, path)
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
