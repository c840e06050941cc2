//! Single-instance guard for the downloader.
//!
//! The guard is an exclusive advisory lock held on an open lock file for the
//! lifetime of the process. The file body carries the holder's PID so a
//! check round can ask it to restart. The lock, not the PID, decides who runs.

use crate::error::{MirrorError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Held for the lifetime of the downloader; the lock goes with the file
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock without waiting.
    ///
    /// Fails with `MirrorError::AlreadyRunning` while another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = open_lock_file(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                return Err(MirrorError::AlreadyRunning {
                    pid: read_pid(path)?,
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        info!(lock = %path.display(), "Acquired instance lock");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // The file stays: the lock belongs to its inode, not its name
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "Released instance lock");
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// PID recorded in a lock file, if the file exists and parses
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// PID of the process currently holding the lock at `path`, if any
pub fn holder(path: &Path) -> Result<Option<u32>> {
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match FileExt::try_lock_exclusive(&file) {
        // Nobody holds it; whatever PID the file names is stale
        Ok(()) => {
            FileExt::unlock(&file)?;
            Ok(None)
        }
        Err(e) if is_contended(&e) => read_pid(path),
        Err(e) => Err(e.into()),
    }
}

/// Ask the downloader holding `path` to shut down.
///
/// Returns the PID that was signalled, or `None` when no other process
/// holds the lock.
#[cfg(unix)]
pub fn terminate_holder(path: &Path) -> Result<Option<u32>> {
    let Some(pid) = holder(path)? else {
        return Ok(None);
    };
    if pid == std::process::id() {
        return Ok(None);
    }
    let raw = libc::pid_t::try_from(pid)
        .map_err(|_| MirrorError::InvalidState(format!("pid {pid} out of range")))?;
    if unsafe { libc::kill(raw, libc::SIGTERM) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(Some(pid))
}

#[cfg(not(unix))]
pub fn terminate_holder(_path: &Path) -> Result<Option<u32>> {
    Ok(None)
}
