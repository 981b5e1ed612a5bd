//! Run-level exclusivity marker
//!
//! A lock file next to the database holds the PID of the process driving the
//! browser. A second process fails fast while that PID is alive; a lock left
//! behind by a dead process is reclaimed.
//!
//! The PID is written to a per-process staging file first and hard-linked
//! into place, so the lock never becomes visible without an owner.

use crate::HarvestError;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a lock without a readable owner is treated as still being written
const UNREADABLE_GRACE: Duration = Duration::from_secs(30);

/// Held for the lifetime of a controller; removes the lock file on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquires the lock at `path`
    ///
    /// # Returns
    ///
    /// * `Ok(RunLock)` - The lock is held by this process
    /// * `Err(HarvestError::ResourceBusy)` - A live process owns the lock
    /// * `Err(HarvestError::Io)` - The lock file could not be created
    pub fn acquire(path: &Path) -> crate::Result<Self> {
        Self::acquire_with_grace(path, UNREADABLE_GRACE)
    }

    fn acquire_with_grace(path: &Path, grace: Duration) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let staged = staging_path(path);
        fs::write(&staged, format!("{}\n", std::process::id()))?;
        let result = Self::link_staged(&staged, path, grace);
        if let Err(e) = fs::remove_file(&staged) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", staged.display(), e);
            }
        }
        result
    }

    fn link_staged(staged: &Path, path: &Path, grace: Duration) -> crate::Result<Self> {
        // Second pass only runs after a stale lock was removed
        for _ in 0..2 {
            match fs::hard_link(staged, path) {
                Ok(()) => {
                    debug!("Acquired run lock {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let owner = read_owner(path);
                    match owner {
                        Some(pid) if process_alive(pid) => return Err(busy(path, pid)),
                        None if modified_within(path, grace) => return Err(busy(path, 0)),
                        _ => {
                            warn!(
                                "Reclaiming stale run lock {} (owner {:?})",
                                path.display(),
                                owner
                            );
                            match fs::remove_file(path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(busy(path, read_owner(path).unwrap_or(0)))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove run lock {}: {}", self.path.display(), e);
            }
        }
    }
}

fn busy(path: &Path, pid: u32) -> HarvestError {
    HarvestError::ResourceBusy {
        path: path.display().to_string(),
        pid,
    }
}

/// `papers.lock` stages as `papers.lock.<pid>`
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(format!(".{}", std::process::id()));
    path.with_file_name(name)
}

/// True when the lock file was written less than `grace` ago
///
/// A timestamp in the future counts as recent; a vanished file does not.
fn modified_within(path: &Path, grace: Duration) -> bool {
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified.elapsed().map(|age| age < grace).unwrap_or(true),
        Err(_) => false,
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // Signal 0 only checks for existence and permission
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
