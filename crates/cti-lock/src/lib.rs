//! Advisory file locking and per-instance ordering markers.
//!
//! Two independent mechanisms, both grounded in the same `flock(2)` idiom:
//!
//! - [`FlockGuard`] is an exclusive advisory lock on a session or manifest
//!   directory, released on `Drop`. Used by the frontend to serialize
//!   concurrent `ship`/`exec` calls against the same `Session`.
//! - [`InstanceMarker`] and [`wait_for_predecessors`] implement the
//!   on-compute-node ordering protocol from the original daemon launcher:
//!   instance `N` of a manifest waits for instances `1..N` to each drop a
//!   zero-byte marker file before proceeding, so manifests that share a
//!   staging directory extract in launch order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cti_core::{CtiError, Result};

/// An exclusive advisory lock on a file, released when dropped.
pub struct FlockGuard {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for FlockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlockGuard").field("path", &self.path).finish()
    }
}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is valid for the lifetime of `self.file`.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl FlockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire an exclusive, non-blocking lock on `path`, creating it if
    /// necessary. Fails immediately (does not block) if another process
    /// holds the lock.
    pub fn acquire_exclusive(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` comes from the `File` opened above.
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            return Err(CtiError::PermissionDenied {
                path: path.display().to_string(),
                reason: "already locked by another process".into(),
            });
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

/// A zero-byte marker file dropped by a manifest instance once it has
/// finished extracting, named `.lock_<directory>_<instance>` in the shared
/// staging directory.
pub struct InstanceMarker;

impl InstanceMarker {
    fn marker_path(stage_dir: &Path, directory: &str, instance: u32) -> PathBuf {
        stage_dir.join(format!(".lock_{directory}_{instance}"))
    }

    /// Drop this instance's marker so later instances waiting in
    /// [`wait_for_predecessors`] can proceed.
    pub fn create(stage_dir: &Path, directory: &str, instance: u32) -> Result<PathBuf> {
        let path = Self::marker_path(stage_dir, directory, instance);
        let mut f = OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;
        f.write_all(b"")?;
        Ok(path)
    }
}

const POLL_INTERVAL: Duration = Duration::from_micros(10_000);
const LOG_EVERY: u32 = 100;

/// Block until every instance `1..current_instance` has dropped its marker
/// in `stage_dir`, polling every 10ms. Instance 1 returns immediately: it
/// has no predecessors.
///
/// Mirrors the original daemon launcher's lock-wait loop, which serializes
/// manifest extraction order on a compute node when multiple manifests
/// share a staging directory.
pub fn wait_for_predecessors(stage_dir: &Path, directory: &str, current_instance: u32) {
    for predecessor in (1..current_instance).rev() {
        let marker = InstanceMarker::marker_path(stage_dir, directory, predecessor);
        let mut iterations: u32 = 0;
        while !marker.exists() {
            std::thread::sleep(POLL_INTERVAL);
            iterations += 1;
            if iterations % LOG_EVERY == 0 {
                tracing::info!(
                    directory,
                    predecessor,
                    current_instance,
                    iterations,
                    "still waiting for predecessor instance marker"
                );
            }
        }
    }
}
