//! Cached detection of whether `/proc/<pid>` liveness checks are usable on
//! this host, probed once per process (spec.md §4.1 stale-directory reaping
//! needs a pid-liveness check; non-Linux hosts fall back to `kill(pid, 0)`
//! alone).

use std::sync::OnceLock;

static PROCFS_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Whether `/proc` is mounted and usable for liveness checks on this host.
pub fn procfs_available() -> bool {
    *PROCFS_AVAILABLE.get_or_init(|| std::path::Path::new("/proc/self").is_dir())
}

/// Is `pid` a live process?
///
/// Prefers `/proc/<pid>` existence when procfs is available (distinguishes
/// a live process from a zombie awaiting reap less reliably than `kill`, but
/// avoids a signal syscall in the common reaper sweep); falls back to
/// `kill(pid, 0)` otherwise.
pub fn is_pid_alive(pid: u32) -> bool {
    if procfs_available() {
        return std::path::Path::new(&format!("/proc/{pid}")).exists();
    }
    // SAFETY: signal 0 sends no signal; only checks permission/existence.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procfs_probe_is_stable() {
        assert_eq!(procfs_available(), procfs_available());
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn pid_one_is_alive_on_linux() {
        if cfg!(target_os = "linux") {
            assert!(is_pid_alive(1));
        }
    }
}
