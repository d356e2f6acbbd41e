//! Stale stage-directory reaping.
//!
//! A CTI process's stage directory (`cti-config::ensure_stage_dir`) is named
//! after its pid and is never cleaned up by the OS: if the process is killed
//! (SIGKILL, crash) the directory is orphaned. Each new `Frontend` sweeps
//! its siblings and removes ones that are both old enough and owned by a
//! dead pid, so a login node doesn't accumulate garbage across many CTI
//! invocations.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use cti_core::Result;

use crate::procfs::is_pid_alive;

/// Minimum age before a sibling stage directory is considered for removal,
/// even if its pid is dead. Guards against removing a directory mid-creation
/// by a process that has not yet written anything recognizable into it.
pub const MIN_STALE_AGE: Duration = Duration::from_secs(5 * 60);

/// A stage directory that was identified as stale.
#[derive(Debug, Clone)]
pub struct ReapedDir {
    pub pid: u32,
    pub path: PathBuf,
}

/// Sweep sibling stage directories and remove the ones that are both older
/// than [`MIN_STALE_AGE`] and owned by a pid that is no longer running.
/// Returns the directories that were removed.
pub fn reap_stale_dirs(current_pid: u32) -> Result<Vec<ReapedDir>> {
    let siblings = cti_config::sibling_stage_dirs(current_pid)?;
    let mut reaped = Vec::new();

    for (pid, path) in siblings {
        if is_pid_alive(pid) {
            continue;
        }
        if !is_old_enough(&path) {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(pid, path = %path.display(), "reaped stale stage directory");
                reaped.push(ReapedDir { pid, path });
            }
            Err(e) => {
                tracing::warn!(pid, path = %path.display(), error = %e, "failed to reap stale stage directory");
            }
        }
    }

    Ok(reaped)
}

fn is_old_enough(path: &std::path::Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age >= MIN_STALE_AGE,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn leaves_live_pid_directories_alone() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("CTI_CFG_DIR", tmp.path());
        }
        cti_config::ensure_stage_dir(std::process::id()).unwrap();
        let reaped = reap_stale_dirs(999_999).unwrap();
        assert!(reaped.is_empty());
        unsafe {
            std::env::remove_var("CTI_CFG_DIR");
        }
    }

    #[test]
    fn skips_dead_pid_directories_that_are_too_new() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("CTI_CFG_DIR", tmp.path());
        }
        // A dead-looking pid that was just created: too new to reap.
        cti_config::ensure_stage_dir(123_456_789).unwrap();
        let reaped = reap_stale_dirs(std::process::id()).unwrap();
        assert!(reaped.is_empty());
        unsafe {
            std::env::remove_var("CTI_CFG_DIR");
        }
    }
}
