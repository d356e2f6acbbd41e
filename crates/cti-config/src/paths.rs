//! Per-pid stage and config directory resolution (spec.md §3, §4.1).
//!
//! Every `Frontend` owns exactly one stage directory for its process
//! lifetime, named after the calling process's pid so concurrent CTI
//! processes on the same login node never collide.

use std::path::{Path, PathBuf};

use cti_core::{CtiError, Result};

/// `CTI_CFG_DIR` — overrides the top-level directory stage/config
/// directories are created under.
const CFG_DIR_ENV_VAR: &str = "CTI_CFG_DIR";

fn effective_uid() -> u32 {
    // SAFETY: getuid() has no preconditions and never fails.
    unsafe { libc::geteuid() }
}

fn username_for_uid(uid: u32) -> String {
    // Avoid a libc `getpwuid_r` FFI round trip for what is purely a
    // directory-naming concern; fall back to the numeric uid if the
    // environment doesn't know its own username.
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| uid.to_string())
}

/// Resolve the top-level CTI directory: `CTI_CFG_DIR` if set, else
/// `$TMPDIR/cti-<user>` (falling back to `/tmp` when `TMPDIR` is unset).
pub fn top_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CFG_DIR_ENV_VAR) {
        return PathBuf::from(dir);
    }
    let tmp = std::env::var_os("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    tmp.join(format!("cti-{}", username_for_uid(effective_uid())))
}

/// The stage directory for a single CTI process: `<top_dir>/<pid>`.
pub fn stage_dir_for_pid(pid: u32) -> PathBuf {
    top_dir().join(pid.to_string())
}

/// Create (or validate an existing) stage directory for the calling
/// process, enforcing spec.md §8's ownership and mode invariants: the
/// directory must be owned by the calling uid and mode 0700, whether newly
/// created or inherited from a previous run that left it behind.
pub fn ensure_stage_dir(pid: u32) -> Result<PathBuf> {
    let top = top_dir();
    std::fs::create_dir_all(&top)?;

    let dir = stage_dir_for_pid(pid);
    match std::fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            validate_ownership_and_mode(&dir)?;
        }
        Err(e) => return Err(e.into()),
    }
    set_private_mode(&dir)?;
    Ok(dir)
}

fn validate_ownership_and_mode(dir: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(dir)?;
    let uid = effective_uid();
    if meta.uid() != uid {
        return Err(CtiError::PermissionDenied {
            path: dir.display().to_string(),
            reason: format!("owned by uid {}, expected {}", meta.uid(), uid),
        });
    }
    Ok(())
}

fn set_private_mode(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(0o700);
    std::fs::set_permissions(dir, perms)?;
    Ok(())
}

/// Stale-sibling stage directories: other `<pid>` directories under
/// `top_dir()` whose pid no longer corresponds to a running process.
/// `cti-resource` owns the reaping policy; this just enumerates candidates.
pub fn sibling_stage_dirs(exclude_pid: u32) -> Result<Vec<(u32, PathBuf)>> {
    let top = top_dir();
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(&top) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(pid) = name.parse::<u32>() else {
            continue;
        };
        if pid != exclude_pid {
            out.push((pid, entry.path()));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn top_dir_honors_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(CFG_DIR_ENV_VAR, tmp.path());
        }
        assert_eq!(top_dir(), tmp.path());
        unsafe {
            std::env::remove_var(CFG_DIR_ENV_VAR);
        }
    }

    #[test]
    fn ensure_stage_dir_creates_private_dir() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(CFG_DIR_ENV_VAR, tmp.path());
        }
        let dir = ensure_stage_dir(424242).unwrap();
        assert!(dir.is_dir());

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);

        unsafe {
            std::env::remove_var(CFG_DIR_ENV_VAR);
        }
    }

    #[test]
    fn ensure_stage_dir_is_idempotent() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(CFG_DIR_ENV_VAR, tmp.path());
        }
        let first = ensure_stage_dir(424243).unwrap();
        let second = ensure_stage_dir(424243).unwrap();
        assert_eq!(first, second);
        unsafe {
            std::env::remove_var(CFG_DIR_ENV_VAR);
        }
    }

    #[test]
    fn sibling_stage_dirs_excludes_self() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(CFG_DIR_ENV_VAR, tmp.path());
        }
        ensure_stage_dir(111).unwrap();
        ensure_stage_dir(222).unwrap();
        let siblings = sibling_stage_dirs(111).unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].0, 222);
        unsafe {
            std::env::remove_var(CFG_DIR_ENV_VAR);
        }
    }

    #[test]
    fn sibling_stage_dirs_empty_when_top_missing() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("does-not-exist");
        unsafe {
            std::env::set_var(CFG_DIR_ENV_VAR, &missing);
        }
        assert!(sibling_stage_dirs(1).unwrap().is_empty());
        unsafe {
            std::env::remove_var(CFG_DIR_ENV_VAR);
        }
    }
}
