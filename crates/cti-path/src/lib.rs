//! Binary and shared-library resolution, mirroring the search order the
//! original staging engine used when a caller supplied a bare name instead
//! of a path: absolute and relative paths pass through unchanged (after a
//! regular-file check); bare names are searched for.

use std::path::{Path, PathBuf};
use std::process::Command;

use cti_core::{CtiError, Result};

/// Fixed fallback search path consulted after `LD_LIBRARY_PATH` and
/// `ldconfig` both fail to locate a library, matching the original
/// staging engine's last-resort list.
const FALLBACK_LIB_DIRS: &[&str] = &["/lib64", "/usr/lib64", "/lib", "/usr/lib"];

fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Resolve `name` to an absolute path to a regular, readable file.
///
/// If `name` contains a `/`, it is treated as an absolute or relative path
/// and returned as-is once verified to be a regular file. Otherwise `name`
/// is searched for on `PATH`.
pub fn find_binary(name: &str) -> Result<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return if is_regular_file(&path) {
            Ok(path)
        } else {
            Err(CtiError::NotFound(name.to_string()))
        };
    }

    which::which(name).map_err(|_| CtiError::NotFound(name.to_string()))
}

/// Resolve `name` to an absolute path to a shared library, searching in
/// order: a direct path (if `name` contains `/`), `LD_LIBRARY_PATH`,
/// `ldconfig -p`, then [`FALLBACK_LIB_DIRS`].
pub fn find_library(name: &str) -> Result<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return if is_regular_file(&path) {
            Ok(path)
        } else {
            Err(CtiError::NotFound(name.to_string()))
        };
    }

    if let Some(found) = search_ld_library_path(name) {
        return Ok(found);
    }

    if let Some(found) = search_ldconfig(name) {
        return Ok(found);
    }

    for dir in FALLBACK_LIB_DIRS {
        let candidate = Path::new(dir).join(name);
        if is_regular_file(&candidate) {
            return Ok(candidate);
        }
    }

    Err(CtiError::NotFound(name.to_string()))
}

fn search_ld_library_path(name: &str) -> Option<PathBuf> {
    let ld_path = std::env::var_os("LD_LIBRARY_PATH")?;
    for dir in std::env::split_paths(&ld_path) {
        let candidate = dir.join(name);
        if is_regular_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Query `ldconfig -p` for `name`, parsing lines of the form
/// `libfoo.so.1 (libc6,x86-64) => /lib/x86_64-linux-gnu/libfoo.so.1`.
fn search_ldconfig(name: &str) -> Option<PathBuf> {
    let output = Command::new("ldconfig").arg("-p").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let line = line.trim();
        let Some((lib_part, path_part)) = line.split_once("=>") else {
            continue;
        };
        let lib_name = lib_part.split_whitespace().next().unwrap_or("");
        if lib_name == name {
            let candidate = PathBuf::from(path_part.trim());
            if is_regular_file(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// The final path component, mirroring `_cti_pathToName`'s basename
/// extraction used when staging a resolved binary or library under the
/// manifest's `bin/`/`lib/` directory.
pub fn path_to_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_binary_passes_through_regular_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        let resolved = find_binary(path.to_str().unwrap()).unwrap();
        assert_eq!(resolved, path);
    }

    #[test]
    fn find_binary_rejects_missing_path_with_slash() {
        let err = find_binary("/no/such/binary-xyz").unwrap_err();
        assert!(matches!(err, CtiError::NotFound(_)));
    }

    #[test]
    fn find_binary_searches_path_for_bare_name() {
        let resolved = find_binary("ls");
        assert!(resolved.is_ok());
    }

    #[test]
    fn find_library_rejects_missing_path_with_slash() {
        let err = find_library("/no/such/library-xyz.so").unwrap_err();
        assert!(matches!(err, CtiError::NotFound(_)));
    }

    #[test]
    fn find_library_checks_ld_library_path() {
        let tmp = tempfile::tempdir().unwrap();
        let lib_path = tmp.path().join("libtestonly123.so");
        std::fs::write(&lib_path, b"").unwrap();
        unsafe {
            std::env::set_var("LD_LIBRARY_PATH", tmp.path());
        }
        let resolved = find_library("libtestonly123.so").unwrap();
        assert_eq!(resolved, lib_path);
        unsafe {
            std::env::remove_var("LD_LIBRARY_PATH");
        }
    }

    #[test]
    fn path_to_name_extracts_basename() {
        assert_eq!(
            path_to_name(Path::new("/usr/bin/foo")),
            Some("foo")
        );
    }
}
