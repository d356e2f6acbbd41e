//! Manifests: a set of staged files attached to a [`crate::Session`],
//! building up a `(folder, basename) -> source path` map until shipped.

use std::collections::HashMap;
use std::path::PathBuf;

use cti_core::{CtiError, DepsPolicy, ManifestId, Result};

/// Names the original staging engine never ships because they are always
/// present on the compute node image; `create_manifest` pre-seeds every new
/// manifest's skip-set with these so a caller's `addLibrary` call for one of
/// them is a silent no-op rather than a wasted ship.
pub const IGNORED_LIBRARIES: &[&str] = &["ld-linux-x86-64.so.2", "libc.so.6", "libpthread.so.0", "libdl.so.2"];

/// One staged file, keyed by `(folder, basename)` at insertion time and
/// again when merged into the owning Session.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    pub folder: String,
    pub basename: String,
    pub source: PathBuf,
}

/// A manifest under construction. Fails every mutating call once shipped.
pub struct Manifest {
    id: ManifestId,
    entries: HashMap<(String, String), PathBuf>,
    lib_dirs: Vec<String>,
    shipped: bool,
}

impl Manifest {
    pub fn new(id: ManifestId) -> Self {
        Self {
            id,
            entries: HashMap::new(),
            lib_dirs: Vec::new(),
            shipped: false,
        }
    }

    pub fn id(&self) -> ManifestId {
        self.id
    }

    pub fn is_shipped(&self) -> bool {
        self.shipped
    }

    fn check_not_shipped(&self) -> Result<()> {
        if self.shipped {
            Err(CtiError::AlreadyShipped)
        } else {
            Ok(())
        }
    }

    /// Insert a resolved file under `folder`, enforcing the `(folder,
    /// basename)` uniqueness rule within this manifest.
    fn insert(&mut self, folder: &str, basename: &str, source: PathBuf) -> Result<()> {
        self.check_not_shipped()?;
        let key = (folder.to_string(), basename.to_string());
        if let Some(existing) = self.entries.get(&key)
            && existing != &source
        {
            return Err(CtiError::Conflict {
                folder: folder.to_string(),
                basename: basename.to_string(),
                existing: existing.display().to_string(),
                attempted: source.display().to_string(),
            });
        }
        self.entries.insert(key, source);
        Ok(())
    }

    /// Resolve `name` as a binary and add it under `bin/`. `deps_policy ==
    /// Stage` additionally walks its shared-object dependency closure and
    /// adds each library.
    pub fn add_binary(&mut self, name: &str, deps_policy: DepsPolicy) -> Result<()> {
        self.check_not_shipped()?;
        let resolved = cti_path::find_binary(name)?;
        let basename = cti_path::path_to_name(&resolved)
            .ok_or_else(|| CtiError::NotFound(name.to_string()))?
            .to_string();
        self.insert("bin", &basename, resolved.clone())?;

        if deps_policy == DepsPolicy::Stage {
            for dep in shared_object_closure(&resolved)? {
                self.add_library(&dep, DepsPolicy::NoDeps)?;
            }
        }
        Ok(())
    }

    /// Resolve `name` as a library and add it under `lib/`, skipping names
    /// in [`IGNORED_LIBRARIES`].
    pub fn add_library(&mut self, name: &str, deps_policy: DepsPolicy) -> Result<()> {
        self.check_not_shipped()?;
        if IGNORED_LIBRARIES.contains(&name) {
            return Ok(());
        }
        let resolved = cti_path::find_library(name)?;
        let basename = cti_path::path_to_name(&resolved)
            .ok_or_else(|| CtiError::NotFound(name.to_string()))?
            .to_string();
        self.insert("lib", &basename, resolved.clone())?;

        if deps_policy == DepsPolicy::Stage {
            for dep in shared_object_closure(&resolved)? {
                self.add_library(&dep, DepsPolicy::NoDeps)?;
            }
        }
        Ok(())
    }

    /// Record `path` as an extra remote library directory, to augment
    /// `LD_LIBRARY_PATH` on the backend.
    pub fn add_lib_dir(&mut self, path: &str) -> Result<()> {
        self.check_not_shipped()?;
        if !self.lib_dirs.iter().any(|d| d == path) {
            self.lib_dirs.push(path.to_string());
        }
        Ok(())
    }

    /// Resolve `name` via path rules and add it at the stage root.
    pub fn add_file(&mut self, name: &str) -> Result<()> {
        self.check_not_shipped()?;
        let resolved = cti_path::find_binary(name)?;
        let basename = cti_path::path_to_name(&resolved)
            .ok_or_else(|| CtiError::NotFound(name.to_string()))?
            .to_string();
        self.insert("", &basename, resolved)
    }

    pub fn lib_dirs(&self) -> &[String] {
        &self.lib_dirs
    }

    pub(crate) fn entries(&self) -> &HashMap<(String, String), PathBuf> {
        &self.entries
    }

    pub(crate) fn mark_shipped(&mut self) {
        self.shipped = true;
    }

    pub(crate) fn drain_entries(&mut self) -> HashMap<(String, String), PathBuf> {
        std::mem::take(&mut self.entries)
    }
}

/// Walk the shared-object dependency closure of `binary_or_lib` via the LD
/// audit helper. The real implementation shells out to a small LD_AUDIT
/// probe binary; this placeholder returns an empty closure, since the
/// audit helper itself lives outside this crate's scope.
fn shared_object_closure(_binary_or_lib: &std::path::Path) -> Result<Vec<String>> {
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::new(ManifestId::from_raw(1))
    }

    #[test]
    fn insert_same_key_same_path_is_idempotent() {
        let mut m = manifest();
        m.insert("bin", "foo", "/a/foo".into()).unwrap();
        m.insert("bin", "foo", "/a/foo".into()).unwrap();
        assert_eq!(m.entries().len(), 1);
    }

    #[test]
    fn insert_same_key_different_path_conflicts() {
        let mut m = manifest();
        m.insert("bin", "foo", "/a/foo".into()).unwrap();
        let err = m.insert("bin", "foo", "/b/foo".into()).unwrap_err();
        assert!(matches!(err, CtiError::Conflict { .. }));
    }

    #[test]
    fn mutating_a_shipped_manifest_fails() {
        let mut m = manifest();
        m.mark_shipped();
        let err = m.add_lib_dir("/extra/lib").unwrap_err();
        assert!(matches!(err, CtiError::AlreadyShipped));
    }

    #[test]
    fn add_library_skips_ignored_names() {
        let mut m = manifest();
        m.add_library("libc.so.6", DepsPolicy::NoDeps).unwrap();
        assert!(m.entries().is_empty());
    }

    #[test]
    fn add_lib_dir_deduplicates() {
        let mut m = manifest();
        m.add_lib_dir("/opt/lib").unwrap();
        m.add_lib_dir("/opt/lib").unwrap();
        assert_eq!(m.lib_dirs().len(), 1);
    }

    #[test]
    fn add_binary_resolves_and_stages_under_bin() {
        let mut m = manifest();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        m.add_binary(tmp.path().to_str().unwrap(), DepsPolicy::NoDeps).unwrap();
        assert_eq!(m.entries().len(), 1);
    }
}
