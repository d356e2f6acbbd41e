//! The archive-building half of the ship algorithm: given a resolved set of
//! entries (regular files and dedup symlinks), build one GNU tar rooted at
//! `<stage_name>/` with the fixed `bin/`, `lib/`, `tmp/` subdirectories.

use std::path::{Path, PathBuf};

use cti_core::Result;

use crate::archive::Archive;

/// One file the ship algorithm has resolved to either a real source path or
/// a dedup symlink target.
#[derive(Debug, Clone)]
pub enum PlanEntry {
    /// Copy `source` into the archive at `folder/basename`.
    File { folder: String, basename: String, source: PathBuf },
    /// Emit a symlink at `folder/basename` pointing at `target` instead of
    /// copying file contents, because the backend already has this file.
    Symlink { folder: String, basename: String, target: String },
}

/// The fixed top-level subdirectories every manifest stage root carries,
/// regardless of whether any entry lands in them.
const FIXED_SUBDIRS: [&str; 3] = ["bin", "lib", "tmp"];

/// Build a tar archive at `archive_path` rooted at `<stage_name>/`,
/// containing the fixed subdirectories plus `entries`.
pub fn build_archive(archive_path: &Path, stage_name: &str, entries: &[PlanEntry]) -> Result<PathBuf> {
    let mut archive = Archive::create(archive_path)?;
    archive.add_dir_entry(stage_name)?;

    let mut seen_folders = std::collections::HashSet::new();
    for subdir in FIXED_SUBDIRS {
        archive.add_dir_entry(&format!("{stage_name}/{subdir}"))?;
        seen_folders.insert(subdir.to_string());
    }

    for entry in entries {
        let folder = match entry {
            PlanEntry::File { folder, .. } => folder,
            PlanEntry::Symlink { folder, .. } => folder,
        };
        if seen_folders.insert(folder.clone()) {
            archive.add_dir_entry(&format!("{stage_name}/{folder}"))?;
        }
    }

    for entry in entries {
        match entry {
            PlanEntry::File { folder, basename, source } => {
                archive.add_file(&format!("{stage_name}/{folder}/{basename}"), source)?;
            }
            PlanEntry::Symlink { folder, basename, target } => {
                archive.add_link(&format!("{stage_name}/{folder}/{basename}"), target)?;
            }
        }
    }

    archive.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_archive_includes_fixed_subdirs_and_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("daemon");
        std::fs::write(&src, b"binary contents").unwrap();

        let archive_path = tmp.path().join("manifest.tar");
        let entries = vec![PlanEntry::File {
            folder: "bin".into(),
            basename: "daemon".into(),
            source: src.clone(),
        }];
        build_archive(&archive_path, "cti_daemonAB12CD", &entries).unwrap();

        let contents = std::fs::read(&archive_path).unwrap();
        let mut reader = tar::Archive::new(contents.as_slice());
        let paths: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(paths.contains(&"cti_daemonAB12CD/lib".to_string()));
        assert!(paths.contains(&"cti_daemonAB12CD/tmp".to_string()));
        assert!(paths.contains(&"cti_daemonAB12CD/bin/daemon".to_string()));
    }

    #[test]
    fn build_archive_emits_symlink_entries_for_dedup() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("manifest.tar");
        let entries = vec![PlanEntry::Symlink {
            folder: "lib".into(),
            basename: "libc.so.6".into(),
            target: "/lib64/libc.so.6".into(),
        }];
        build_archive(&archive_path, "stage", &entries).unwrap();

        let contents = std::fs::read(&archive_path).unwrap();
        let mut reader = tar::Archive::new(contents.as_slice());
        let entry = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().ends_with("libc.so.6"))
            .unwrap();
        assert_eq!(entry.header().entry_type(), tar::EntryType::Symlink);
    }
}
