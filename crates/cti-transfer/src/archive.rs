//! GNU tar archive writer. Wraps `tar::Builder` and mirrors the original
//! archive writer's entry kinds: directories, regular files (copied through
//! a fixed-size buffer), and dedup symlinks.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use cti_core::Result;

/// Matches the original writer's read-buffer size; `tar::Builder` buffers
/// internally too, but staged files are streamed through a `BufReader` with
/// this explicit capacity rather than relying on the default.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A tar archive under construction. Entries are added in the order the
/// ship algorithm resolves them: the fixed `bin/`, `lib/`, `tmp/`
/// directories, then the manifest's own folders.
pub struct Archive {
    builder: tar::Builder<File>,
    archive_path: std::path::PathBuf,
    consumed: bool,
}

impl Archive {
    /// Create a new GNU-format tar file at `archive_path`.
    pub fn create(archive_path: &Path) -> Result<Self> {
        let file = File::create(archive_path)?;
        let mut builder = tar::Builder::new(file);
        builder.mode(tar::HeaderMode::Complete);
        Ok(Self {
            builder,
            archive_path: archive_path.to_path_buf(),
            consumed: false,
        })
    }

    /// Add an empty directory entry at `entry_path` with mode 0700, matching
    /// the original's `S_IRWXU`-only directory permissions.
    pub fn add_dir_entry(&mut self, entry_path: &str) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_path(entry_path)?;
        header.set_size(0);
        header.set_mode(0o700);
        header.set_mtime(now_unix());
        header.set_cksum();
        self.builder.append(&header, std::io::empty())?;
        Ok(())
    }

    /// Add a regular file at `entry_path`, copying the contents of
    /// `source_path` and preserving its mode.
    pub fn add_file(&mut self, entry_path: &str, source_path: &Path) -> Result<()> {
        let meta = std::fs::metadata(source_path)?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_path(entry_path)?;
        header.set_size(meta.len());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            header.set_mode(meta.permissions().mode() & 0o7777);
        }
        header.set_mtime(mtime_of(&meta));
        header.set_cksum();

        let file = File::open(source_path)?;
        let reader = BufReader::with_capacity(COPY_BUFFER_SIZE, file);
        self.builder.append(&header, reader)?;
        Ok(())
    }

    /// Recursively add a directory and its contents, mirroring the
    /// original's `opendir`/`readdir` walk (skipping `.`/`..`).
    pub fn add_dir(&mut self, entry_path: &str, dir_path: &Path) -> Result<()> {
        self.add_path(entry_path, dir_path)
    }

    /// Dispatch on file type: directories recurse, regular files are
    /// copied, anything else is rejected as the original's "invalid file
    /// type" case.
    pub fn add_path(&mut self, entry_path: &str, path: &Path) -> Result<()> {
        let meta = std::fs::symlink_metadata(path)?;
        if meta.is_dir() {
            self.add_dir_entry(entry_path)?;
            let mut entries: Vec<_> = std::fs::read_dir(path)?.collect::<std::io::Result<_>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                self.add_path(&format!("{entry_path}/{name}"), &entry.path())?;
            }
            Ok(())
        } else if meta.is_file() {
            self.add_file(entry_path, path)
        } else {
            Err(cti_core::CtiError::NotRegularFile(path.display().to_string()))
        }
    }

    /// Add a symlink entry (mode 0755), used for the `CTI_DEDUPLICATE_FILES`
    /// optimization: a file already present on every backend node is
    /// referenced instead of copied.
    pub fn add_link(&mut self, entry_path: &str, dest: &str) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_path(entry_path)?;
        header.set_size(0);
        header.set_mode(0o755);
        header.set_mtime(now_unix());
        header.set_cksum();
        self.builder.append_link(&mut header, entry_path, dest)?;
        Ok(())
    }

    /// Finish writing the archive. Consumes `self`; dropping without
    /// calling this removes the partial tar file.
    pub fn finish(mut self) -> Result<std::path::PathBuf> {
        self.builder.finish()?;
        self.consumed = true;
        Ok(self.archive_path.clone())
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if !self.consumed {
            let _ = std::fs::remove_file(&self.archive_path);
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn mtime_of(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_else(now_unix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_then_finish_produces_readable_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("hello.txt");
        std::fs::write(&src, b"hello world").unwrap();

        let archive_path = tmp.path().join("out.tar");
        let mut archive = Archive::create(&archive_path).unwrap();
        archive.add_dir_entry("stage/bin").unwrap();
        archive.add_file("stage/bin/hello.txt", &src).unwrap();
        archive.finish().unwrap();

        let contents = std::fs::read(&archive_path).unwrap();
        let mut reader = tar::Archive::new(contents.as_slice());
        let entries: Vec<_> = reader.entries().unwrap().collect::<std::io::Result<_>>().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn dropping_without_finish_removes_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("partial.tar");
        {
            let _archive = Archive::create(&archive_path).unwrap();
        }
        assert!(!archive_path.exists());
    }

    #[test]
    fn finish_keeps_the_file_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("kept.tar");
        let archive = Archive::create(&archive_path).unwrap();
        archive.finish().unwrap();
        assert!(archive_path.exists());
    }

    #[test]
    fn add_path_rejects_special_files() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_path = tmp.path().join("out.tar");
        let mut archive = Archive::create(&archive_path).unwrap();
        let err = archive.add_path("stage/fifo", Path::new("/dev/null")).unwrap_err();
        // /dev/null is a character device: neither dir nor regular file.
        assert!(matches!(err, cti_core::CtiError::NotRegularFile(_)));
    }

    #[test]
    fn add_dir_recurses_into_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let src_root = tmp.path().join("srcroot");
        std::fs::create_dir_all(src_root.join("nested")).unwrap();
        std::fs::write(src_root.join("a.txt"), b"a").unwrap();
        std::fs::write(src_root.join("nested/b.txt"), b"b").unwrap();

        let archive_path = tmp.path().join("out.tar");
        let mut archive = Archive::create(&archive_path).unwrap();
        archive.add_dir("stage/data", &src_root).unwrap();
        archive.finish().unwrap();

        let contents = std::fs::read(&archive_path).unwrap();
        let mut reader = tar::Archive::new(contents.as_slice());
        let paths: Vec<String> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(paths.contains(&"stage/data".to_string()));
        assert!(paths.contains(&"stage/data/a.txt".to_string()));
        assert!(paths.contains(&"stage/data/nested/b.txt".to_string()));
    }
}
