//! A Session: one App's staging area across however many manifests get
//! shipped to it over its lifetime. Tracks what has already landed on the
//! backend so later ships can skip or dedup against it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use cti_core::{CtiError, ManifestId, Result, SessionId, WlmBackend, WlmExtras};

use crate::manifest::Manifest;
use cti_transfer::{PlanEntry, build_archive};

/// Random suffix length used when naming a session's stage directory,
/// matching the original six-character suffix convention.
const STAGE_SUFFIX_LEN: usize = 6;

/// One ship's resolved output: the archive built on disk plus its basename
/// as reported back by the backend.
pub struct ShipResult {
    pub archive_path: PathBuf,
    pub archive_basename: String,
}

/// A Session owns one App's staging namespace: every file shipped through
/// any of its manifests is tracked here so a later manifest can detect a
/// conflicting restage or skip a redundant one.
pub struct Session {
    id: SessionId,
    stage_name: String,
    next_manifest_id: u64,
    shipped_seq: u32,
    /// `(folder, basename) -> canonical source path`, across every manifest
    /// shipped so far.
    sources: HashMap<(String, String), PathBuf>,
    /// `folder -> basenames`, mirroring `sources`'s keys for quick listing.
    folders: HashMap<String, HashSet<String>>,
    extra_lib_dirs: Vec<String>,
    requirements_added: bool,
}

impl Session {
    pub fn new(id: SessionId, stage_name: String) -> Self {
        Self {
            id,
            stage_name,
            next_manifest_id: 1,
            shipped_seq: 0,
            sources: HashMap::new(),
            folders: HashMap::new(),
            extra_lib_dirs: Vec::new(),
            requirements_added: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn shipped_seq(&self) -> u32 {
        self.shipped_seq
    }

    pub fn create_manifest(&mut self) -> Manifest {
        let id = ManifestId::from_raw(self.next_manifest_id);
        self.next_manifest_id += 1;
        Manifest::new(id)
    }

    /// Ship `manifest` to `job_id` over `backend`, building a tar archive at
    /// `archive_path` and returning its path and reported basename.
    ///
    /// Implements the eight-step ship algorithm: merge WLM extras once,
    /// classify every entry as new/skip/conflict against this session's
    /// accumulated file set, dedup-symlink anything the backend already has
    /// (when `deduplicate` is set), build the archive, and ship it.
    pub fn ship(
        &mut self,
        manifest: &mut Manifest,
        backend: &dyn WlmBackend,
        job_id: &str,
        archive_path: &Path,
        deduplicate: bool,
    ) -> Result<ShipResult> {
        if manifest.is_shipped() {
            return Err(CtiError::AlreadyShipped);
        }

        if !self.requirements_added {
            let extras = backend.extras(&job_id.to_string())?;
            self.merge_extras(manifest, &extras)?;
            self.requirements_added = true;
        }

        let entries = manifest.drain_entries();
        let to_ship = self.merge_transferred(entries)?;

        let plan = self.build_plan(backend, job_id, to_ship, deduplicate)?;

        let archive_path = build_archive(archive_path, &self.stage_name, &plan)?;
        let archive_basename = backend.ship_package(&job_id.to_string(), &archive_path)?;

        manifest.mark_shipped();
        self.shipped_seq += 1;

        Ok(ShipResult {
            archive_path,
            archive_basename,
        })
    }

    /// Merge a backend's required extras into `manifest`, skipping anything
    /// already present (by path) anywhere in this session.
    fn merge_extras(&self, manifest: &mut Manifest, extras: &WlmExtras) -> Result<()> {
        for binary in &extras.binaries {
            manifest.add_binary(binary, cti_core::DepsPolicy::NoDeps)?;
        }
        for library in &extras.libraries {
            manifest.add_library(library, cti_core::DepsPolicy::NoDeps)?;
        }
        for dir in &extras.lib_dirs {
            manifest.add_lib_dir(dir)?;
        }
        for file in &extras.files {
            manifest.add_file(file)?;
        }
        Ok(())
    }

    /// Classify every entry in a just-drained manifest against this
    /// session's already-shipped set: identical path at the same
    /// `(folder, basename)` is a silent skip (already on the node from a
    /// prior ship); a different path at the same key is a conflict; anything
    /// new is recorded and returned for shipping.
    fn merge_transferred(
        &mut self,
        entries: HashMap<(String, String), PathBuf>,
    ) -> Result<Vec<((String, String), PathBuf)>> {
        let mut to_ship = Vec::new();
        for (key, source) in entries {
            let canonical = canonicalize_lenient(&source);
            match self.sources.get(&key) {
                Some(existing) if canonicalize_lenient(existing) == canonical => {
                    // Already shipped from the same source: skip silently.
                }
                Some(existing) => {
                    return Err(CtiError::Conflict {
                        folder: key.0,
                        basename: key.1,
                        existing: existing.display().to_string(),
                        attempted: source.display().to_string(),
                    });
                }
                None => {
                    self.sources.insert(key.clone(), source.clone());
                    self.folders.entry(key.0.clone()).or_default().insert(key.1.clone());
                    to_ship.push((key, source));
                }
            }
        }
        Ok(to_ship)
    }

    /// Turn the new entries for this ship into a tar plan, consulting the
    /// backend's `check_files_exist` to decide which can be a dedup symlink
    /// instead of a file copy.
    fn build_plan(
        &self,
        backend: &dyn WlmBackend,
        job_id: &str,
        to_ship: Vec<((String, String), PathBuf)>,
        deduplicate: bool,
    ) -> Result<Vec<PlanEntry>> {
        if to_ship.is_empty() {
            return Ok(Vec::new());
        }

        let existing: HashSet<String> = if deduplicate {
            let candidates: Vec<String> = to_ship
                .iter()
                .map(|(_, source)| source.display().to_string())
                .collect();
            backend
                .check_files_exist(&job_id.to_string(), &candidates)?
                .into_iter()
                .collect()
        } else {
            HashSet::new()
        };

        let mut plan = Vec::with_capacity(to_ship.len());
        for ((folder, basename), source) in to_ship {
            let source_str = source.display().to_string();
            if existing.contains(&source_str) {
                plan.push(PlanEntry::Symlink {
                    folder,
                    basename,
                    target: source_str,
                });
            } else {
                plan.push(PlanEntry::File { folder, basename, source });
            }
        }
        Ok(plan)
    }

    pub fn extra_lib_dirs(&self) -> &[String] {
        &self.extra_lib_dirs
    }

    pub fn folders(&self) -> &HashMap<String, HashSet<String>> {
        &self.folders
    }
}

/// Canonicalize for comparison, falling back to the path as given when the
/// file has since disappeared (a session's bookkeeping outlives any one
/// source file's existence).
fn canonicalize_lenient(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Generate a stage name of the form `<prefix><6 random alphanumerics>`,
/// matching the original daemon's naming convention for per-session stage
/// directories.
pub fn random_stage_name(prefix: &str) -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..STAGE_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect();
    format!("{prefix}{suffix}")
}
