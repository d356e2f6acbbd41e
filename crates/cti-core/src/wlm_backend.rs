//! The `WlmBackend` seam: everything that differs between ALPS, Slurm,
//! PALS, Flux, and SSH is reached through this trait. `cti-app` owns the
//! registry of live backends; `cti-session`/`cti-transfer` call back into
//! one through this interface when shipping a manifest, so none of the
//! staging logic needs to know which WLM it is talking to.

use crate::Result;

/// Host placement for one launched or attached job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementInfo {
    pub num_pes: u32,
    pub hostnames: Vec<String>,
    /// rank -> index into `hostnames`.
    pub rank_to_host: Vec<usize>,
    /// binary path -> ranks running that binary.
    pub binary_to_ranks: std::collections::HashMap<String, Vec<u32>>,
}

/// Extra binaries/libraries/library-directories/files the WLM requires in
/// every manifest shipped for a given App (merged in on the session's first
/// ship, per spec.md §4.5 step 1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WlmExtras {
    pub binaries: Vec<String>,
    pub libraries: Vec<String>,
    pub lib_dirs: Vec<String>,
    pub files: Vec<String>,
}

/// Where an App's stdin should come from when launched.
#[derive(Debug, Clone)]
pub enum Stdin {
    Path(std::path::PathBuf),
    Fd(i32),
    None,
}

/// Whether a launch should hold the launcher at the MPIR barrier pending an
/// explicit release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    Set,
    Unset,
}

/// Parameters common to every `launch_app*` entry point; they all reduce to
/// one underlying `WlmBackend::launch` call.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Stdin,
    pub chdir: Option<std::path::PathBuf>,
    pub barrier: Barrier,
}

/// A WLM-specific job identifier, opaque to everything above this trait.
pub type WlmJobId = String;

/// The per-WLM collaborator `cti-app`'s launch API and `cti-session`'s ship
/// algorithm are built against. Implemented once per WLM in a backend
/// crate outside this workspace's scope; `MockWlmBackend` (in `cti-app`)
/// stands in for tests.
pub trait WlmBackend: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<WlmJobId>;
    fn register_job(&self, job_id: WlmJobId) -> Result<()>;
    fn kill(&self, job_id: &WlmJobId, signal: i32) -> Result<()>;
    fn is_running(&self, job_id: &WlmJobId) -> Result<bool>;
    fn placement(&self, job_id: &WlmJobId) -> Result<PlacementInfo>;
    fn extras(&self, job_id: &WlmJobId) -> Result<WlmExtras>;

    /// Ship `archive_path` (a built tarball) to every node of `job_id`.
    /// Returns the archive's basename for reuse by the daemon launch.
    fn ship_package(&self, job_id: &WlmJobId, archive_path: &std::path::Path) -> Result<String>;

    /// Launch the per-node daemon launcher with `argv`; synchronous start
    /// blocks until the launcher returns, matching spec.md §4.5's use for
    /// cleanup and first-ship unpack-failure detection.
    fn start_daemon(&self, job_id: &WlmJobId, argv: &[String], synchronous: bool) -> Result<()>;

    /// Which of `candidate_paths` already exist, verbatim, on every node of
    /// `job_id` — the `CTI_DEDUPLICATE_FILES` optimization's backend query.
    fn check_files_exist(&self, job_id: &WlmJobId, candidate_paths: &[String]) -> Result<Vec<String>>;
}
