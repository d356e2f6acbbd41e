//! An in-memory [`cti_core::WlmBackend`] for tests: no subprocesses, no
//! filesystem shipping, just enough bookkeeping to exercise the App/Session
//! layers end to end.

#![cfg(any(test, feature = "mock-backend"))]

use std::collections::HashMap;
use std::sync::{Mutex, atomic::{AtomicU64, Ordering}};

use cti_core::{LaunchSpec, PlacementInfo, Result, WlmBackend, WlmExtras, WlmJobId};

struct JobState {
    running: bool,
    placement: PlacementInfo,
    extras: WlmExtras,
    shipped: Vec<std::path::PathBuf>,
    present_on_node: Vec<String>,
    daemon_started: bool,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            running: false,
            placement: PlacementInfo {
                num_pes: 1,
                hostnames: vec!["localhost".to_string()],
                rank_to_host: vec![0],
                binary_to_ranks: HashMap::new(),
            },
            extras: WlmExtras::default(),
            shipped: Vec::new(),
            present_on_node: Vec::new(),
            daemon_started: false,
        }
    }
}

/// A `WlmBackend` that keeps all job state in memory, for tests of the App
/// launch API and the Session ship algorithm that don't want a real WLM or
/// frontend daemon.
pub struct MockWlmBackend {
    next_job: AtomicU64,
    jobs: Mutex<HashMap<WlmJobId, JobState>>,
}

impl MockWlmBackend {
    pub fn new() -> Self {
        Self {
            next_job: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Mark that `path` is already present on every node of `job_id`, for
    /// tests of the `CTI_DEDUPLICATE_FILES` path.
    pub fn mark_present_on_node(&self, job_id: &str, path: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.entry(job_id.to_string()).or_default().present_on_node.push(path.to_string());
    }

    /// Install the extras a real WLM would declare as required in every
    /// manifest ship.
    pub fn set_extras(&self, job_id: &str, extras: WlmExtras) {
        self.jobs.lock().unwrap().entry(job_id.to_string()).or_default().extras = extras;
    }

    pub fn shipped_archives(&self, job_id: &str) -> Vec<std::path::PathBuf> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .map(|j| j.shipped.clone())
            .unwrap_or_default()
    }
}

impl Default for MockWlmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WlmBackend for MockWlmBackend {
    fn launch(&self, _spec: &LaunchSpec) -> Result<WlmJobId> {
        let id = self.next_job.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("mock-job-{id}");
        self.jobs.lock().unwrap().insert(
            job_id.clone(),
            JobState {
                running: true,
                ..Default::default()
            },
        );
        Ok(job_id)
    }

    fn register_job(&self, job_id: WlmJobId) -> Result<()> {
        self.jobs.lock().unwrap().entry(job_id).or_insert(JobState {
            running: true,
            ..Default::default()
        });
        Ok(())
    }

    fn kill(&self, job_id: &WlmJobId, signal: i32) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(job_id)
            && signal != 0
        {
            job.running = false;
        }
        Ok(())
    }

    fn is_running(&self, job_id: &WlmJobId) -> Result<bool> {
        Ok(self.jobs.lock().unwrap().get(job_id).map(|j| j.running).unwrap_or(false))
    }

    fn placement(&self, job_id: &WlmJobId) -> Result<PlacementInfo> {
        Ok(self.jobs.lock().unwrap().get(job_id).map(|j| j.placement.clone()).unwrap_or_default())
    }

    fn extras(&self, job_id: &WlmJobId) -> Result<WlmExtras> {
        Ok(self.jobs.lock().unwrap().get(job_id).map(|j| j.extras.clone()).unwrap_or_default())
    }

    fn ship_package(&self, job_id: &WlmJobId, archive_path: &std::path::Path) -> Result<String> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.entry(job_id.clone()).or_default();
        job.shipped.push(archive_path.to_path_buf());
        Ok(archive_path.file_name().unwrap().to_string_lossy().into_owned())
    }

    fn start_daemon(&self, job_id: &WlmJobId, _argv: &[String], _synchronous: bool) -> Result<()> {
        self.jobs.lock().unwrap().entry(job_id.clone()).or_default().daemon_started = true;
        Ok(())
    }

    fn check_files_exist(&self, job_id: &WlmJobId, candidate_paths: &[String]) -> Result<Vec<String>> {
        let jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get(job_id) else {
            return Ok(Vec::new());
        };
        Ok(candidate_paths
            .iter()
            .filter(|p| job.present_on_node.iter().any(|present| present == *p))
            .cloned()
            .collect())
    }
}
