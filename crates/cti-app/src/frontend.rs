//! The Frontend: a process-wide singleton owning the detected WLM backend,
//! the tunables every launch path consults, and the App/Session/Manifest
//! handle tables.
//!
//! The three tables live in one [`Registry`] behind a single mutex (spec.md
//! §5): a `SessionId` is only ever looked up alongside the App it belongs
//! to and a `ManifestId` alongside its Session, so one lock covers every
//! lookup a caller can make, and each handle type's allocator hands out
//! values that are unique for the life of the process regardless of which
//! App or Session requested them.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use cti_core::{
    AppId, ConstructingPid, CtiError, DetectedWlm, HandleAllocator, ManifestId, Result, SessionId, SystemKind, WlmBackend,
    WlmKind,
};
use cti_mpir::MpirHandle;
use cti_session::{Manifest, Session};
use cti_wlm_detect::{RealCommandRunner, verify_eproxy, verify_flux, verify_launcher, verify_pals, verify_slurm_single_cluster};

static FRONTEND: OnceLock<Frontend> = OnceLock::new();

/// Bookkeeping for one launched or attached job (spec.md §3 App attributes).
pub(crate) struct AppEntry {
    pub wlm_job_id: String,
    pub mpir_handle: Option<MpirHandle>,
    pub daemon_suffix: String,
}

pub(crate) struct SessionEntry {
    pub app_id: AppId,
    pub session: Session,
}

pub(crate) struct ManifestEntry {
    pub app_id: AppId,
    pub session_id: SessionId,
    pub manifest: Manifest,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub apps: HashMap<AppId, AppEntry>,
    pub sessions: HashMap<SessionId, SessionEntry>,
    pub manifests: HashMap<ManifestId, ManifestEntry>,
}

/// Process-wide CTI state: constructed exactly once (spec.md §3 Frontend
/// invariant). A forked child re-entering this library observes the same
/// `OnceLock` cell but `constructing_pid.is_original_process()` is false,
/// signalling destructors to skip global cleanup.
pub struct Frontend {
    constructing_pid: ConstructingPid,
    detected: DetectedWlm,
    tunables: cti_config::Tunables,
    saved_ld_preload: Option<String>,
    backend: Box<dyn WlmBackend>,
    registry: Mutex<Registry>,
    app_handles: HandleAllocator,
    session_handles: HandleAllocator,
    manifest_handles: HandleAllocator,
}

impl Frontend {
    /// Access the singleton, constructing it on first call with a detected
    /// backend. Subsequent calls, including from a forked child, return the
    /// same instance.
    pub fn get_or_init(backend_factory: impl FnOnce(DetectedWlm) -> Box<dyn WlmBackend>) -> Result<&'static Frontend> {
        if let Some(fe) = FRONTEND.get() {
            return Ok(fe);
        }
        let tunables = cti_config::Tunables::from_env();
        let launcher_name = tunables.launcher_name_override.clone().unwrap_or_default();
        let detected = cti_wlm_detect::detect(&launcher_name)?;
        verify_detection(&tunables, &detected, &launcher_name)?;
        let saved_ld_preload = cti_config::capture_and_clear_ld_preload();
        let backend = backend_factory(detected);

        let frontend = Frontend {
            constructing_pid: ConstructingPid::capture(),
            detected,
            tunables,
            saved_ld_preload,
            backend,
            registry: Mutex::new(Registry::default()),
            app_handles: HandleAllocator::new(),
            session_handles: HandleAllocator::new(),
            manifest_handles: HandleAllocator::new(),
        };
        Ok(FRONTEND.get_or_init(|| frontend))
    }

    /// Access the already-initialized singleton, failing if it hasn't been
    /// constructed yet (every public entry point that isn't itself the
    /// constructor should go through this).
    pub fn instance() -> Result<&'static Frontend> {
        FRONTEND
            .get()
            .ok_or_else(|| CtiError::Fatal("Frontend not initialized".to_string()))
    }

    pub fn detected(&self) -> DetectedWlm {
        self.detected
    }

    pub fn tunables(&self) -> &cti_config::Tunables {
        &self.tunables
    }

    pub fn saved_ld_preload(&self) -> Option<&str> {
        self.saved_ld_preload.as_deref()
    }

    pub fn backend(&self) -> &dyn WlmBackend {
        self.backend.as_ref()
    }

    pub fn is_original_process(&self) -> bool {
        self.constructing_pid.is_original_process()
    }

    pub(crate) fn registry(&self) -> &Mutex<Registry> {
        &self.registry
    }

    pub(crate) fn alloc_app_id(&self) -> AppId {
        AppId::from_raw(self.app_handles.allocate())
    }

    pub(crate) fn alloc_session_id(&self) -> SessionId {
        SessionId::from_raw(self.session_handles.allocate())
    }

    pub(crate) fn alloc_manifest_id(&self) -> ManifestId {
        ManifestId::from_raw(self.manifest_handles.allocate())
    }
}

/// Run the mandatory post-detection check for the detected WLM (spec.md
/// §4.1: detection without verification is not trusted). Eproxy is only
/// checked on a Slurm cluster fronted by an eproxy gateway, the combination
/// `probe_filesystem_markers` flags as [`SystemKind::Eproxy`].
fn verify_detection(tunables: &cti_config::Tunables, detected: &DetectedWlm, launcher_name: &str) -> Result<()> {
    let runner = RealCommandRunner;
    match detected.wlm {
        WlmKind::Alps | WlmKind::Slurm => {
            let launcher_path = if tunables.launcher_is_script {
                launcher_name.to_string()
            } else {
                cti_path::find_binary(launcher_name)?.display().to_string()
            };
            verify_launcher(&runner, &launcher_path, detected, tunables.launcher_is_script)?;
            if detected.wlm == WlmKind::Slurm {
                verify_slurm_single_cluster(&runner, tunables.override_multicluster)?;
                if detected.system == SystemKind::Eproxy {
                    verify_eproxy(&runner, tunables.override_eproxy)?;
                }
            }
            Ok(())
        }
        WlmKind::Pals => verify_pals(&runner),
        WlmKind::Flux => verify_flux(tunables.flux_uri.as_deref(), tunables.libflux_path_override.as_deref()),
        WlmKind::Ssh | WlmKind::Mock | WlmKind::Localhost | WlmKind::None => Ok(()),
    }
}
