//! The launch API, and the App/Session/Manifest registry operations that
//! back it (spec.md §4.4). Every lookup goes through `Frontend`'s single
//! [`Registry`](crate::frontend::Registry) mutex, so a `SessionId` or
//! `ManifestId` returned here is unique for the life of the process, not
//! just within the App or Session that produced it.

use cti_core::{AppId, Barrier, CtiError, DepsPolicy, LaunchSpec, ManifestId, PlacementInfo, Result, SessionId, Stdin, WlmExtras};
use cti_session::{Session, ShipResult};

use crate::frontend::{AppEntry, Frontend, ManifestEntry, SessionEntry};

/// Random suffix length for a backend-daemon filename, keeping concurrent
/// Apps on the same node from colliding (spec.md §3 App attributes).
const DAEMON_SUFFIX_LEN: usize = 6;

fn random_suffix() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..DAEMON_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Parameters common to the four `launch_app*` entry points, before they
/// are validated and turned into a [`LaunchSpec`].
pub struct LaunchRequest {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Stdin,
    pub chdir: Option<std::path::PathBuf>,
    pub barrier: Barrier,
}

fn validate(request: &LaunchRequest) -> Result<()> {
    if let Stdin::Path(path) = &request.stdin
        && std::fs::File::open(path).is_err()
    {
        return Err(CtiError::PermissionDenied {
            path: path.display().to_string(),
            reason: "stdin path is not readable".to_string(),
        });
    }
    if let Some(chdir) = &request.chdir {
        let meta = std::fs::metadata(chdir).map_err(|_| CtiError::NotFound(chdir.display().to_string()))?;
        if !meta.is_dir() {
            return Err(CtiError::NotRegularFile(chdir.display().to_string()));
        }
    }
    Ok(())
}

/// Rewrite `env` so `LD_PRELOAD` carries the Frontend's saved value ahead
/// of any caller-supplied one (spec.md §4.4 step 2).
fn rewrite_ld_preload(frontend: &Frontend, env: Vec<(String, String)>) -> Vec<(String, String)> {
    let Some(saved) = frontend.saved_ld_preload() else {
        return env;
    };
    let mut out = Vec::with_capacity(env.len() + 1);
    let mut replaced = false;
    for (key, value) in env {
        if key == "LD_PRELOAD" {
            out.push((key, cti_config::merge_ld_preload(saved, Some(&value))));
            replaced = true;
        } else {
            out.push((key, value));
        }
    }
    if !replaced {
        out.push(("LD_PRELOAD".to_string(), saved.to_string()));
    }
    out
}

fn insert_app(frontend: &'static Frontend, wlm_job_id: String) -> AppId {
    let app_id = frontend.alloc_app_id();
    let entry = AppEntry {
        wlm_job_id,
        mpir_handle: None,
        daemon_suffix: random_suffix(),
    };
    frontend.registry().lock().unwrap().apps.insert(app_id, entry);
    app_id
}

/// The single launch implementation every `launch_app*` entry point
/// reduces to (spec.md §4.4): validate, rewrite `LD_PRELOAD`, delegate to
/// the WLM backend, then register the resulting App.
fn launch_impl(frontend: &'static Frontend, request: LaunchRequest) -> Result<AppId> {
    validate(&request)?;
    let env = rewrite_ld_preload(frontend, request.env);
    let spec = LaunchSpec {
        argv: request.argv,
        env,
        stdin: request.stdin,
        chdir: request.chdir,
        barrier: request.barrier,
    };
    let wlm_job_id = frontend.backend().launch(&spec)?;
    Ok(insert_app(frontend, wlm_job_id))
}

pub fn launch_app(
    frontend: &'static Frontend,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    stdin_path: Option<std::path::PathBuf>,
    chdir: Option<std::path::PathBuf>,
) -> Result<AppId> {
    launch_impl(
        frontend,
        LaunchRequest {
            argv,
            env,
            stdin: stdin_path.map(Stdin::Path).unwrap_or(Stdin::None),
            chdir,
            barrier: Barrier::Unset,
        },
    )
}

pub fn launch_app_barrier(
    frontend: &'static Frontend,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    stdin_path: Option<std::path::PathBuf>,
    chdir: Option<std::path::PathBuf>,
) -> Result<AppId> {
    launch_impl(
        frontend,
        LaunchRequest {
            argv,
            env,
            stdin: stdin_path.map(Stdin::Path).unwrap_or(Stdin::None),
            chdir,
            barrier: Barrier::Set,
        },
    )
}

pub fn launch_app_fd(
    frontend: &'static Frontend,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    stdin_fd: i32,
    chdir: Option<std::path::PathBuf>,
) -> Result<AppId> {
    launch_impl(
        frontend,
        LaunchRequest {
            argv,
            env,
            stdin: Stdin::Fd(stdin_fd),
            chdir,
            barrier: Barrier::Unset,
        },
    )
}

pub fn launch_app_barrier_fd(
    frontend: &'static Frontend,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    stdin_fd: i32,
    chdir: Option<std::path::PathBuf>,
) -> Result<AppId> {
    launch_impl(
        frontend,
        LaunchRequest {
            argv,
            env,
            stdin: Stdin::Fd(stdin_fd),
            chdir,
            barrier: Barrier::Set,
        },
    )
}

/// Attach to an already-running job identified by a WLM-specific id
/// string (spec.md §4.4 `registerJob`: the variadic tuple is resolved by
/// the caller into this opaque string before it reaches the App layer).
pub fn register_job(frontend: &'static Frontend, wlm_job_id: String) -> Result<AppId> {
    frontend.backend().register_job(wlm_job_id.clone())?;
    Ok(insert_app(frontend, wlm_job_id))
}

/// Remove the App, and any Sessions/Manifests it owns, from the registry
/// without signalling the job.
pub fn deregister_app(frontend: &'static Frontend, app_id: AppId) -> Result<()> {
    let mut reg = frontend.registry().lock().unwrap();
    reg.apps.remove(&app_id).ok_or(CtiError::HandleInvalid(app_id.as_raw()))?;
    reg.sessions.retain(|_, s| s.app_id != app_id);
    reg.manifests.retain(|_, m| m.app_id != app_id);
    Ok(())
}

/// Ask the WLM backend to deliver `signal` to the App's job. `signal == 0`
/// is a liveness probe.
pub fn kill_app(frontend: &'static Frontend, app_id: AppId, signal: i32) -> Result<()> {
    let reg = frontend.registry().lock().unwrap();
    let app = reg.apps.get(&app_id).ok_or(CtiError::HandleInvalid(app_id.as_raw()))?;
    frontend.backend().kill(&app.wlm_job_id, signal)
}

/// True only when `app_id` is tracked *and* the WLM reports the job still
/// running; a stale handle, along with any Sessions/Manifests it owns, is
/// garbage-collected on this call.
pub fn app_is_valid(frontend: &'static Frontend, app_id: AppId) -> Result<bool> {
    let wlm_job_id = {
        let reg = frontend.registry().lock().unwrap();
        match reg.apps.get(&app_id) {
            Some(app) => app.wlm_job_id.clone(),
            None => return Ok(false),
        }
    };

    let running = frontend.backend().is_running(&wlm_job_id)?;
    if !running {
        let mut reg = frontend.registry().lock().unwrap();
        reg.apps.remove(&app_id);
        reg.sessions.retain(|_, s| s.app_id != app_id);
        reg.manifests.retain(|_, m| m.app_id != app_id);
    }
    Ok(running)
}

/// Host placement for `app_id`'s job.
pub fn placement(frontend: &'static Frontend, app_id: AppId) -> Result<PlacementInfo> {
    let reg = frontend.registry().lock().unwrap();
    let app = reg.apps.get(&app_id).ok_or(CtiError::HandleInvalid(app_id.as_raw()))?;
    frontend.backend().placement(&app.wlm_job_id)
}

/// WLM-specific extra attributes for `app_id`'s job.
pub fn extras(frontend: &'static Frontend, app_id: AppId) -> Result<WlmExtras> {
    let reg = frontend.registry().lock().unwrap();
    let app = reg.apps.get(&app_id).ok_or(CtiError::HandleInvalid(app_id.as_raw()))?;
    frontend.backend().extras(&app.wlm_job_id)
}

/// Create a new Session under `app_id`, returning a handle unique across
/// every App in the process.
pub fn create_session(frontend: &'static Frontend, app_id: AppId) -> Result<SessionId> {
    let mut reg = frontend.registry().lock().unwrap();
    let daemon_suffix = reg
        .apps
        .get(&app_id)
        .ok_or(CtiError::HandleInvalid(app_id.as_raw()))?
        .daemon_suffix
        .clone();
    let id = frontend.alloc_session_id();
    let stage_name = cti_session::random_stage_name(&format!("cti_daemon{daemon_suffix}"));
    reg.sessions.insert(id, SessionEntry { app_id, session: Session::new(id, stage_name) });
    Ok(id)
}

/// True only when `session_id` is tracked and belongs to `app_id`.
pub fn session_is_valid(frontend: &'static Frontend, app_id: AppId, session_id: SessionId) -> bool {
    frontend
        .registry()
        .lock()
        .unwrap()
        .sessions
        .get(&session_id)
        .is_some_and(|s| s.app_id == app_id)
}

/// Drop a Session, and any Manifests under it, from the registry.
pub fn destroy_session(frontend: &'static Frontend, app_id: AppId, session_id: SessionId) -> Result<()> {
    let mut reg = frontend.registry().lock().unwrap();
    match reg.sessions.get(&session_id) {
        Some(s) if s.app_id == app_id => {
            reg.sessions.remove(&session_id);
            reg.manifests.retain(|_, m| m.session_id != session_id);
            Ok(())
        }
        _ => Err(CtiError::HandleInvalid(session_id.as_raw())),
    }
}

/// The stage directory name a session's ships land under, for building a
/// daemon launcher invocation's `-d` argument.
pub fn session_stage_name(frontend: &'static Frontend, app_id: AppId, session_id: SessionId) -> Result<String> {
    let reg = frontend.registry().lock().unwrap();
    let session = reg
        .sessions
        .get(&session_id)
        .filter(|s| s.app_id == app_id)
        .ok_or(CtiError::HandleInvalid(session_id.as_raw()))?;
    Ok(session.session.stage_name().to_string())
}

/// Allocate a new Manifest under `session_id`, returning a handle unique
/// across every Session in the process.
pub fn create_manifest(frontend: &'static Frontend, app_id: AppId, session_id: SessionId) -> Result<ManifestId> {
    let mut reg = frontend.registry().lock().unwrap();
    let manifest = reg
        .sessions
        .get_mut(&session_id)
        .filter(|s| s.app_id == app_id)
        .ok_or(CtiError::HandleInvalid(session_id.as_raw()))?
        .session
        .create_manifest();
    let id = frontend.alloc_manifest_id();
    reg.manifests.insert(id, ManifestEntry { app_id, session_id, manifest });
    Ok(id)
}

/// True only when `manifest_id` is a currently tracked handle.
pub fn manifest_is_valid(frontend: &'static Frontend, manifest_id: ManifestId) -> bool {
    frontend.registry().lock().unwrap().manifests.contains_key(&manifest_id)
}

/// Release `manifest_id`'s registry entry. Does not affect anything
/// already shipped through it.
pub fn destroy_manifest(frontend: &'static Frontend, manifest_id: ManifestId) -> Result<()> {
    frontend
        .registry()
        .lock()
        .unwrap()
        .manifests
        .remove(&manifest_id)
        .map(|_| ())
        .ok_or(CtiError::HandleInvalid(manifest_id.as_raw()))
}

fn with_manifest<R>(frontend: &'static Frontend, manifest_id: ManifestId, f: impl FnOnce(&mut ManifestEntry) -> Result<R>) -> Result<R> {
    let mut reg = frontend.registry().lock().unwrap();
    let entry = reg
        .manifests
        .get_mut(&manifest_id)
        .ok_or(CtiError::HandleInvalid(manifest_id.as_raw()))?;
    f(entry)
}

/// Resolve `name` on `$PATH` and stage it under `bin/` in `manifest_id`.
pub fn add_manifest_binary(frontend: &'static Frontend, manifest_id: ManifestId, name: &str, policy: DepsPolicy) -> Result<()> {
    with_manifest(frontend, manifest_id, |entry| entry.manifest.add_binary(name, policy))
}

/// Resolve `name` as a shared library and stage it under `lib/`.
pub fn add_manifest_library(frontend: &'static Frontend, manifest_id: ManifestId, name: &str, policy: DepsPolicy) -> Result<()> {
    with_manifest(frontend, manifest_id, |entry| entry.manifest.add_library(name, policy))
}

/// Record `path` as an extra remote library directory.
pub fn add_manifest_lib_dir(frontend: &'static Frontend, manifest_id: ManifestId, path: &str) -> Result<()> {
    with_manifest(frontend, manifest_id, |entry| entry.manifest.add_lib_dir(path))
}

/// Resolve `name` and stage it at the manifest's stage root.
pub fn add_manifest_file(frontend: &'static Frontend, manifest_id: ManifestId, name: &str) -> Result<()> {
    with_manifest(frontend, manifest_id, |entry| entry.manifest.add_file(name))
}

/// Ship `manifest_id` through its owning Session's ship algorithm, using
/// the owning App's WLM job id and the Frontend's backend.
pub fn ship_manifest(
    frontend: &'static Frontend,
    manifest_id: ManifestId,
    archive_path: &std::path::Path,
    deduplicate: bool,
) -> Result<ShipResult> {
    let mut guard = frontend.registry().lock().unwrap();
    let reg = &mut *guard;
    let manifest_entry = reg
        .manifests
        .get_mut(&manifest_id)
        .ok_or(CtiError::HandleInvalid(manifest_id.as_raw()))?;
    let job_id = reg
        .apps
        .get(&manifest_entry.app_id)
        .ok_or(CtiError::HandleInvalid(manifest_entry.app_id.as_raw()))?
        .wlm_job_id
        .clone();
    let session_entry = reg
        .sessions
        .get_mut(&manifest_entry.session_id)
        .ok_or(CtiError::HandleInvalid(manifest_entry.session_id.as_raw()))?;
    session_entry
        .session
        .ship(&mut manifest_entry.manifest, frontend.backend(), &job_id, archive_path, deduplicate)
}

/// Exec the per-node daemon launcher for `app_id`'s job.
pub fn start_daemon(frontend: &'static Frontend, app_id: AppId, argv: &[String], synchronous: bool) -> Result<()> {
    let reg = frontend.registry().lock().unwrap();
    let app = reg.apps.get(&app_id).ok_or(CtiError::HandleInvalid(app_id.as_raw()))?;
    frontend.backend().start_daemon(&app.wlm_job_id, argv, synchronous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::Frontend;
    use crate::mock_backend::MockWlmBackend;

    fn frontend() -> &'static Frontend {
        Frontend::get_or_init(|_| Box::new(MockWlmBackend::new())).unwrap()
    }

    #[test]
    fn launch_app_registers_and_kills_cleanly() {
        let fe = frontend();
        let app_id = launch_app(fe, vec!["echo".into(), "hi".into()], vec![], None, None).unwrap();
        assert!(app_is_valid(fe, app_id).unwrap());
        kill_app(fe, app_id, 0).unwrap();
        deregister_app(fe, app_id).unwrap();
        assert!(!app_is_valid(fe, app_id).unwrap());
    }

    #[test]
    fn ld_preload_is_prepended_with_saved_value() {
        let env = vec![("LD_PRELOAD".to_string(), "\"mine.so\"".to_string())];
        // Can't easily fake `Frontend::saved_ld_preload` without a real
        // instance; exercise the merge helper it delegates to directly.
        assert_eq!(cti_config::merge_ld_preload("saved.so", Some("\"mine.so\"")), "saved.so:mine.so");
        let _ = env;
    }

    #[test]
    fn kill_unknown_app_fails() {
        let fe = frontend();
        let err = kill_app(fe, AppId::from_raw(999_999), 0).unwrap_err();
        assert!(matches!(err, CtiError::HandleInvalid(_)));
    }

    #[test]
    fn session_ids_are_unique_across_different_apps() {
        let fe = frontend();
        let app_a = launch_app(fe, vec!["echo".into()], vec![], None, None).unwrap();
        let app_b = launch_app(fe, vec!["echo".into()], vec![], None, None).unwrap();
        let session_a = create_session(fe, app_a).unwrap();
        let session_b = create_session(fe, app_b).unwrap();
        assert_ne!(session_a, session_b);
        assert!(session_is_valid(fe, app_a, session_a));
        assert!(!session_is_valid(fe, app_b, session_a));
    }

    #[test]
    fn destroying_a_session_drops_its_manifests() {
        let fe = frontend();
        let app_id = launch_app(fe, vec!["echo".into()], vec![], None, None).unwrap();
        let session_id = create_session(fe, app_id).unwrap();
        let manifest_id = create_manifest(fe, app_id, session_id).unwrap();
        destroy_session(fe, app_id, session_id).unwrap();
        assert!(!manifest_is_valid(fe, manifest_id));
    }
}
