//! The `extern "C"` surface itself: every function here is a thin,
//! panic-safe veneer translating a C call into the `cti-app`/`cti-session`
//! Rust API and back into the integer-sentinel-plus-last-error contract
//! (spec.md §6/§7).

use std::panic::{AssertUnwindSafe, catch_unwind};

use libc::{c_char, c_int};

use cti_core::{AppId, CtiError, DepsPolicy, ManifestId, Result, SessionId};

use crate::error;
use crate::strings::{read_env_array, read_opt_str, read_str, read_str_array};

/// Run `f`, converting a `CtiError` or an unwinding panic into `default`
/// plus a recorded last-error message. `Ok` clears the last-error cell.
fn guard<T>(default: T, f: impl FnOnce() -> Result<T>) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => {
            error::clear();
            value
        }
        Ok(Err(err)) => {
            error::set(&err);
            default
        }
        Err(_) => {
            error::set_message("panic crossed the FFI boundary");
            default
        }
    }
}

fn frontend() -> Result<&'static cti_app::Frontend> {
    cti_app::Frontend::instance()
}

/// Initialize the Frontend singleton: detect the WLM, capture `LD_PRELOAD`.
/// Idempotent; safe to call more than once. Returns 0 on success, -1 on
/// failure (see `cti_error_str`).
///
/// The in-scope mock backend stands in for a real per-WLM backend crate,
/// which is wired up by whoever links this library against one.
#[unsafe(no_mangle)]
pub extern "C" fn cti_init() -> c_int {
    guard(-1, || {
        #[cfg(feature = "mock-backend")]
        let factory = |_detected| Box::new(cti_app::MockWlmBackend::new()) as Box<dyn cti_core::WlmBackend>;
        #[cfg(not(feature = "mock-backend"))]
        let factory = |_detected| -> Box<dyn cti_core::WlmBackend> {
            panic!("cti-ffi built without a backend; link a real WlmBackend factory")
        };
        cti_app::Frontend::get_or_init(factory)?;
        Ok(0)
    })
}

fn do_launch(
    argv: *const *const c_char,
    env: *const *const c_char,
    stdin_path: *const c_char,
    chdir: *const c_char,
    barrier: bool,
) -> Result<AppId> {
    let fe = frontend()?;
    let argv = unsafe { read_str_array(argv) }?;
    if argv.is_empty() {
        return Err(CtiError::Fatal("argv must contain at least a binary path".to_string()));
    }
    let env = unsafe { read_env_array(env) }?;
    let stdin_path = unsafe { read_opt_str(stdin_path) }?.map(std::path::PathBuf::from);
    let chdir = unsafe { read_opt_str(chdir) }?.map(std::path::PathBuf::from);

    if barrier {
        cti_app::launch_app_barrier(fe, argv, env, stdin_path, chdir)
    } else {
        cti_app::launch_app(fe, argv, env, stdin_path, chdir)
    }
}

/// Launch `argv` as a new App. `env` and `argv` are null-terminated C
/// string arrays; `env` entries are `VAR=VAL`. `stdin_path`/`chdir` may be
/// null. Returns the new App's handle, or 0 on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_launchApp(
    argv: *const *const c_char,
    env: *const *const c_char,
    stdin_path: *const c_char,
    chdir: *const c_char,
) -> u64 {
    guard(0, || do_launch(argv, env, stdin_path, chdir, false).map(AppId::as_raw))
}

/// As [`cti_launchApp`], but holds the new App at its MPIR launch barrier.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_launchAppBarrier(
    argv: *const *const c_char,
    env: *const *const c_char,
    stdin_path: *const c_char,
    chdir: *const c_char,
) -> u64 {
    guard(0, || do_launch(argv, env, stdin_path, chdir, true).map(AppId::as_raw))
}

fn do_launch_fd(
    argv: *const *const c_char,
    env: *const *const c_char,
    stdin_fd: c_int,
    chdir: *const c_char,
    barrier: bool,
) -> Result<AppId> {
    let fe = frontend()?;
    let argv = unsafe { read_str_array(argv) }?;
    if argv.is_empty() {
        return Err(CtiError::Fatal("argv must contain at least a binary path".to_string()));
    }
    let env = unsafe { read_env_array(env) }?;
    let chdir = unsafe { read_opt_str(chdir) }?.map(std::path::PathBuf::from);

    if barrier {
        cti_app::launch_app_barrier_fd(fe, argv, env, stdin_fd, chdir)
    } else {
        cti_app::launch_app_fd(fe, argv, env, stdin_fd, chdir)
    }
}

/// As [`cti_launchApp`], but reads stdin from an already-open file
/// descriptor instead of a path. Pass -1 for no stdin redirection.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_launchAppFd(
    argv: *const *const c_char,
    env: *const *const c_char,
    stdin_fd: c_int,
    chdir: *const c_char,
) -> u64 {
    guard(0, || do_launch_fd(argv, env, stdin_fd, chdir, false).map(AppId::as_raw))
}

/// As [`cti_launchAppFd`], but holds the new App at its MPIR launch barrier.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_launchAppBarrierFd(
    argv: *const *const c_char,
    env: *const *const c_char,
    stdin_fd: c_int,
    chdir: *const c_char,
) -> u64 {
    guard(0, || do_launch_fd(argv, env, stdin_fd, chdir, true).map(AppId::as_raw))
}

/// Attach to an already-running job known to the WLM by `job_id`. Returns
/// the new App's handle, or 0 on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_registerJob(job_id: *const c_char) -> u64 {
    guard(0, || {
        let fe = frontend()?;
        let job_id = unsafe { read_str(job_id) }?.to_string();
        cti_app::register_job(fe, job_id).map(AppId::as_raw)
    })
}

/// Drop `app_id` from the registry without signalling its job. Returns 0
/// on success, -1 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn cti_deregisterApp(app_id: u64) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        cti_app::deregister_app(fe, AppId::from_raw(app_id))?;
        Ok(0)
    })
}

/// Send `signal` to `app_id`'s job; `signal == 0` is a liveness probe with
/// no side effect beyond the check. Returns 0 on success, -1 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn cti_killApp(app_id: u64, signal: c_int) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        cti_app::kill_app(fe, AppId::from_raw(app_id), signal)?;
        Ok(0)
    })
}

/// 1 if `app_id` is tracked and its job is still running, 0 otherwise.
/// Never fails: an unrecognized Frontend or handle just reads as invalid.
#[unsafe(no_mangle)]
pub extern "C" fn cti_appIsValid(app_id: u64) -> c_int {
    match frontend().and_then(|fe| cti_app::app_is_valid(fe, AppId::from_raw(app_id))) {
        Ok(true) => 1,
        _ => 0,
    }
}

/// Number of PEs in `app_id`'s job, or -1 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn cti_getNumAppPEs(app_id: u64) -> i32 {
    guard(-1, || {
        let fe = frontend()?;
        cti_app::placement(fe, AppId::from_raw(app_id)).map(|p| p.num_pes as i32)
    })
}

/// Create a new Session under `app_id`. Returns the new Session's handle,
/// or 0 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn cti_createSession(app_id: u64) -> u64 {
    guard(0, || {
        let fe = frontend()?;
        cti_app::create_session(fe, AppId::from_raw(app_id)).map(SessionId::as_raw)
    })
}

/// 1 if `session_id` is tracked under `app_id`, 0 otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn cti_sessionIsValid(app_id: u64, session_id: u64) -> c_int {
    match frontend() {
        Ok(fe) => c_int::from(cti_app::session_is_valid(fe, AppId::from_raw(app_id), SessionId::from_raw(session_id))),
        Err(_) => 0,
    }
}

/// Drop `session_id` from `app_id`'s registry. Returns 0 on success, -1 on
/// failure.
#[unsafe(no_mangle)]
pub extern "C" fn cti_destroySession(app_id: u64, session_id: u64) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        cti_app::destroy_session(fe, AppId::from_raw(app_id), SessionId::from_raw(session_id))?;
        Ok(0)
    })
}

/// Create a new Manifest under `session_id`. Returns its handle, unique
/// across every Session in the process, or 0 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn cti_createManifest(app_id: u64, session_id: u64) -> u64 {
    guard(0, || {
        let fe = frontend()?;
        let app_id = AppId::from_raw(app_id);
        let session_id = SessionId::from_raw(session_id);
        cti_app::create_manifest(fe, app_id, session_id).map(ManifestId::as_raw)
    })
}

/// 1 if `manifest_id` is a live, unshipped-or-shipped Manifest handle.
#[unsafe(no_mangle)]
pub extern "C" fn cti_manifestIsValid(manifest_id: u64) -> c_int {
    match frontend() {
        Ok(fe) => c_int::from(cti_app::manifest_is_valid(fe, ManifestId::from_raw(manifest_id))),
        Err(_) => 0,
    }
}

/// Release `manifest_id`'s registry entry. Does not affect anything
/// already shipped through it. Returns 0 on success, -1 if unrecognized.
#[unsafe(no_mangle)]
pub extern "C" fn cti_destroyManifest(manifest_id: u64) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        cti_app::destroy_manifest(fe, ManifestId::from_raw(manifest_id))?;
        Ok(0)
    })
}

fn deps_policy(fe: &'static cti_app::Frontend) -> DepsPolicy {
    if fe.tunables().stage_dependencies_by_default {
        DepsPolicy::Stage
    } else {
        DepsPolicy::NoDeps
    }
}

/// Resolve `name` on `$PATH` and stage it under `bin/` in `manifest_id`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_addManifestBinary(manifest_id: u64, name: *const c_char) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        let name = unsafe { read_str(name) }?;
        let policy = deps_policy(fe);
        cti_app::add_manifest_binary(fe, ManifestId::from_raw(manifest_id), name, policy)?;
        Ok(0)
    })
}

/// Resolve `name` as a shared library and stage it under `lib/`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_addManifestLibrary(manifest_id: u64, name: *const c_char) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        let name = unsafe { read_str(name) }?;
        let policy = deps_policy(fe);
        cti_app::add_manifest_library(fe, ManifestId::from_raw(manifest_id), name, policy)?;
        Ok(0)
    })
}

/// Record `path` as an extra remote library directory.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_addManifestLibDir(manifest_id: u64, path: *const c_char) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        let path = unsafe { read_str(path) }?;
        cti_app::add_manifest_lib_dir(fe, ManifestId::from_raw(manifest_id), path)?;
        Ok(0)
    })
}

/// Resolve `name` and stage it at the manifest's stage root.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_addManifestFile(manifest_id: u64, name: *const c_char) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        let name = unsafe { read_str(name) }?;
        cti_app::add_manifest_file(fe, ManifestId::from_raw(manifest_id), name)?;
        Ok(0)
    })
}

/// Ship `manifest_id` to its owning App's job. Returns 0 on success, -1 on
/// failure.
#[unsafe(no_mangle)]
pub extern "C" fn cti_sendManifest(manifest_id: u64) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        let deduplicate = fe.tunables().deduplicate_files;
        let archive_path = std::env::temp_dir().join(format!("cti_manifest_{manifest_id}.tar"));
        cti_app::ship_manifest(fe, ManifestId::from_raw(manifest_id), &archive_path, deduplicate)?;
        Ok(0)
    })
}

/// Exec the per-node daemon launcher for `app_id`/`session_id`, staging
/// `binary` (already present in a shipped manifest under `bin/`) with
/// `daemon_args` as its argv and `env` as extra `VAR=VAL` assignments.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_execDaemon(
    app_id: u64,
    session_id: u64,
    binary: *const c_char,
    daemon_args: *const *const c_char,
    env: *const *const c_char,
) -> c_int {
    guard(-1, || {
        let fe = frontend()?;
        let app_id = AppId::from_raw(app_id);
        let session_id = SessionId::from_raw(session_id);
        let binary = unsafe { read_str(binary) }?;
        let daemon_args = unsafe { read_str_array(daemon_args) }?;
        let env = unsafe { read_env_array(env) }?;

        let stage_name = cti_app::session_stage_name(fe, app_id, session_id)?;
        let mut argv = vec!["cti_daemon_launcher".to_string(), "-d".to_string(), stage_name, "-b".to_string(), binary.to_string()];
        for (var, val) in env {
            argv.push("-e".to_string());
            argv.push(format!("{var}={val}"));
        }
        argv.push("--".to_string());
        argv.extend(daemon_args);

        cti_app::start_daemon(fe, app_id, &argv, true)
    })
}
