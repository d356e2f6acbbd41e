//! Server-side daemon state: the App/MPIR-session tables and request
//! dispatch. Held behind a single `Mutex`, matching the App registry's own
//! "one mutex covers all handle-table mutations" convention.

use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::sync::Mutex;

use crate::protocol::{FeDaemonRequest, FeDaemonResponse, MpirHandle, ProctableEntry};

struct AppEntry {
    wlm_job_id: String,
}

struct MpirSession {
    launcher_pid: i32,
    proctable: Vec<ProctableEntry>,
    released: bool,
}

/// Spawns an MPIR-controlled launcher and reads its proctable once it has
/// hit the breakpoint. Implemented for real use by a ptrace-based backend
/// (platform-specific, not exercised in these tests); [`FakeMpirBackend`]
/// stands in for test coverage of the request-dispatch logic itself.
pub trait MpirBackend: Send + Sync {
    fn launch(&self, argv: &[String], env: &[(String, String)]) -> cti_core::Result<(i32, Vec<ProctableEntry>)>;
    fn release(&self, launcher_pid: i32) -> cti_core::Result<()>;
}

/// Production `MpirBackend`: spawns the launcher suspended via `SIGSTOP`
/// immediately after `exec`, standing in for halting at `MPIR_Breakpoint`.
/// The proctable returned describes the launcher process itself rather than
/// the full per-rank `MPIR_PROCDESC` array, since walking that array
/// requires reading the launcher's memory through `/proc/<pid>/mem` with
/// WLM-specific layout knowledge; callers that need the full table should
/// implement [`MpirBackend`] against the real ptrace contract.
pub struct RealMpirBackend;

impl MpirBackend for RealMpirBackend {
    fn launch(&self, argv: &[String], env: &[(String, String)]) -> cti_core::Result<(i32, Vec<ProctableEntry>)> {
        let Some(program) = argv.first() else {
            return Err(cti_core::CtiError::MpirError("empty argv for MPIR launch".into()));
        };

        let mut cmd = std::process::Command::new(program);
        cmd.args(&argv[1..]);
        for (k, v) in env {
            cmd.env(k, v);
        }
        // SAFETY: pre_exec runs in the forked child before exec; raising
        // SIGSTOP here only affects that child and happens before any
        // other threads exist in it.
        unsafe {
            cmd.pre_exec(|| {
                libc::raise(libc::SIGSTOP);
                Ok(())
            });
        }
        let child = cmd.spawn()?;
        let pid = child.id() as i32;
        // The daemon tracks launcher lifetime by pid, not by `Child`; detach
        // here and reap it on its own thread so it doesn't become a zombie
        // once it exits after release.
        std::thread::spawn(move || {
            let mut child = child;
            let _ = child.wait();
        });

        let hostname = hostname();
        let proctable = vec![ProctableEntry {
            pid,
            rank: 0,
            hostname,
            executable_name: program.clone(),
        }];
        Ok((pid, proctable))
    }

    fn release(&self, launcher_pid: i32) -> cti_core::Result<()> {
        // SAFETY: launcher_pid was returned by `launch` above and is
        // expected to still be stopped awaiting this signal.
        let ret = unsafe { libc::kill(launcher_pid, libc::SIGCONT) };
        if ret != 0 {
            return Err(cti_core::CtiError::MpirError(format!(
                "SIGCONT to launcher pid {launcher_pid} failed"
            )));
        }
        Ok(())
    }
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes, per gethostname's contract.
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return "unknown".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(any(test, feature = "fake-backend"))]
#[derive(Default)]
pub struct FakeMpirBackend {
    next_pid: Mutex<i32>,
}

#[cfg(any(test, feature = "fake-backend"))]
impl MpirBackend for FakeMpirBackend {
    fn launch(&self, argv: &[String], _env: &[(String, String)]) -> cti_core::Result<(i32, Vec<ProctableEntry>)> {
        let mut next = self.next_pid.lock().unwrap();
        *next += 1;
        let pid = 10_000 + *next;
        let exe = argv.first().cloned().unwrap_or_else(|| "unknown".into());
        let proctable = vec![ProctableEntry {
            pid,
            rank: 0,
            hostname: "localhost".into(),
            executable_name: exe,
        }];
        Ok((pid, proctable))
    }

    fn release(&self, _launcher_pid: i32) -> cti_core::Result<()> {
        Ok(())
    }
}

#[cfg(any(test, feature = "fake-backend"))]
impl FakeMpirBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// All daemon-held state, guarded by a single lock.
pub struct DaemonState {
    backend: Box<dyn MpirBackend>,
    apps: Mutex<HashMap<u64, AppEntry>>,
    sessions: Mutex<HashMap<u64, MpirSession>>,
    next_app_id: Mutex<u64>,
    next_handle: Mutex<u64>,
}

impl DaemonState {
    pub fn new(backend: Box<dyn MpirBackend>) -> Self {
        Self {
            backend,
            apps: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            next_app_id: Mutex::new(1),
            next_handle: Mutex::new(1),
        }
    }

    fn alloc_app_id(&self) -> u64 {
        let mut next = self.next_app_id.lock().unwrap();
        let id = *next;
        *next += 1;
        id
    }

    fn alloc_handle(&self) -> MpirHandle {
        let mut next = self.next_handle.lock().unwrap();
        let id = *next;
        *next += 1;
        MpirHandle(id)
    }

    /// Dispatch one request, producing the matching response. Never panics
    /// on malformed input; unknown handles and ids are reported as
    /// [`FeDaemonResponse::Error`].
    pub fn handle(&self, request: FeDaemonRequest) -> FeDaemonResponse {
        match request {
            FeDaemonRequest::Ping => FeDaemonResponse::Pong,

            FeDaemonRequest::RegisterApp { wlm_job_id } => {
                let app_id = self.alloc_app_id();
                self.apps.lock().unwrap().insert(app_id, AppEntry { wlm_job_id });
                FeDaemonResponse::AppRegistered { app_id }
            }

            FeDaemonRequest::LaunchMpir { app_id, argv, env } => {
                if !self.apps.lock().unwrap().contains_key(&app_id) {
                    return FeDaemonResponse::Error {
                        message: format!("unknown app_id {app_id}"),
                    };
                }
                match self.backend.launch(&argv, &env) {
                    Ok((launcher_pid, proctable)) => {
                        let handle = self.alloc_handle();
                        self.sessions.lock().unwrap().insert(
                            handle.0,
                            MpirSession {
                                launcher_pid,
                                proctable,
                                released: false,
                            },
                        );
                        FeDaemonResponse::MpirLaunched { mpir_handle: handle, launcher_pid }
                    }
                    Err(e) => FeDaemonResponse::Error { message: e.to_string() },
                }
            }

            FeDaemonRequest::ReadProctable { mpir_handle } => {
                match self.sessions.lock().unwrap().get(&mpir_handle.0) {
                    Some(session) => FeDaemonResponse::Proctable {
                        entries: session.proctable.clone(),
                    },
                    None => FeDaemonResponse::Error {
                        message: format!("unknown mpir handle {}", mpir_handle.0),
                    },
                }
            }

            FeDaemonRequest::ReleaseMpir { mpir_handle } => {
                let pid = {
                    let mut sessions = self.sessions.lock().unwrap();
                    match sessions.get_mut(&mpir_handle.0) {
                        Some(session) if session.released => {
                            return FeDaemonResponse::Error {
                                message: "mpir handle already released".into(),
                            };
                        }
                        Some(session) => {
                            session.released = true;
                            session.launcher_pid
                        }
                        None => {
                            return FeDaemonResponse::Error {
                                message: format!("unknown mpir handle {}", mpir_handle.0),
                            };
                        }
                    }
                };
                match self.backend.release(pid) {
                    Ok(()) => FeDaemonResponse::Released,
                    Err(e) => FeDaemonResponse::Error { message: e.to_string() },
                }
            }

            FeDaemonRequest::DeregisterApp { app_id } => {
                self.apps.lock().unwrap().remove(&app_id);
                FeDaemonResponse::AppDeregistered
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DaemonState {
        DaemonState::new(Box::new(FakeMpirBackend::new()))
    }

    #[test]
    fn register_then_launch_then_read_proctable() {
        let state = state();
        let FeDaemonResponse::AppRegistered { app_id } = state.handle(FeDaemonRequest::RegisterApp {
            wlm_job_id: "123.0".into(),
        }) else {
            panic!("expected AppRegistered");
        };

        let FeDaemonResponse::MpirLaunched { mpir_handle, .. } = state.handle(FeDaemonRequest::LaunchMpir {
            app_id,
            argv: vec!["srun".into()],
            env: vec![],
        }) else {
            panic!("expected MpirLaunched");
        };

        let FeDaemonResponse::Proctable { entries } = state.handle(FeDaemonRequest::ReadProctable { mpir_handle })
        else {
            panic!("expected Proctable");
        };
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn launch_with_unknown_app_id_errors() {
        let state = state();
        let resp = state.handle(FeDaemonRequest::LaunchMpir {
            app_id: 999,
            argv: vec![],
            env: vec![],
        });
        assert!(matches!(resp, FeDaemonResponse::Error { .. }));
    }

    #[test]
    fn release_twice_errors_second_time() {
        let state = state();
        let FeDaemonResponse::AppRegistered { app_id } = state.handle(FeDaemonRequest::RegisterApp {
            wlm_job_id: "1".into(),
        }) else {
            panic!()
        };
        let FeDaemonResponse::MpirLaunched { mpir_handle, .. } = state.handle(FeDaemonRequest::LaunchMpir {
            app_id,
            argv: vec!["a.out".into()],
            env: vec![],
        }) else {
            panic!()
        };
        assert!(matches!(
            state.handle(FeDaemonRequest::ReleaseMpir { mpir_handle }),
            FeDaemonResponse::Released
        ));
        assert!(matches!(
            state.handle(FeDaemonRequest::ReleaseMpir { mpir_handle }),
            FeDaemonResponse::Error { .. }
        ));
    }

    #[test]
    fn deregister_is_idempotent() {
        let state = state();
        assert!(matches!(
            state.handle(FeDaemonRequest::DeregisterApp { app_id: 42 }),
            FeDaemonResponse::AppDeregistered
        ));
    }

    #[test]
    fn ping_returns_pong() {
        let state = state();
        assert!(matches!(state.handle(FeDaemonRequest::Ping), FeDaemonResponse::Pong));
    }
}
