//! Library-side client for the frontend daemon: spawns `fe-daemond` on
//! first use, holds one persistent connection per `Frontend` process, and
//! exposes its requests as blocking calls (spec.md §5: Frontend operations
//! are synchronous from the caller's point of view).

use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use cti_core::{CtiError, Result};
use cti_fe_daemon::{FeDaemonRequest, FeDaemonResponse, MpirHandle, ProctableEntry, SOCKET_FILE_NAME};

const CONNECT_RETRY_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// A connection to a running (or freshly spawned) `fe-daemond`.
pub struct MpirController {
    stream: Mutex<UnixStream>,
}

impl MpirController {
    /// Connect to the daemon owning `stage_dir`, spawning `fe-daemond` if
    /// one is not already listening on its socket.
    pub fn connect_or_spawn(stage_dir: &Path) -> Result<Self> {
        let socket_path = stage_dir.join(SOCKET_FILE_NAME);

        if let Ok(stream) = UnixStream::connect(&socket_path) {
            return Ok(Self { stream: Mutex::new(stream) });
        }

        spawn_daemon(stage_dir)?;
        let stream = wait_for_socket(&socket_path)?;
        Ok(Self { stream: Mutex::new(stream) })
    }

    /// Build a controller around an already-connected stream, used by tests
    /// that drive the protocol against an in-process server thread.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream: Mutex::new(stream) }
    }

    fn roundtrip(&self, request: FeDaemonRequest) -> Result<FeDaemonResponse> {
        let mut guard = self.stream.lock().unwrap();
        cti_fe_daemon::write_request(&mut *guard, &request)?;
        let mut reader = BufReader::new(guard.try_clone()?);
        let response = cti_fe_daemon::read_response(&mut reader)?;
        Ok(response)
    }

    pub fn register_app(&self, wlm_job_id: &str) -> Result<u64> {
        match self.roundtrip(FeDaemonRequest::RegisterApp {
            wlm_job_id: wlm_job_id.to_string(),
        })? {
            FeDaemonResponse::AppRegistered { app_id } => Ok(app_id),
            other => Err(unexpected(other)),
        }
    }

    pub fn launch_mpir(
        &self,
        app_id: u64,
        argv: Vec<String>,
        env: Vec<(String, String)>,
    ) -> Result<(MpirHandle, i32)> {
        match self.roundtrip(FeDaemonRequest::LaunchMpir { app_id, argv, env })? {
            FeDaemonResponse::MpirLaunched { mpir_handle, launcher_pid } => Ok((mpir_handle, launcher_pid)),
            other => Err(unexpected(other)),
        }
    }

    pub fn read_proctable(&self, mpir_handle: MpirHandle) -> Result<Vec<ProctableEntry>> {
        match self.roundtrip(FeDaemonRequest::ReadProctable { mpir_handle })? {
            FeDaemonResponse::Proctable { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    pub fn release_mpir(&self, mpir_handle: MpirHandle) -> Result<()> {
        match self.roundtrip(FeDaemonRequest::ReleaseMpir { mpir_handle })? {
            FeDaemonResponse::Released => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn deregister_app(&self, app_id: u64) -> Result<()> {
        match self.roundtrip(FeDaemonRequest::DeregisterApp { app_id })? {
            FeDaemonResponse::AppDeregistered => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn ping(&self) -> Result<()> {
        match self.roundtrip(FeDaemonRequest::Ping)? {
            FeDaemonResponse::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: FeDaemonResponse) -> CtiError {
    match response {
        FeDaemonResponse::Error { message } => CtiError::MpirError(message),
        other => CtiError::MpirError(format!("unexpected frontend daemon response: {other:?}")),
    }
}

fn spawn_daemon(stage_dir: &Path) -> Result<()> {
    let binary = cti_path::find_binary("fe-daemond")?;
    std::process::Command::new(binary)
        .arg(stage_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    Ok(())
}

fn wait_for_socket(socket_path: &Path) -> Result<UnixStream> {
    let deadline = Instant::now() + CONNECT_RETRY_TIMEOUT;
    loop {
        if let Ok(stream) = UnixStream::connect(socket_path) {
            return Ok(stream);
        }
        if Instant::now() >= deadline {
            return Err(CtiError::MpirError(format!(
                "timed out waiting for frontend daemon socket at {}",
                socket_path.display()
            )));
        }
        std::thread::sleep(CONNECT_RETRY_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cti_fe_daemon::{DaemonState, FakeMpirBackend};
    use std::sync::Arc;

    fn spawn_test_server() -> (UnixStream, std::thread::JoinHandle<()>) {
        let (server_stream, client_stream) = UnixStream::pair().unwrap();
        let state = Arc::new(DaemonState::new(Box::new(FakeMpirBackend::new())));
        let handle = std::thread::spawn(move || {
            let mut reader = BufReader::new(server_stream.try_clone().unwrap());
            let mut writer = server_stream;
            while let Ok(Some(req)) = cti_fe_daemon::read_request(&mut reader) {
                let resp = state.handle(req);
                if cti_fe_daemon::write_response(&mut writer, &resp).is_err() {
                    break;
                }
            }
        });
        (client_stream, handle)
    }

    #[test]
    fn full_lifecycle_round_trips_over_socket_pair() {
        let (client_stream, server) = spawn_test_server();
        let controller = MpirController::from_stream(client_stream);

        let app_id = controller.register_app("123.0").unwrap();
        let (handle, _pid) = controller
            .launch_mpir(app_id, vec!["srun".into()], vec![])
            .unwrap();
        let table = controller.read_proctable(handle).unwrap();
        assert_eq!(table.len(), 1);
        controller.release_mpir(handle).unwrap();
        controller.deregister_app(app_id).unwrap();

        drop(controller);
        server.join().unwrap();
    }

    #[test]
    fn ping_succeeds_against_fake_server() {
        let (client_stream, server) = spawn_test_server();
        let controller = MpirController::from_stream(client_stream);
        controller.ping().unwrap();
        drop(controller);
        server.join().unwrap();
    }
}
