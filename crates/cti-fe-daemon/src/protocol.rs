//! Newline-delimited JSON request/response protocol spoken over the frontend
//! daemon's Unix domain socket. Each request gets exactly one response; the
//! connection is held open for the lifetime of the owning `Frontend`
//! process and multiplexes requests for every `App` it tracks.

use serde::{Deserialize, Serialize};

/// A single MPIR process-table entry, following the `MPIR_PROCDESC` layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProctableEntry {
    pub pid: i32,
    pub rank: i32,
    pub hostname: String,
    pub executable_name: String,
}

/// Opaque handle identifying one in-flight MPIR launch/attach, scoped to the
/// daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MpirHandle(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeDaemonRequest {
    /// Register a newly launched or attached App, returning a
    /// daemon-assigned `DaemonAppId` used to scope subsequent requests.
    RegisterApp { wlm_job_id: String },
    /// Launch `argv` (with `env` additions) under MPIR control and block
    /// until the launcher hits `MPIR_Breakpoint`.
    LaunchMpir {
        app_id: u64,
        argv: Vec<String>,
        env: Vec<(String, String)>,
    },
    /// Read the proctable of a launch that has already hit the breakpoint.
    ReadProctable { mpir_handle: MpirHandle },
    /// Release the launcher past the barrier, resuming execution.
    ReleaseMpir { mpir_handle: MpirHandle },
    /// Deregister the App; the daemon drops any state associated with it.
    DeregisterApp { app_id: u64 },
    /// Liveness check used by `MpirController` before deciding whether to
    /// spawn a new daemon process.
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeDaemonResponse {
    AppRegistered { app_id: u64 },
    MpirLaunched { mpir_handle: MpirHandle, launcher_pid: i32 },
    Proctable { entries: Vec<ProctableEntry> },
    Released,
    AppDeregistered,
    Pong,
    Error { message: String },
}

/// Write `request` as one line of JSON to `writer`.
pub fn write_request<W: std::io::Write>(writer: &mut W, request: &FeDaemonRequest) -> std::io::Result<()> {
    let line = serde_json::to_string(request)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read one line of JSON from `reader` and parse it as a [`FeDaemonResponse`].
pub fn read_response<R: std::io::BufRead>(reader: &mut R) -> std::io::Result<FeDaemonResponse> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "frontend daemon closed the connection",
        ));
    }
    serde_json::from_str(line.trim_end()).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })
}

/// Write `response` as one line of JSON to `writer`.
pub fn write_response<W: std::io::Write>(writer: &mut W, response: &FeDaemonResponse) -> std::io::Result<()> {
    let line = serde_json::to_string(response)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Read one line of JSON from `reader` and parse it as a [`FeDaemonRequest`].
pub fn read_request<R: std::io::BufRead>(reader: &mut R) -> std::io::Result<Option<FeDaemonRequest>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = FeDaemonRequest::LaunchMpir {
            app_id: 7,
            argv: vec!["srun".into(), "-N4".into()],
            env: vec![("FOO".into(), "bar".into())],
        };
        let mut buf = Vec::new();
        write_request(&mut buf, &req).unwrap();
        assert!(buf.ends_with(b"\n"));
        let mut reader = std::io::BufReader::new(buf.as_slice());
        let parsed = read_request(&mut reader).unwrap().unwrap();
        match parsed {
            FeDaemonRequest::LaunchMpir { app_id, argv, .. } => {
                assert_eq!(app_id, 7);
                assert_eq!(argv, vec!["srun", "-N4"]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn read_request_returns_none_on_eof() {
        let mut reader = std::io::BufReader::new(&b""[..]);
        assert!(read_request(&mut reader).unwrap().is_none());
    }

    #[test]
    fn response_round_trips_through_json() {
        let resp = FeDaemonResponse::Proctable {
            entries: vec![ProctableEntry {
                pid: 123,
                rank: 0,
                hostname: "nid001".into(),
                executable_name: "a.out".into(),
            }],
        };
        let mut buf = Vec::new();
        write_response(&mut buf, &resp).unwrap();
        let mut reader = std::io::BufReader::new(buf.as_slice());
        let parsed = read_response(&mut reader).unwrap();
        match parsed {
            FeDaemonResponse::Proctable { entries } => assert_eq!(entries.len(), 1),
            _ => panic!("wrong variant"),
        }
    }
}
