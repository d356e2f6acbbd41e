//! Wire protocol, socket plumbing, and server-side state for the
//! out-of-process frontend daemon that holds MPIR launch/attach state on
//! behalf of a single `Frontend` process.

pub mod protocol;
mod socket;
mod state;

pub use protocol::{FeDaemonRequest, FeDaemonResponse, MpirHandle, ProctableEntry, read_request, read_response, write_request, write_response};
pub use socket::{bind_listener, cleanup_socket_file, connect};
pub use state::{DaemonState, MpirBackend, RealMpirBackend};

#[cfg(any(test, feature = "fake-backend"))]
pub use state::FakeMpirBackend;

/// The socket file name created under a Frontend's per-pid stage directory.
pub const SOCKET_FILE_NAME: &str = "fe-daemon.sock";

/// Serve requests accepted from `listener` until the socket is removed or
/// the process is signalled to stop; each connection is handled on its own
/// thread so concurrent Apps do not block one another.
pub fn serve(listener: std::os::unix::net::UnixListener, state: std::sync::Arc<DaemonState>) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let state = std::sync::Arc::clone(&state);
        std::thread::spawn(move || serve_connection(stream, state));
    }
}

fn serve_connection(stream: std::os::unix::net::UnixStream, state: std::sync::Arc<DaemonState>) {
    let mut reader = std::io::BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to clone connection");
            return;
        }
    });
    let mut writer = stream;
    loop {
        let request = match protocol::read_request(&mut reader) {
            Ok(Some(req)) => req,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "malformed request, closing connection");
                return;
            }
        };
        let response = state.handle(request);
        if let Err(e) = protocol::write_response(&mut writer, &response) {
            tracing::warn!(error = %e, "failed to write response, closing connection");
            return;
        }
    }
}
