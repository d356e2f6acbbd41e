//! Synchronous Unix domain socket setup, carrying over `bind_listener`'s
//! permission and stale-socket conventions without the `tokio` runtime the
//! core is deliberately kept free of.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use cti_core::Result;

/// Bind a Unix domain socket at `socket_path`, creating its parent
/// directory with mode 0700 if it did not already exist, removing a stale
/// socket file left behind by a crashed daemon, and setting the new
/// socket's mode to 0600.
pub fn bind_listener(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        let parent_existed = parent.exists();
        std::fs::create_dir_all(parent)?;
        if !parent_existed {
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

/// Connect to an already-bound frontend daemon socket.
pub fn connect(socket_path: &Path) -> Result<UnixStream> {
    Ok(UnixStream::connect(socket_path)?)
}

/// Remove the socket file, e.g. on clean daemon shutdown.
pub fn cleanup_socket_file(socket_path: &Path) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};

    #[test]
    fn bind_listener_sets_restrictive_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("private").join("fe-daemon.sock");
        let _listener = bind_listener(&socket_path).unwrap();

        let socket_mode = std::fs::metadata(&socket_path).unwrap().permissions().mode() & 0o777;
        let parent = socket_path.parent().unwrap();
        let parent_mode = std::fs::metadata(parent).unwrap().permissions().mode() & 0o777;

        assert_eq!(socket_mode, 0o600);
        assert_eq!(parent_mode, 0o700);
    }

    #[test]
    fn bind_and_connect_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("fe-daemon.sock");
        let listener = bind_listener(&socket_path).unwrap();

        let server_path = socket_path.clone();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut writer = stream;
            writer.write_all(b"{\"ok\":true}\n").unwrap();
            let _ = server_path;
        });

        let mut client = connect(&socket_path).unwrap();
        client.write_all(b"ping\n").unwrap();
        let mut response = String::new();
        let mut client_reader = BufReader::new(client);
        client_reader.read_line(&mut response).unwrap();

        server.join().unwrap();
        assert_eq!(response.trim(), "{\"ok\":true}");

        cleanup_socket_file(&socket_path).unwrap();
        assert!(!socket_path.exists());
    }

    #[test]
    fn bind_listener_does_not_chmod_existing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let shared_parent = dir.path().join("shared");
        std::fs::create_dir(&shared_parent).unwrap();
        std::fs::set_permissions(&shared_parent, std::fs::Permissions::from_mode(0o755)).unwrap();

        let socket_path = shared_parent.join("fe-daemon.sock");
        let _listener = bind_listener(&socket_path).unwrap();

        let parent_mode = std::fs::metadata(&shared_parent).unwrap().permissions().mode() & 0o777;
        assert_eq!(parent_mode, 0o755);
    }
}
