//! Frontend daemon entry point: one instance per `Frontend` process,
//! spawned lazily by `cti-mpir::MpirController` on first MPIR use and
//! torn down when its parent's stage directory is removed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cti_fe_daemon::{DaemonState, RealMpirBackend, SOCKET_FILE_NAME, bind_listener, cleanup_socket_file, serve};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(dir) = std::env::args().nth(1) else {
        eprintln!("usage: fe-daemond <stage-dir>");
        std::process::exit(2);
    };
    let stage_dir = PathBuf::from(dir);
    let socket_path = stage_dir.join(SOCKET_FILE_NAME);

    let listener = bind_listener(&socket_path).context("failed to bind frontend daemon socket")?;

    let state = Arc::new(DaemonState::new(Box::new(RealMpirBackend)));
    tracing::info!(socket = %socket_path.display(), "frontend daemon listening");

    serve(listener, state);

    let _ = cleanup_socket_file(&socket_path);
    Ok(())
}
