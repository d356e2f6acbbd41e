//! Frontend singleton, App registry, and launch API (spec.md §4.4).

mod app;
mod frontend;
mod mock_backend;

pub use app::{
    LaunchRequest, add_manifest_binary, add_manifest_file, add_manifest_lib_dir, add_manifest_library, app_is_valid,
    create_manifest, create_session, deregister_app, destroy_manifest, destroy_session, extras, kill_app, launch_app,
    launch_app_barrier, launch_app_barrier_fd, launch_app_fd, manifest_is_valid, placement, register_job, session_is_valid,
    session_stage_name, ship_manifest, start_daemon,
};
pub use frontend::Frontend;

#[cfg(any(test, feature = "mock-backend"))]
pub use mock_backend::MockWlmBackend;
