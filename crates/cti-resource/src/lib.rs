//! Stage directory lifecycle management for CTI: liveness probing and
//! stale-directory reaping.

mod procfs;
mod reaper;

pub use procfs::{is_pid_alive, procfs_available};
pub use reaper::{MIN_STALE_AGE, ReapedDir, reap_stale_dirs};
