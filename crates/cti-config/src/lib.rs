//! Environment tunables and stage/config directory path resolution for CTI.

mod paths;
mod tunables;

pub use paths::{ensure_stage_dir, sibling_stage_dirs, stage_dir_for_pid, top_dir};
pub use tunables::{Tunables, capture_and_clear_ld_preload, merge_ld_preload};
