//! Shared types for the Cray Tools Interface core: handle types, WLM/system
//! kind enums, the attribs-source distinction, and the core error type.
//!
//! Every other `cti-*` crate depends on this one; it has no internal
//! dependencies of its own.

mod attribs;
mod error;
mod handles;
mod types;
mod wlm_backend;

pub use attribs::AttribsSource;
pub use error::{CtiError, Result};
pub use handles::{AppId, DaemonAppId, HandleAllocator, ManifestId, SessionId};
pub use types::{DepsPolicy, DetectedWlm, SystemKind, WlmKind, parse_wlm_impl_override};
pub use wlm_backend::{Barrier, LaunchSpec, PlacementInfo, Stdin, WlmBackend, WlmExtras, WlmJobId};

/// Fork-safety guard: captures the constructing process's pid so later calls
/// can detect "this is a forked child re-entering the library" and skip
/// global cleanup (spec.md §5 Fork safety; DESIGN NOTES §9).
#[derive(Debug, Clone, Copy)]
pub struct ConstructingPid(u32);

impl ConstructingPid {
    pub fn capture() -> Self {
        Self(std::process::id())
    }

    /// True if the calling process is the same one that constructed this guard.
    pub fn is_original_process(&self) -> bool {
        self.0 == std::process::id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructing_pid_matches_in_same_process() {
        let guard = ConstructingPid::capture();
        assert!(guard.is_original_process());
    }
}
