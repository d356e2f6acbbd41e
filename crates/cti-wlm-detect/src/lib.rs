//! Workload-manager and system-kind detection (spec.md §4.1).
//!
//! [`detect`] runs the probe chain at most once per process, caching the
//! result in a `OnceLock` exactly like `csa_resource::sandbox`'s sandbox
//! capability probe: detection spawns a handful of `--version` subprocesses,
//! which is cheap once but wasteful to repeat on every `App` launch.

pub mod command;
mod probe;
mod verify;

pub use command::{CommandOutput, CommandRunner, RealCommandRunner};
pub use probe::WlmDetectPlugin;
pub use verify::{verify_eproxy, verify_flux, verify_launcher, verify_pals, verify_slurm_single_cluster};

use std::sync::OnceLock;

use cti_core::{DetectedWlm, Result, SystemKind, WlmKind, parse_wlm_impl_override};

static DETECTED: OnceLock<DetectedWlm> = OnceLock::new();

/// Detect the active WLM and system kind, consulting `CTI_WLM_IMPL` first
/// and falling back to the probe chain. A successful result is cached for
/// the life of the process; a failure is not cached, since the environment
/// that caused it (e.g. a transient probe failure) may not recur.
pub fn detect(launcher_name: &str) -> Result<DetectedWlm> {
    if let Some(cached) = DETECTED.get() {
        return Ok(*cached);
    }
    let result = detect_uncached(&RealCommandRunner, launcher_name)?;
    Ok(*DETECTED.get_or_init(|| result))
}

/// The uncached detection algorithm, parameterized over a [`CommandRunner`]
/// so tests can exercise it without a `OnceLock` or real subprocesses.
pub fn detect_uncached(runner: &dyn CommandRunner, launcher_name: &str) -> Result<DetectedWlm> {
    if let Ok(over) = std::env::var("CTI_WLM_IMPL")
        && let Some(forced) = parse_wlm_impl_override(&over)
    {
        return Ok(forced);
    }

    let system = probe::probe_filesystem_markers();

    if let Some(plugin) = probe::load_libwlm_detect()
        && let Some(wlm) = plugin.active_wlm()
    {
        return Ok(probe::detected(system, wlm));
    }

    if let Some(wlm) = probe::probe_slurm(runner, launcher_name) {
        return Ok(probe::detected(system, wlm));
    }
    if let Some(wlm) = probe::probe_alps(runner, launcher_name) {
        return Ok(probe::detected(system, wlm));
    }
    if let Some(wlm) = probe::probe_pals() {
        return Ok(probe::detected(system, wlm));
    }
    if let Some(wlm) = probe::probe_flux(runner) {
        return Ok(probe::detected(system, wlm));
    }

    Ok(probe::detected(system, WlmKind::Ssh))
}

/// Re-export for callers that need to name the "no match" path explicitly.
pub fn ssh_fallback(system: Option<SystemKind>) -> DetectedWlm {
    probe::detected(system, WlmKind::Ssh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::mock::MockCommandRunner;

    #[test]
    fn falls_back_to_ssh_when_nothing_matches() {
        let mock = MockCommandRunner::new();
        let detected = detect_uncached(&mock, "srun").unwrap();
        assert_eq!(detected.wlm, WlmKind::Ssh);
    }

    #[test]
    fn cti_wlm_impl_override_short_circuits_probes() {
        unsafe {
            std::env::set_var("CTI_WLM_IMPL", "slurm");
        }
        let mock = MockCommandRunner::new();
        let detected = detect_uncached(&mock, "srun").unwrap();
        assert_eq!(detected.wlm, WlmKind::Slurm);
        unsafe {
            std::env::remove_var("CTI_WLM_IMPL");
        }
    }

    #[test]
    fn detect_is_idempotent_once_cached() {
        unsafe {
            std::env::set_var("CTI_WLM_IMPL", "mock");
        }
        let first = detect("irrelevant").unwrap();
        let second = detect("irrelevant").unwrap();
        assert_eq!(first.wlm, second.wlm);
        unsafe {
            std::env::remove_var("CTI_WLM_IMPL");
        }
    }
}
