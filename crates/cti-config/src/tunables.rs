//! Frontend tunables read once from the process environment at construction
//! (spec.md §3 Frontend attributes, §6 environment variable table).

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PMI_ATTRIBS_TIMEOUT_SECS: u64 = 60;

/// Frontend-wide tunables. Constructed once via [`Tunables::from_env`] and
/// held for the lifetime of the `Frontend` singleton.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// `CTI_DBG` — enable debug logging.
    pub debug: bool,
    /// `CTI_LOG_DIR` — directory for debug logs; must be rwx.
    pub log_dir: Option<PathBuf>,
    /// `CTI_DEDUPLICATE_FILES` — `0` disables the symlink-for-existing-on-node
    /// optimization in the ship algorithm.
    pub deduplicate_files: bool,
    /// Whether `addBinary`/`addLibrary` default to walking the shared-object
    /// dependency closure when the caller does not specify a policy. Not
    /// backed by a dedicated environment variable in the public table; kept
    /// as an in-process default callers can override per call.
    pub stage_dependencies_by_default: bool,
    /// `CRAY_CTI_PMI_FOPEN_TIMEOUT` — how long the backend daemon will spend
    /// attempting to open the `pmi_attribs` file.
    pub pmi_attribs_timeout: Duration,
    /// `CRAY_CTI_PMI_EXTRA_SLEEP` — extra sleep after a slow `pmi_attribs`
    /// open, to dodge a race. `None` means "compute from observed open time."
    pub pmi_extra_sleep: Option<Duration>,
    /// `CTI_OVERRIDE_MC` — skip the Slurm multi-cluster safety check.
    pub override_multicluster: bool,
    /// `CTI_OVERRIDE_EPROXY` — skip the Eproxy configuration check.
    pub override_eproxy: bool,
    /// `CTI_HOST_ADDRESS` — override the reported frontend hostname.
    pub host_address_override: Option<String>,
    /// `CTI_BASE_DIR` — installation root override.
    pub base_dir_override: Option<PathBuf>,
    /// `CTI_LAUNCHER_NAME` — override the expected job-launcher binary name.
    pub launcher_name_override: Option<String>,
    /// `CTI_LAUNCHER_SCRIPT` — set when the detected launcher is a wrapper script.
    pub launcher_is_script: bool,
    /// `LIBFLUX_PATH` — override libflux search path.
    pub libflux_path_override: Option<PathBuf>,
    /// `FLUX_URI` — Flux API socket, required for the Flux backend.
    pub flux_uri: Option<String>,
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => v != "0" && !v.is_empty(),
        Err(_) => false,
    }
}

fn env_flag_default_true(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => v != "0",
        Err(_) => true,
    }
}

impl Tunables {
    /// Read all tunables from the current process environment.
    ///
    /// Called exactly once, at `Frontend` construction: the env is a
    /// snapshot from that point forward, matching spec.md's "read
    /// read-only" framing for these variables.
    pub fn from_env() -> Self {
        Self {
            debug: env_flag("CTI_DBG"),
            log_dir: std::env::var_os("CTI_LOG_DIR").map(PathBuf::from),
            deduplicate_files: env_flag_default_true("CTI_DEDUPLICATE_FILES"),
            stage_dependencies_by_default: true,
            pmi_attribs_timeout: std::env::var("CRAY_CTI_PMI_FOPEN_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(DEFAULT_PMI_ATTRIBS_TIMEOUT_SECS)),
            pmi_extra_sleep: std::env::var("CRAY_CTI_PMI_EXTRA_SLEEP")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            override_multicluster: env_flag("CTI_OVERRIDE_MC"),
            override_eproxy: env_flag("CTI_OVERRIDE_EPROXY"),
            host_address_override: std::env::var("CTI_HOST_ADDRESS").ok(),
            base_dir_override: std::env::var_os("CTI_BASE_DIR").map(PathBuf::from),
            launcher_name_override: std::env::var("CTI_LAUNCHER_NAME").ok(),
            launcher_is_script: env_flag("CTI_LAUNCHER_SCRIPT"),
            libflux_path_override: std::env::var_os("LIBFLUX_PATH").map(PathBuf::from),
            flux_uri: std::env::var("FLUX_URI").ok(),
        }
    }
}

/// Read and unset `LD_PRELOAD` from the current process environment.
///
/// The Frontend unsets the variable in-process so it does not perturb CTI's
/// own helper processes, but saves the original value to re-inject into
/// every launched application and tool daemon (spec.md §3 Frontend
/// attributes). Returns the saved value, or `None` if it was not set.
///
/// # Safety
/// Must be called before any other thread reads `LD_PRELOAD`, i.e. at
/// Frontend construction. `std::env::remove_var` is only safe to call this
/// early in the process lifetime.
pub fn capture_and_clear_ld_preload() -> Option<String> {
    let saved = std::env::var("LD_PRELOAD").ok();
    if saved.is_some() {
        // SAFETY: called once at Frontend construction, before other threads
        // are spawned by this library.
        unsafe {
            std::env::remove_var("LD_PRELOAD");
        }
    }
    saved
}

/// Merge a saved `LD_PRELOAD` value with a caller-supplied one, following
/// spec.md §4.4 step 2 and tested by spec.md §8 invariant 5: strip a single
/// layer of surrounding quotes from the caller's value, prepend the saved
/// value with `:`, and re-quote.
pub fn merge_ld_preload(saved: &str, caller_value: Option<&str>) -> String {
    match caller_value {
        None => saved.to_string(),
        Some(raw) => {
            let stripped = raw.trim_matches(|c| c == '"' || c == '\'');
            format!("{saved}:{stripped}")
        }
    }
}
