//! `cti_wlm_type`: the public enum tag for the detected workload manager.

use cti_core::WlmKind;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtiWlmType {
    None = 0,
    Alps = 1,
    Slurm = 2,
    Pals = 3,
    Ssh = 4,
    Flux = 5,
    Mock = 6,
    Localhost = 7,
}

impl From<WlmKind> for CtiWlmType {
    fn from(kind: WlmKind) -> Self {
        match kind {
            WlmKind::None => CtiWlmType::None,
            WlmKind::Alps => CtiWlmType::Alps,
            WlmKind::Slurm => CtiWlmType::Slurm,
            WlmKind::Pals => CtiWlmType::Pals,
            WlmKind::Ssh => CtiWlmType::Ssh,
            WlmKind::Flux => CtiWlmType::Flux,
            WlmKind::Mock => CtiWlmType::Mock,
            WlmKind::Localhost => CtiWlmType::Localhost,
        }
    }
}

/// Which WLM this process detected (or was forced to via `CTI_WLM_IMPL`).
/// Returns `CtiWlmType::None` if the Frontend hasn't been initialized yet.
#[unsafe(no_mangle)]
pub extern "C" fn cti_current_wlm_type() -> CtiWlmType {
    match cti_app::Frontend::instance() {
        Ok(fe) => fe.detected().wlm.into(),
        Err(_) => CtiWlmType::None,
    }
}
