use serde::{Deserialize, Serialize};

/// Workload manager backend selected by the WLM detector.
///
/// Mirrors `cti_wlm_type` in the public C ABI; `Mock` and `Localhost` are
/// additions for testing and single-node use that the original C enum did
/// not need to expose publicly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WlmKind {
    None,
    Alps,
    Slurm,
    Pals,
    Ssh,
    Flux,
    Mock,
    Localhost,
}

impl WlmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Alps => "alps",
            Self::Slurm => "slurm",
            Self::Pals => "pals",
            Self::Ssh => "ssh",
            Self::Flux => "flux",
            Self::Mock => "mock",
            Self::Localhost => "localhost",
        }
    }

    /// Parse the `wlm` half of a `CTI_WLM_IMPL=system/wlm` or `CTI_WLM_IMPL=wlm` override.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "alps" => Some(Self::Alps),
            "slurm" | "cray_slurm" => Some(Self::Slurm),
            "pals" => Some(Self::Pals),
            "ssh" => Some(Self::Ssh),
            "flux" => Some(Self::Flux),
            "mock" => Some(Self::Mock),
            "localhost" => Some(Self::Localhost),
            _ => None,
        }
    }
}

impl std::fmt::Display for WlmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// System-kind modifier layered on top of the WLM kind (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    Generic,
    Hpcm,
    Shasta,
    Xc,
    Cs,
    Eproxy,
}

impl SystemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Hpcm => "hpcm",
            Self::Shasta => "shasta",
            Self::Xc => "xc",
            Self::Cs => "cs",
            Self::Eproxy => "eproxy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Some(Self::Generic),
            "hpcm" => Some(Self::Hpcm),
            "shasta" => Some(Self::Shasta),
            "xc" => Some(Self::Xc),
            "cs" => Some(Self::Cs),
            "eproxy" => Some(Self::Eproxy),
            _ => None,
        }
    }
}

impl std::fmt::Display for SystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected (system, wlm) pair, as forced by `CTI_WLM_IMPL` or discovered by probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedWlm {
    pub system: SystemKind,
    pub wlm: WlmKind,
}

impl std::fmt::Display for DetectedWlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.system, self.wlm)
    }
}

/// Parse a `CTI_WLM_IMPL` value, which is either `wlm` or `system/wlm`.
pub fn parse_wlm_impl_override(value: &str) -> Option<DetectedWlm> {
    if let Some((system_str, wlm_str)) = value.split_once('/') {
        let system = SystemKind::parse(system_str)?;
        let wlm = WlmKind::parse(wlm_str)?;
        Some(DetectedWlm { system, wlm })
    } else {
        let wlm = WlmKind::parse(value)?;
        Some(DetectedWlm {
            system: SystemKind::Generic,
            wlm,
        })
    }
}

/// Whether dependency closure walking should be performed when staging a
/// binary or library (spec.md §4.5's `addBinary`/`addLibrary` deps_policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsPolicy {
    /// Stage the file only; do not walk its shared-object dependency closure.
    NoDeps,
    /// Walk and stage the transitive shared-object dependency closure.
    Stage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_wlm() {
        let d = parse_wlm_impl_override("slurm").unwrap();
        assert_eq!(d.wlm, WlmKind::Slurm);
        assert_eq!(d.system, SystemKind::Generic);
    }

    #[test]
    fn parse_system_slash_wlm() {
        let d = parse_wlm_impl_override("shasta/pals").unwrap();
        assert_eq!(d.system, SystemKind::Shasta);
        assert_eq!(d.wlm, WlmKind::Pals);
    }

    #[test]
    fn parse_unknown_fails() {
        assert!(parse_wlm_impl_override("nonsense").is_none());
        assert!(parse_wlm_impl_override("shasta/nonsense").is_none());
    }

    #[test]
    fn display_roundtrip() {
        let d = DetectedWlm {
            system: SystemKind::Xc,
            wlm: WlmKind::Alps,
        };
        assert_eq!(d.to_string(), "xc/alps");
    }

    #[test]
    fn wlm_kind_case_insensitive() {
        assert_eq!(WlmKind::parse("SLURM"), Some(WlmKind::Slurm));
        assert_eq!(WlmKind::parse("Flux"), Some(WlmKind::Flux));
    }
}
