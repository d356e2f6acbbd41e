//! Extracting the ALPS APID and toolhelper path out of the launcher's own
//! executable path (spec.md §4.7 step 3), grounded on the original C
//! launcher's two `sscanf` patterns.

use std::sync::LazyLock;

use regex::Regex;

static TOOLHELPER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<path>/var/spool/alps/\d+/toolhelper(?P<apid>\d+))/").unwrap());

static TOOLHELPER_OBS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<path>/var/opt/cray/alps/spool/\d+/toolhelper(?P<apid>\d+))/").unwrap());

/// The APID and toolhelper directory recovered from the launcher's own
/// resolved executable path.
pub struct ApidLocation {
    pub apid: u64,
    pub tool_path: String,
}

/// Match `own_exe_path` against the standard and CLE-5.0 ("OBS") toolhelper
/// path layouts, returning the embedded APID and the toolhelper directory.
pub fn extract_apid(own_exe_path: &str) -> Option<ApidLocation> {
    for re in [&*TOOLHELPER_RE, &*TOOLHELPER_OBS_RE] {
        if let Some(caps) = re.captures(own_exe_path) {
            let apid = caps.name("apid")?.as_str().parse().ok()?;
            let tool_path = caps.name("path")?.as_str().to_string();
            return Some(ApidLocation { apid, tool_path });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_standard_toolhelper_path() {
        let found = extract_apid("/var/spool/alps/7/toolhelper12345/bin/cti_daemon_launcher").unwrap();
        assert_eq!(found.apid, 12345);
        assert_eq!(found.tool_path, "/var/spool/alps/7/toolhelper12345");
    }

    #[test]
    fn matches_cle5_obs_toolhelper_path() {
        let found = extract_apid("/var/opt/cray/alps/spool/7/toolhelper98/x").unwrap();
        assert_eq!(found.apid, 98);
        assert_eq!(found.tool_path, "/var/opt/cray/alps/spool/7/toolhelper98");
    }

    #[test]
    fn rejects_unrelated_path() {
        assert!(extract_apid("/home/user/bin/somewhere").is_none());
    }
}
