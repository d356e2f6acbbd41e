//! Argv contract for the per-node daemon launcher (spec.md §4.7 step 1),
//! grounded directly on the original C launcher's `getopt_long` table.

use clap::Parser;

/// One `-e VAR=VAL` assignment to apply to the launched daemon's
/// environment.
#[derive(Debug, Clone)]
pub struct EnvAssign {
    pub var: String,
    pub val: String,
}

impl std::str::FromStr for EnvAssign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (var, val) = s.split_once('=').ok_or_else(|| format!("'{s}' is not VAR=VAL"))?;
        if var.is_empty() || val.is_empty() {
            return Err(format!("'{s}' is not VAR=VAL"));
        }
        Ok(EnvAssign {
            var: var.to_string(),
            val: val.to_string(),
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "cti_daemon_launcher", about = "Per-node tool daemon launcher")]
pub struct Opts {
    /// WLM-specific job identifier, for diagnostics only.
    #[arg(short = 'a', long = "apid")]
    pub jobid: Option<String>,

    /// Basename of the tool daemon binary to exec, staged under `bin/`.
    #[arg(short = 'b', long = "binary")]
    pub binary: Option<String>,

    /// Per-session stage directory name, shared across every manifest
    /// instance shipped to this node for this Session.
    #[arg(short = 'd', long = "directory")]
    pub directory: String,

    /// Repeatable `VAR=VAL` environment assignment for the exec'd daemon.
    #[arg(short = 'e', long = "env")]
    pub env: Vec<EnvAssign>,

    /// Manifest instance number, used for the predecessor lock-wait.
    #[arg(short = 'i', long = "inst", default_value_t = 1)]
    pub instance: u32,

    /// Manifest tarball basename to unpack, or omitted for a stage-only
    /// invocation that only waits on predecessors.
    #[arg(short = 'm', long = "manifest")]
    pub manifest: Option<String>,

    /// Path to a WLM-provided `pmi_attribs`-style file, if any.
    #[arg(short = 'p', long = "attribs-path")]
    pub attribs_path: Option<String>,

    /// Integer WLM type tag, forwarded for the daemon's own use.
    #[arg(short = 'w', long = "wlm-type")]
    pub wlm_type: Option<i32>,

    /// Extra remote `LD_LIBRARY_PATH` entries to prefix, colon-separated.
    #[arg(long = "ld-lib-path")]
    pub ld_lib_path: Option<String>,

    #[arg(long = "debug")]
    pub debug: bool,

    /// Everything after `--`: the daemon's own argv, argv[0] rebased on exec.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub daemon_argv: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_assign_parses_var_equals_val() {
        let assign: EnvAssign = "FOO=bar".parse().unwrap();
        assert_eq!(assign.var, "FOO");
        assert_eq!(assign.val, "bar");
    }

    #[test]
    fn env_assign_rejects_missing_equals() {
        assert!("FOOBAR".parse::<EnvAssign>().is_err());
    }

    #[test]
    fn opts_parse_full_argv() {
        let opts = Opts::try_parse_from([
            "cti_daemon_launcher",
            "-a",
            "12345",
            "-b",
            "mydaemon",
            "-d",
            "cti_daemonAB12CD",
            "-e",
            "FOO=bar",
            "-i",
            "2",
            "-m",
            "cti_daemonAB12CD2.tar",
            "--debug",
            "--",
            "mydaemon",
            "--flag",
        ])
        .unwrap();
        assert_eq!(opts.binary.as_deref(), Some("mydaemon"));
        assert_eq!(opts.instance, 2);
        assert!(opts.debug);
        assert_eq!(opts.daemon_argv, vec!["mydaemon".to_string(), "--flag".to_string()]);
    }
}
