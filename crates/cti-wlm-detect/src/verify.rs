//! Post-detection verification: confirms the chosen WLM/system pair is
//! actually usable, producing a fully diagnostic [`CtiError::DetectionFailed`]
//! on the first failed check.

use cti_core::{CtiError, DetectedWlm, Result, WlmKind};

use crate::command::CommandRunner;

fn detection_failed(tried: String) -> CtiError {
    CtiError::DetectionFailed {
        tried,
        override_var: "CTI_WLM_IMPL",
    }
}

/// Verify an MPIR-capable launcher binary: must be an ELF regular file (or
/// a script, carved out via `CTI_LAUNCHER_SCRIPT`) exporting
/// `MPIR_Breakpoint` and carrying `MPIR_being_debugged` debug symbols, per
/// `nm -D`/`nm` output.
pub fn verify_launcher(
    runner: &dyn CommandRunner,
    launcher_path: &str,
    detected: &DetectedWlm,
    is_script: bool,
) -> Result<()> {
    if is_script {
        // Wrapper scripts are exempted from the ELF/nm checks; the frontend
        // execs the script and attaches to its exec'd child instead.
        return Ok(());
    }

    let meta = std::fs::metadata(launcher_path).map_err(|_| {
        detection_failed(format!(
            "LauncherNotFound: '{launcher_path}' for {detected}"
        ))
    })?;
    if !meta.is_file() {
        return Err(detection_failed(format!(
            "NotBinaryFile: '{launcher_path}' for {detected}"
        )));
    }

    let nm = runner.run("nm", &["-D", launcher_path]);
    let nm_stdout = if nm.success {
        nm.stdout
    } else {
        runner.run("nm", &[launcher_path]).stdout
    };

    if !nm_stdout.contains("MPIR_Breakpoint") {
        return Err(detection_failed(format!(
            "NoMPIRBreakpoint: '{launcher_path}' for {detected}"
        )));
    }
    if !nm_stdout.contains("MPIR_being_debugged") {
        return Err(detection_failed(format!(
            "NoMPIRSymbols: '{launcher_path}' for {detected}"
        )));
    }
    Ok(())
}

/// PALS verification: confirm `palstat --version` runs successfully.
pub fn verify_pals(runner: &dyn CommandRunner) -> Result<()> {
    let out = runner.run("palstat", &["--version"]);
    if out.success {
        Ok(())
    } else {
        Err(detection_failed(format!(
            "palstat --version failed: {}",
            out.stderr
        )))
    }
}

/// Slurm multi-cluster safety check: reject detection when `sacctmgr`
/// reports more than one configured cluster, since CTI cannot disambiguate
/// which cluster a job id belongs to. Skipped entirely when
/// `CTI_OVERRIDE_MC` is set.
pub fn verify_slurm_single_cluster(runner: &dyn CommandRunner, override_mc: bool) -> Result<()> {
    if override_mc {
        return Ok(());
    }
    let out = runner.run("sacctmgr", &["show", "cluster", "-n", "-P", "format=Cluster"]);
    if !out.success {
        // sacctmgr absent or erroring is not itself a detection failure;
        // only an explicit multi-cluster listing blocks detection.
        return Ok(());
    }
    let clusters: Vec<&str> = out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if clusters.len() > 1 {
        return Err(detection_failed(format!(
            "multi-cluster Slurm configuration detected ({}); set CTI_OVERRIDE_MC to bypass",
            clusters.join(", ")
        )));
    }
    Ok(())
}

/// Eproxy verification: `eproxy --check` must report `is correct` for
/// `srun`, `squeue`, `scancel`, and `sbcast`.
pub fn verify_eproxy(runner: &dyn CommandRunner, override_eproxy: bool) -> Result<()> {
    if override_eproxy {
        return Ok(());
    }
    const EXPECTED_SUBCOMMANDS: [&str; 4] = ["srun", "squeue", "scancel", "sbcast"];
    let out = runner.run("eproxy", &["--check"]);
    if !out.success {
        return Err(detection_failed(format!(
            "eproxy --check failed: {}",
            out.stderr
        )));
    }
    for sub in EXPECTED_SUBCOMMANDS {
        let expected_line = format!("{sub} is correct");
        if !out.stdout.contains(&expected_line) {
            return Err(detection_failed(format!(
                "eproxy --check: '{sub}' is not correctly configured"
            )));
        }
    }
    Ok(())
}

/// Flux verification: requires `FLUX_URI` to be set, the referenced socket
/// path to exist, and `libflux` to be loadable (or overridden via
/// `LIBFLUX_PATH`).
pub fn verify_flux(flux_uri: Option<&str>, libflux_path: Option<&std::path::Path>) -> Result<()> {
    let uri = flux_uri.ok_or_else(|| {
        detection_failed("FLUX_URI is not set; cannot attach to a running Flux instance".into())
    })?;

    if let Some(socket_path) = uri.strip_prefix("local://") {
        if !std::path::Path::new(socket_path).exists() {
            return Err(detection_failed(format!(
                "Flux socket '{socket_path}' referenced by FLUX_URI does not exist"
            )));
        }
    }

    if let Some(path) = libflux_path
        && !path.exists()
    {
        return Err(detection_failed(format!(
            "LIBFLUX_PATH override '{}' does not exist",
            path.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use crate::command::mock::MockCommandRunner;
    use cti_core::SystemKind;

    fn fake_detected(wlm: WlmKind) -> DetectedWlm {
        DetectedWlm {
            system: SystemKind::Generic,
            wlm,
        }
    }

    #[test]
    fn verify_launcher_script_carve_out_skips_checks() {
        let mock = MockCommandRunner::new();
        let result = verify_launcher(&mock, "/no/such/launcher", &fake_detected(WlmKind::Slurm), true);
        assert!(result.is_ok());
    }

    #[test]
    fn verify_launcher_missing_file_fails() {
        let mock = MockCommandRunner::new();
        let err = verify_launcher(&mock, "/no/such/launcher", &fake_detected(WlmKind::Slurm), false)
            .unwrap_err();
        assert!(err.to_string().contains("LauncherNotFound"));
    }

    #[test]
    fn verify_launcher_requires_mpir_symbols() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        let mock = MockCommandRunner::new();
        mock.set(
            &format!("nm -D {path}"),
            CommandOutput {
                success: true,
                stdout: "MPIR_Breakpoint\n".into(),
                stderr: String::new(),
            },
        );
        let err =
            verify_launcher(&mock, &path, &fake_detected(WlmKind::Slurm), false).unwrap_err();
        assert!(err.to_string().contains("NoMPIRSymbols"));
    }

    #[test]
    fn verify_launcher_passes_with_both_symbols() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap().to_string();
        let mock = MockCommandRunner::new();
        mock.set(
            &format!("nm -D {path}"),
            CommandOutput {
                success: true,
                stdout: "MPIR_Breakpoint\nMPIR_being_debugged\n".into(),
                stderr: String::new(),
            },
        );
        assert!(verify_launcher(&mock, &path, &fake_detected(WlmKind::Slurm), false).is_ok());
    }

    #[test]
    fn verify_slurm_multicluster_blocks_detection() {
        let mock = MockCommandRunner::new();
        mock.set(
            "sacctmgr show cluster -n -P format=Cluster",
            CommandOutput {
                success: true,
                stdout: "clusterA\nclusterB\n".into(),
                stderr: String::new(),
            },
        );
        let err = verify_slurm_single_cluster(&mock, false).unwrap_err();
        assert!(err.to_string().contains("CTI_OVERRIDE_MC"));
    }

    #[test]
    fn verify_slurm_multicluster_override_skips_check() {
        let mock = MockCommandRunner::new();
        assert!(verify_slurm_single_cluster(&mock, true).is_ok());
    }

    #[test]
    fn verify_eproxy_requires_all_four_subcommands() {
        let mock = MockCommandRunner::new();
        mock.set(
            "eproxy --check",
            CommandOutput {
                success: true,
                stdout: "srun is correct\nsqueue is correct\nscancel is correct\n".into(),
                stderr: String::new(),
            },
        );
        let err = verify_eproxy(&mock, false).unwrap_err();
        assert!(err.to_string().contains("sbcast"));
    }

    #[test]
    fn verify_flux_requires_flux_uri() {
        let err = verify_flux(None, None).unwrap_err();
        assert!(err.to_string().contains("FLUX_URI"));
    }

    #[test]
    fn verify_flux_checks_local_socket_exists() {
        let err = verify_flux(Some("local:///no/such/socket"), None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
