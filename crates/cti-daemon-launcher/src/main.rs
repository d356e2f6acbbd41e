//! Per-node daemon launcher (spec.md §4.7): the single binary the WLM
//! backend execs once per `startDaemon` call, on every node of a job. It
//! chdirs into the session's staging directory, unpacks a manifest tarball
//! if one was shipped, waits for any earlier manifest instances sharing the
//! directory, then execs the tool daemon.

mod apid;
mod cli;

use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;

use cli::Opts;

const APID_ENV_VAR: &str = "CTI_APID";
const ALPS_DIR_VAR: &str = "CTI_ALPS_DIR";
const ROOT_DIR_VAR: &str = "CTI_ROOT_DIR";
const OLD_SCRATCH_ENV_VAR: &str = "CTI_OLD_TMPDIR";
const SCRATCH_ENV_VAR: &str = "TMPDIR";
const BIN_DIR_VAR: &str = "CTI_BIN_DIR";
const LIB_DIR_VAR: &str = "CTI_LIB_DIR";
const SHELL_ENV_VAR: &str = "SHELL";
const SHELL_PATH: &str = "/bin/sh";

fn main() {
    // Waste three fds before any other opens so a later 0/1/2 close by the
    // WLM doesn't hand a tool daemon's own opens those numbers unexpectedly.
    for _ in 0..3 {
        let _ = std::fs::OpenOptions::new().read(true).write(true).open("/dev/null");
    }

    let opts = Opts::parse();
    std::process::exit(match run(opts) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("cti_daemon_launcher: {err:#}");
            1
        }
    });
}

fn run(opts: Opts) -> Result<()> {
    let own_exe = std::env::current_exe().context("could not resolve own executable path")?;
    let own_exe_str = own_exe.to_string_lossy().into_owned();

    if opts.debug {
        init_debug_logging(&opts).context("could not set up debug logging")?;
    } else {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    }

    let location = apid::extract_apid(&own_exe_str)
        .with_context(|| format!("could not extract APID from own executable path '{own_exe_str}'"))?;
    // SAFETY: single-threaded at this point, before any daemon is exec'd.
    unsafe {
        std::env::set_var(APID_ENV_VAR, location.apid.to_string());
    }

    let tool_path = PathBuf::from(&location.tool_path);
    relax_and_enter(&tool_path)?;

    let stage_dir = tool_path.join(&opts.directory);

    if let Some(manifest) = &opts.manifest {
        unpack_manifest(&tool_path, manifest, &stage_dir)?;
    }

    let stat = std::fs::metadata(&stage_dir).with_context(|| format!("stage directory {} missing", stage_dir.display()))?;
    if !stat.is_dir() {
        bail!("{} is not a directory", stage_dir.display());
    }

    cti_lock::InstanceMarker::create(&tool_path, &opts.directory, opts.instance).context("could not create instance lock marker")?;

    export_daemon_env(&stage_dir, &opts);

    for assign in &opts.env {
        // SAFETY: single-threaded launcher process, no other readers yet.
        unsafe {
            std::env::set_var(&assign.var, &assign.val);
        }
    }

    tracing::info!(instance = opts.instance, directory = %opts.directory, "waiting for predecessor instances");
    cti_lock::wait_for_predecessors(&tool_path, &opts.directory, opts.instance);

    let Some(binary) = &opts.binary else {
        tracing::info!(stage = %stage_dir.display(), "no binary provided, stage-only invocation complete");
        return Ok(());
    };

    let binary_path = stage_dir.join("bin").join(binary);
    let meta = std::fs::metadata(&binary_path).with_context(|| format!("could not stat {}", binary_path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", binary_path.display());
    }

    let mut argv = opts.daemon_argv.clone();
    if !argv.is_empty() {
        argv[0] = binary_path.display().to_string();
    } else {
        argv.push(binary_path.display().to_string());
    }

    tracing::info!(binary = %binary_path.display(), "exec'ing tool daemon");
    let err = std::process::Command::new(&binary_path).args(&argv[1..]).exec();
    Err(err).with_context(|| format!("execv({}) failed", binary_path.display()))
}

/// chdir into the toolhelper path, relaxing its mode to add owner rwx
/// first (spec.md §4.7 step 5).
fn relax_and_enter(tool_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(tool_path).with_context(|| format!("could not stat {}", tool_path.display()))?;
    let mut perms = meta.permissions();
    perms.set_mode(perms.mode() | 0o700);
    std::fs::set_permissions(tool_path, perms).with_context(|| format!("could not chmod {}", tool_path.display()))?;

    std::env::set_current_dir(tool_path).with_context(|| format!("could not chdir to {}", tool_path.display()))
}

/// Untar `manifest` (named relative to `tool_path`) into `stage_dir`'s
/// parent, then remove the tarball (spec.md §4.7 step 6).
fn unpack_manifest(tool_path: &Path, manifest: &str, _stage_dir: &Path) -> Result<()> {
    let manifest_path = tool_path.join(manifest);
    let meta = std::fs::metadata(&manifest_path).with_context(|| format!("could not stat manifest {}", manifest_path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", manifest_path.display());
    }

    let file = std::fs::File::open(&manifest_path).context("could not open manifest")?;
    let mut archive = tar::Archive::new(file);
    archive
        .unpack(tool_path)
        .with_context(|| format!("could not unpack manifest {}", manifest_path.display()))?;

    let _ = std::fs::remove_file(&manifest_path);
    Ok(())
}

/// Export the five env vars the about-to-exec daemon inherits (spec.md
/// §4.7 step 8) and rewrite `PATH`/`LD_LIBRARY_PATH` (step 9).
fn export_daemon_env(stage_dir: &Path, opts: &Opts) {
    let stage = stage_dir.display().to_string();
    let bin_dir = stage_dir.join("bin").display().to_string();
    let lib_dir = stage_dir.join("lib").display().to_string();
    let tmp_dir = stage_dir.join("tmp").display().to_string();

    // SAFETY: single-threaded launcher process.
    unsafe {
        std::env::set_var(ALPS_DIR_VAR, &stage);
        std::env::set_var(ROOT_DIR_VAR, &stage);
        if let Ok(old_tmp) = std::env::var(SCRATCH_ENV_VAR) {
            std::env::set_var(OLD_SCRATCH_ENV_VAR, old_tmp);
        }
        std::env::set_var(SCRATCH_ENV_VAR, &tmp_dir);
        std::env::set_var(BIN_DIR_VAR, &bin_dir);
        std::env::set_var(LIB_DIR_VAR, &lib_dir);
        std::env::set_var(SHELL_ENV_VAR, SHELL_PATH);

        std::env::set_var("PATH", &bin_dir);
        let ld_lib_path = match &opts.ld_lib_path {
            Some(extra) => format!("{extra}:{lib_dir}"),
            None => lib_dir,
        };
        std::env::set_var("LD_LIBRARY_PATH", ld_lib_path);
    }
}

/// Redirect stdout and stderr to a per-node log file under `CTI_LOG_DIR`
/// (spec.md §4.7 step 4), falling back to the system temp directory when
/// unset. `dup2`'d onto fds 1 and 2 rather than just handed to
/// `tracing_subscriber`, so the tool daemon `exec`'d at the end of `run`
/// inherits the same redirected stdio.
fn init_debug_logging(opts: &Opts) -> std::io::Result<()> {
    let log_dir = std::env::var_os("CTI_LOG_DIR").map(PathBuf::from).unwrap_or_else(std::env::temp_dir);
    let log_path = log_dir.join(format!("cti_daemon_launcher.{}.{}.log", std::process::id(), opts.instance));
    let file = std::fs::OpenOptions::new().create(true).append(true).open(&log_path)?;

    // SAFETY: single-threaded at this point, before any other fd is shared
    // across threads; dup2 onto 1/2 is what makes the later `exec` inherit
    // the redirected stdio.
    unsafe {
        if libc::dup2(file.as_raw_fd(), 1) == -1 || libc::dup2(file.as_raw_fd(), 2) == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }

    tracing_subscriber::fmt().with_writer(std::io::stdout).init();
    tracing::info!(log = %log_path.display(), "debug logging redirected to log file");
    Ok(())
}
