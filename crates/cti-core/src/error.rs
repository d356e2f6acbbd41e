/// Error kinds surfaced across the CTI core (spec.md §7).
///
/// Internal crates return `Result<T, CtiError>` throughout; only the `cti-ffi`
/// veneer erases this to an integer sentinel plus a thread-local string.
#[derive(thiserror::Error, Debug)]
pub enum CtiError {
    #[error("WLM detection failed: {tried}\nset {override_var} to override")]
    DetectionFailed {
        tried: String,
        override_var: &'static str,
    },

    #[error("handle {0} is not registered or has been released")]
    HandleInvalid(u64),

    #[error("manifest has already been shipped or exec'd; no further modification is allowed")]
    AlreadyShipped,

    #[error(
        "conflict staging '{folder}/{basename}': already shipped from {existing}, tried to ship from {attempted}"
    )]
    Conflict {
        folder: String,
        basename: String,
        existing: String,
        attempted: String,
    },

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("'{0}' exists but is not a regular file")]
    NotRegularFile(String),

    #[error("permission denied on '{path}': {reason}")]
    PermissionDenied { path: String, reason: String },

    #[error("WLM helper '{helper}' failed: {stderr}")]
    WlmError { helper: String, stderr: String },

    #[error("MPIR error: {0}")]
    MpirError(String),

    #[error("backend daemon exited with status {0}; ship failed")]
    ShipFailed(i32),

    #[error("invariant violated: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CtiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_paths() {
        let err = CtiError::Conflict {
            folder: "lib".into(),
            basename: "libfoo.so".into(),
            existing: "/a/libfoo.so".into(),
            attempted: "/b/libfoo.so".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/a/libfoo.so"));
        assert!(msg.contains("/b/libfoo.so"));
        assert!(msg.contains("lib/libfoo.so"));
    }

    #[test]
    fn detection_failed_names_override_var() {
        let err = CtiError::DetectionFailed {
            tried: "slurm --version: not found".into(),
            override_var: "CTI_WLM_IMPL",
        };
        assert!(err.to_string().contains("CTI_WLM_IMPL"));
    }

    #[test]
    fn handle_invalid_carries_value() {
        let err = CtiError::HandleInvalid(42);
        assert_eq!(err.to_string(), "handle 42 is not registered or has been released");
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CtiError = io_err.into();
        assert!(matches!(err, CtiError::Io(_)));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CtiError>();
    }
}
