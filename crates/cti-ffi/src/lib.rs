//! C ABI veneer over `cti-app`/`cti-session` (spec.md §6): integer handle
//! sentinels, a thread-local last-error string, and `catch_unwind` at every
//! entry point so a panic on this side never unwinds into a C caller.

mod api;
mod error;
mod strings;
mod wlm;

pub use api::*;
pub use error::{cti_error_str, cti_error_str_r};
pub use wlm::{CtiWlmType, cti_current_wlm_type};

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::ptr;

    use super::*;

    fn init() {
        assert_eq!(cti_init(), 0);
    }

    #[test]
    fn init_is_idempotent() {
        init();
        assert_eq!(cti_init(), 0);
    }

    #[test]
    fn error_str_reports_no_error_initially_on_a_fresh_thread() {
        std::thread::spawn(|| unsafe {
            let msg = std::ffi::CStr::from_ptr(cti_error_str());
            assert_eq!(msg.to_str().unwrap(), "no error");
        })
        .join()
        .unwrap();
    }

    #[test]
    fn unknown_app_handle_reports_invalid_without_init() {
        assert_eq!(cti_appIsValid(999_999), 0);
    }

    #[test]
    fn launch_create_session_manifest_and_ship_round_trip() {
        init();
        let echo = CString::new("/bin/sh").unwrap();
        let argv = [echo.as_ptr(), ptr::null()];
        let app_id = unsafe { cti_launchApp(argv.as_ptr(), ptr::null(), ptr::null(), ptr::null()) };
        assert_ne!(app_id, 0);
        assert_eq!(cti_appIsValid(app_id), 1);

        let session_id = cti_createSession(app_id);
        assert_ne!(session_id, 0);
        assert_eq!(cti_sessionIsValid(app_id, session_id), 1);

        let manifest_id = cti_createManifest(app_id, session_id);
        assert_ne!(manifest_id, 0);
        assert_eq!(cti_manifestIsValid(manifest_id), 1);

        let lib_dir = CString::new("/opt/cti/extra").unwrap();
        assert_eq!(unsafe { cti_addManifestLibDir(manifest_id, lib_dir.as_ptr()) }, 0);

        assert_eq!(cti_sendManifest(manifest_id), 0);
        assert_eq!(cti_destroyManifest(manifest_id), 0);
        assert_eq!(cti_manifestIsValid(manifest_id), 0);

        assert_eq!(cti_destroySession(app_id, session_id), 0);
        assert_eq!(cti_deregisterApp(app_id), 0);
        assert_eq!(cti_appIsValid(app_id), 0);
    }

    #[test]
    fn error_str_r_truncates_into_a_small_buffer() {
        init();
        let echo = CString::new("/bin/sh").unwrap();
        let bogus = CString::new("not VAR=VAL").unwrap();
        let argv = [echo.as_ptr(), ptr::null()];
        let env = [bogus.as_ptr(), ptr::null()];
        let app_id = unsafe { cti_launchApp(argv.as_ptr(), env.as_ptr(), ptr::null(), ptr::null()) };
        assert_eq!(app_id, 0);

        let mut buf = [0i8; 8];
        let rc = unsafe { cti_error_str_r(buf.as_mut_ptr(), buf.len()) };
        assert_eq!(rc, 0);
        assert_eq!(buf[7], 0);
    }
}
