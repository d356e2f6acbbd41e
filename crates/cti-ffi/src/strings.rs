//! Converting the C calling convention's raw pointers into owned Rust
//! values. Every function here is `unsafe` because it trusts the caller's
//! pointer/length contract; callers are the `extern "C"` entry points,
//! which document the same contract to their own C callers.

use std::ffi::CStr;

use libc::c_char;

use cti_core::{CtiError, Result};

/// Read a single non-null, valid-UTF-8 C string.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(CtiError::Fatal("null string argument".to_string()));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| CtiError::Fatal("argument is not valid UTF-8".to_string()))
}

/// Read an optional C string: null becomes `None`.
pub(crate) unsafe fn read_opt_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>> {
    if ptr.is_null() { Ok(None) } else { unsafe { read_str(ptr) }.map(Some) }
}

/// Read a null-terminated array of C strings (a `char * const argv[]`
/// style parameter), stopping at the first null pointer.
pub(crate) unsafe fn read_str_array(ptr: *const *const c_char) -> Result<Vec<String>> {
    if ptr.is_null() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let mut i = 0isize;
    loop {
        let entry = unsafe { *ptr.offset(i) };
        if entry.is_null() {
            break;
        }
        out.push(unsafe { read_str(entry) }?.to_string());
        i += 1;
    }
    Ok(out)
}

/// Read a null-terminated array of `VAR=VAL` C strings into pairs.
pub(crate) unsafe fn read_env_array(ptr: *const *const c_char) -> Result<Vec<(String, String)>> {
    let raw = unsafe { read_str_array(ptr) }?;
    raw.into_iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| CtiError::Fatal(format!("'{entry}' is not VAR=VAL")))
        })
        .collect()
}
