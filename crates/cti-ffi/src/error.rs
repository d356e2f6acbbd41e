//! Process-wide last-error string (spec.md §6 `cti_error_str`): every
//! entry point stashes its failure here before returning its integer
//! sentinel, mirroring the original library's single `static char *
//! err_str` with a per-thread cell instead of a single global one.

use std::cell::RefCell;
use std::ffi::{CStr, CString};

use libc::c_char;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

const NO_ERROR: &CStr = c"no error";

pub(crate) fn set(err: &cti_core::CtiError) {
    let msg = err.to_string();
    let c = CString::new(msg).unwrap_or_else(|_| CString::new("error message contained an embedded NUL").unwrap());
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(c));
}

pub(crate) fn set_message(msg: impl Into<String>) {
    let c = CString::new(msg.into()).unwrap_or_else(|_| CString::new("error message contained an embedded NUL").unwrap());
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(c));
}

pub(crate) fn clear() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns a pointer to this thread's last error message, valid until the
/// next CTI call on the same thread. Never null.
#[unsafe(no_mangle)]
pub extern "C" fn cti_error_str() -> *const c_char {
    LAST_ERROR.with(|cell| match &*cell.borrow() {
        Some(c) => c.as_ptr(),
        None => NO_ERROR.as_ptr(),
    })
}

/// Copy this thread's last error message into `buf` (capacity `len`),
/// truncating and NUL-terminating if necessary. Returns 0 on success, -1 if
/// `buf` is null or `len` is zero.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cti_error_str_r(buf: *mut c_char, len: usize) -> i32 {
    if buf.is_null() || len == 0 {
        return -1;
    }
    let message = LAST_ERROR.with(|cell| match &*cell.borrow() {
        Some(c) => c.as_bytes().to_vec(),
        None => NO_ERROR.to_bytes().to_vec(),
    });
    let copy_len = message.len().min(len - 1);
    unsafe {
        std::ptr::copy_nonoverlapping(message.as_ptr(), buf as *mut u8, copy_len);
        *buf.add(copy_len) = 0;
    }
    0
}
