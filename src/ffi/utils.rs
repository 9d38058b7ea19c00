//! FFI utilities

use std::ffi::{c_char, c_int, CString};

use crate::error::Result;

use super::types::VchanHandle;

/// Convert Rust string to C string (caller must free)
pub fn string_to_c_str(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a C string allocated by this library
#[no_mangle]
pub extern "C" fn vchan_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

/// Borrow the handle behind a C pointer
///
/// # Safety
/// `handle` must be null or a live pointer from a `vchan_*_init` call.
pub(crate) unsafe fn handle_mut<'a>(handle: *mut VchanHandle) -> Option<&'a mut VchanHandle> {
    handle.as_mut()
}

/// Map a transfer result onto the positive / 0 / -1 convention
pub(crate) fn transfer_code(result: Result<usize>, op: &str) -> c_int {
    match result {
        Ok(n) => c_int::try_from(n).unwrap_or(c_int::MAX),
        Err(e) => {
            tracing::debug!(error = %e, op, "vchan transfer failed");
            -1
        }
    }
}

/// Clamp a level into a non-negative C int
pub(crate) fn level_code(level: usize) -> c_int {
    c_int::try_from(level).unwrap_or(c_int::MAX)
}
