//! FFI type definitions and handle types

use std::ffi::c_int;

use crate::Vchan;

/// Opaque handle for C callers
///
/// Only ever seen through a pointer returned by one of the `vchan_*_init`
/// functions and released by `vchan_close`.
pub struct VchanHandle {
    pub(crate) inner: Vchan,
}

impl VchanHandle {
    pub(crate) fn into_raw(inner: Vchan) -> *mut VchanHandle {
        Box::into_raw(Box::new(VchanHandle { inner }))
    }
}

/// Status codes returned by `vchan_is_open` (see `ConnectionState::as_code`)
pub const VCHAN_DISCONNECTED: c_int = 0;
pub const VCHAN_CONNECTED: c_int = 1;
pub const VCHAN_WAITING: c_int = 2;

/// Return value of `vchan_client_init_async_finish` while still waiting
pub const VCHAN_CONNECT_PENDING: c_int = 1;
