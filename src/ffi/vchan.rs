//! C channel API
//!
//! Handles are boxed [`Vchan`]s. Platform settings come from the
//! environment (`VCHAN_ROOT`, `VCHAN_LOCAL_DOMAIN`). Passing a closed or
//! foreign pointer, or closing twice, is undefined behaviour.

use std::ffi::{c_int, c_void};

use crate::{
    connection::{ConnectProgress, VchanConfig},
    error::{Result, VchanError},
    Vchan,
};

use super::{
    types::{VchanHandle, VCHAN_CONNECT_PENDING, VCHAN_DISCONNECTED},
    utils::{handle_mut, level_code, transfer_code},
};

fn domain_id(domain: c_int) -> Result<u32> {
    u32::try_from(domain)
        .map_err(|_| VchanError::invalid_parameter("domain", "Domain must not be negative"))
}

fn handle_or_null(result: Result<Vchan>, op: &str) -> *mut VchanHandle {
    match result {
        Ok(vchan) => VchanHandle::into_raw(vchan),
        Err(e) => {
            tracing::debug!(error = %e, op, "vchan setup failed");
            std::ptr::null_mut()
        }
    }
}

pub(crate) fn server_init(
    config: Result<VchanConfig>,
    domain: c_int,
    port: c_int,
    read_min: usize,
    write_min: usize,
) -> *mut VchanHandle {
    let result = config.and_then(|config| {
        Vchan::server(&config, domain_id(domain)?, port, read_min, write_min)
    });
    handle_or_null(result, "server_init")
}

pub(crate) fn client_init(config: Result<VchanConfig>, domain: c_int, port: c_int) -> *mut VchanHandle {
    let result = config.and_then(|config| Vchan::client(&config, domain_id(domain)?, port));
    handle_or_null(result, "client_init")
}

pub(crate) fn client_init_async(
    config: Result<VchanConfig>,
    domain: c_int,
    port: c_int,
    watch_fd: *mut c_int,
) -> *mut VchanHandle {
    if watch_fd.is_null() {
        return std::ptr::null_mut();
    }
    let result = config.and_then(|config| Vchan::client_async(&config, domain_id(domain)?, port));
    match result {
        Ok((vchan, fd)) => {
            unsafe { *watch_fd = fd };
            VchanHandle::into_raw(vchan)
        }
        Err(e) => {
            tracing::debug!(error = %e, "vchan async client setup failed");
            std::ptr::null_mut()
        }
    }
}

/// Publish a channel for a client in `domain` on `port`
///
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn vchan_server_init(
    domain: c_int,
    port: c_int,
    read_min: usize,
    write_min: usize,
) -> *mut VchanHandle {
    server_init(VchanConfig::from_env(), domain, port, read_min, write_min)
}

/// Connect to a server, blocking until bound; returns null on failure
#[no_mangle]
pub extern "C" fn vchan_client_init(domain: c_int, port: c_int) -> *mut VchanHandle {
    client_init(VchanConfig::from_env(), domain, port)
}

/// Begin connecting; stores the descriptor to watch in `watch_fd`
#[no_mangle]
pub extern "C" fn vchan_client_init_async(
    domain: c_int,
    port: c_int,
    watch_fd: *mut c_int,
) -> *mut VchanHandle {
    client_init_async(VchanConfig::from_env(), domain, port, watch_fd)
}

/// Advance an async connect: 0 once connected, positive to keep polling,
/// negative on a fatal error (the handle must then be closed)
#[no_mangle]
pub extern "C" fn vchan_client_init_async_finish(handle: *mut VchanHandle, blocking: bool) -> c_int {
    let Some(handle) = (unsafe { handle_mut(handle) }) else {
        return -1;
    };
    match handle.inner.finish(blocking) {
        Ok(ConnectProgress::Connected) => 0,
        Ok(ConnectProgress::Pending) => VCHAN_CONNECT_PENDING,
        Err(e) => {
            tracing::debug!(error = %e, "vchan async connect failed");
            -1
        }
    }
}

/// Write up to `size` bytes; returns bytes written, 0, or -1
#[no_mangle]
pub extern "C" fn vchan_write(handle: *mut VchanHandle, data: *const c_void, size: usize) -> c_int {
    let Some(handle) = (unsafe { handle_mut(handle) }) else {
        return -1;
    };
    if data.is_null() && size > 0 {
        return -1;
    }
    let size = size.min(c_int::MAX as usize);
    let data = unsafe { slice_or_empty(data.cast::<u8>(), size) };
    transfer_code(handle.inner.write(data), "write")
}

/// Write exactly `size` bytes or nothing; returns `size`, 0, or -1
#[no_mangle]
pub extern "C" fn vchan_send(handle: *mut VchanHandle, data: *const c_void, size: usize) -> c_int {
    let Some(handle) = (unsafe { handle_mut(handle) }) else {
        return -1;
    };
    if (data.is_null() && size > 0) || size > c_int::MAX as usize {
        return -1;
    }
    let data = unsafe { slice_or_empty(data.cast::<u8>(), size) };
    transfer_code(handle.inner.send(data), "send")
}

/// Read up to `size` bytes; returns bytes read, 0, or -1
#[no_mangle]
pub extern "C" fn vchan_read(handle: *mut VchanHandle, data: *mut c_void, size: usize) -> c_int {
    let Some(handle) = (unsafe { handle_mut(handle) }) else {
        return -1;
    };
    if data.is_null() && size > 0 {
        return -1;
    }
    let size = size.min(c_int::MAX as usize);
    let buf = unsafe { slice_or_empty_mut(data.cast::<u8>(), size) };
    transfer_code(handle.inner.read(buf), "read")
}

/// Read exactly `size` bytes or nothing; returns `size`, 0, or -1
#[no_mangle]
pub extern "C" fn vchan_recv(handle: *mut VchanHandle, data: *mut c_void, size: usize) -> c_int {
    let Some(handle) = (unsafe { handle_mut(handle) }) else {
        return -1;
    };
    if (data.is_null() && size > 0) || size > c_int::MAX as usize {
        return -1;
    }
    let buf = unsafe { slice_or_empty_mut(data.cast::<u8>(), size) };
    transfer_code(handle.inner.recv(buf), "recv")
}

/// Acknowledge a readiness report; blocks if nothing is pending
#[no_mangle]
pub extern "C" fn vchan_wait(handle: *mut VchanHandle) -> c_int {
    let Some(handle) = (unsafe { handle_mut(handle) }) else {
        return -1;
    };
    match handle.inner.wait() {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = %e, "vchan wait failed");
            -1
        }
    }
}

/// Tear down and free a handle; null is ignored
#[no_mangle]
pub extern "C" fn vchan_close(handle: *mut VchanHandle) {
    if handle.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(handle) };
    handle.inner.close();
}

/// Descriptor to poll for readability
#[no_mangle]
pub extern "C" fn vchan_fd_for_select(handle: *mut VchanHandle) -> c_int {
    match unsafe { handle_mut(handle) } {
        Some(handle) => handle.inner.fd(),
        None => -1,
    }
}

/// 0 disconnected, 1 connected, 2 waiting for the peer
#[no_mangle]
pub extern "C" fn vchan_is_open(handle: *mut VchanHandle) -> c_int {
    match unsafe { handle_mut(handle) } {
        Some(handle) => handle.inner.status().as_code(),
        None => VCHAN_DISCONNECTED,
    }
}

/// Bytes readable right now
#[no_mangle]
pub extern "C" fn vchan_data_ready(handle: *mut VchanHandle) -> c_int {
    match unsafe { handle_mut(handle) } {
        Some(handle) => level_code(handle.inner.data_ready()),
        None => 0,
    }
}

/// Bytes writable right now
#[no_mangle]
pub extern "C" fn vchan_buffer_space(handle: *mut VchanHandle) -> c_int {
    match unsafe { handle_mut(handle) } {
        Some(handle) => level_code(handle.inner.buffer_space()),
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn vchan_set_blocking(handle: *mut VchanHandle, blocking: bool) {
    if let Some(handle) = unsafe { handle_mut(handle) } {
        handle.inner.set_blocking(blocking);
    }
}

unsafe fn slice_or_empty<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len)
    }
}

unsafe fn slice_or_empty_mut<'a>(ptr: *mut u8, len: usize) -> &'a mut [u8] {
    if len == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(ptr, len)
    }
}
