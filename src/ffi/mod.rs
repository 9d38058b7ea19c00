//! C Foreign Function Interface (FFI)
//!
//! A C-compatible surface over [`Vchan`](crate::Vchan) using the classic
//! return-code contract: positive for bytes moved, 0 for no progress in
//! non-blocking mode, -1 for a fatal error.

pub mod types;
pub mod utils;
pub mod vchan;
pub mod version;

pub use types::{
    VchanHandle, VCHAN_CONNECTED, VCHAN_CONNECT_PENDING, VCHAN_DISCONNECTED, VCHAN_WAITING,
};
pub use utils::vchan_free_string;
pub use vchan::{
    vchan_buffer_space, vchan_client_init, vchan_client_init_async,
    vchan_client_init_async_finish, vchan_close, vchan_data_ready, vchan_fd_for_select,
    vchan_is_open, vchan_read, vchan_recv, vchan_send, vchan_server_init, vchan_set_blocking,
    vchan_wait, vchan_write,
};
pub use version::{
    vchan_version_major, vchan_version_minor, vchan_version_patch, vchan_version_string,
};
