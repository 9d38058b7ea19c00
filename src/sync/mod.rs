//! Notification bridge between the two sides of a channel
//!
//! The transport below is a one-byte doorbell with no payload. This
//! module turns it into an explicit one-shot acknowledgment protocol
//! (`Armed` → `Fired` → `Acknowledged`) and exposes the descriptor for
//! external event loops, either raw or through mio.

pub mod mio_notify;
pub mod notify;

pub use mio_notify::ChannelWatcher;
pub use notify::{AckState, EventChannel, NotificationStats};
