//! # vchan - Shared-Memory Byte Channels Between Domains
//!
//! vchan moves a reliable, ordered byte stream between two isolated
//! domains that share nothing but a memory region and a doorbell. One
//! side publishes a channel for a (domain, port) pair, the other binds to
//! it, and both then read and write through a pair of fixed-size rings.
//!
//! ## Features
//!
//! - **Untrusted peer**: every index read from shared memory is validated;
//!   a peer that lies is disconnected, never trusted
//! - **Partial and atomic transfers**: `write`/`read` move what fits,
//!   `send`/`recv` move all or nothing
//! - **Blocking and non-blocking modes**, switchable per handle
//! - **Event-loop integration**: a pollable descriptor with a one-shot
//!   acknowledgment, usable raw or through mio
//! - **C API** behind the `c-api` feature
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │          Vchan (handshake / io / status)         │
//! ├──────────────────────────┬───────────────────────┤
//! │  Shared region           │  Notification bridge  │
//! │  - control block         │  - signal endpoint    │
//! │  - left ring  (C → S)    │  - Armed/Fired/Acked  │
//! │  - right ring (S → C)    │  - mio Source         │
//! └──────────────────────────┴───────────────────────┘
//!           │                          │
//!           ▼                          ▼
//! ┌──────────────────┐    ┌──────────────────────────┐
//! │   C API Layer    │    │     Rust Native API      │
//! └──────────────────┘    └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use vchan::{config::DEFAULT_RING_SIZE, Vchan, VchanConfig};
//!
//! let config = VchanConfig::new("/run/vchan").with_local_domain(0);
//! let mut server = Vchan::server(&config, 5, 100, DEFAULT_RING_SIZE, DEFAULT_RING_SIZE)?;
//! server.write(b"hello")?;
//! # Ok::<(), vchan::VchanError>(())
//! ```

pub mod connection;
pub mod error;
pub mod memory;
pub mod ringbuf;
pub mod sync;

#[cfg(feature = "c-api")]
pub mod ffi;

// Main API re-exports
pub use connection::{
    ChannelStats, ConnectProgress, ConnectionState, Vchan, VchanConfig,
};
pub use error::{Result, VchanError};
pub use memory::{ConnectionPaths, Namespace, RegionConfig, SharedMemoryRegion};
pub use ringbuf::{
    ByteRing, ControlBlock, RingConsumer, RingIndices, RingLayout, RingProducer, Side,
};
pub use sync::{AckState, ChannelWatcher, EventChannel, NotificationStats};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Default configuration constants
pub mod config {
    /// Smallest ring a channel ever gets (1 KiB)
    pub const MIN_RING_SIZE: usize = 1 << crate::ringbuf::control::MIN_RING_ORDER;

    /// Largest ring a channel may request (16 MiB)
    pub const MAX_RING_SIZE: usize = 1 << crate::ringbuf::control::MAX_RING_ORDER;

    /// Ring size used when the caller has no preference
    pub const DEFAULT_RING_SIZE: usize = 64 * 1024;
}
