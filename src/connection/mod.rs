//! Connection handle
//!
//! A [`Vchan`] owns one end of a channel: the mapped region, a producer on
//! its outgoing ring, a consumer on its incoming ring and the local
//! notification endpoint. The server reads the left ring and writes the
//! right one; the client does the opposite.
//!
//! The handle exposes no fields. Everything read from shared memory goes
//! through the ring endpoints and the control block accessors, which
//! validate it first.

pub mod config;
pub mod handshake;
pub mod io;
pub mod state;
pub mod stats;
pub mod status;

use std::ptr::NonNull;

use crate::{
    error::Result,
    memory::{ConnectionPaths, SharedMemoryRegion},
    ringbuf::{ControlBlock, RingConsumer, RingLayout, RingProducer, Side},
    sync::EventChannel,
};

pub use config::VchanConfig;
pub use state::{ConnectProgress, ConnectionState};
pub use stats::{AtomicChannelStats, ChannelStats};

/// One end of a shared-memory byte channel
#[derive(Debug)]
pub struct Vchan {
    side: Side,
    /// Domain of the other end
    peer_domain: u32,
    port: i32,
    state: ConnectionState,
    blocking: bool,
    config: VchanConfig,
    paths: ConnectionPaths,
    /// Absent until a client finishes its handshake
    link: Option<Link>,
    channel: EventChannel,
    /// Peer endpoint address resolved by the first status query
    probed: bool,
    stats: AtomicChannelStats,
    closed: bool,
}

impl Vchan {
    fn assemble(
        side: Side,
        peer_domain: u32,
        port: i32,
        config: &VchanConfig,
        paths: ConnectionPaths,
        link: Option<Link>,
        channel: EventChannel,
    ) -> Self {
        Self {
            side,
            peer_domain,
            port,
            state: ConnectionState::Waiting,
            blocking: true,
            config: config.clone(),
            paths,
            link,
            channel,
            probed: false,
            stats: AtomicChannelStats::new(),
            closed: false,
        }
    }

    /// Which end of the channel this handle is
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn peer_domain(&self) -> u32 {
        self.peer_domain
    }

    pub fn port(&self) -> i32 {
        self.port
    }

    /// Capacity of the outgoing ring, once bound
    pub fn write_capacity(&self) -> Option<usize> {
        self.link.as_ref().map(|link| link.tx.capacity())
    }

    /// Capacity of the incoming ring, once bound
    pub fn read_capacity(&self) -> Option<usize> {
        self.link.as_ref().map(|link| link.rx.capacity())
    }

    /// Snapshot of the transfer counters
    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot(self.channel.stats())
    }
}

/// Mapped region plus the ring endpoints carved out of it
///
/// The endpoints and the control pointer borrow from `_region`, which is
/// declared last so it is unmapped after them.
#[derive(Debug)]
pub(crate) struct Link {
    tx: RingProducer<'static>,
    rx: RingConsumer<'static>,
    control: NonNull<ControlBlock>,
    _region: SharedMemoryRegion,
}

impl Link {
    /// Carve the rings for `side` out of a region laid out as `layout`
    ///
    /// The control block must already be initialized or validated.
    pub(crate) fn new(region: SharedMemoryRegion, layout: RingLayout, side: Side) -> Result<Self> {
        let control = region
            .ptr_at(0, std::mem::size_of::<ControlBlock>())?
            .cast::<ControlBlock>();
        let left = region.ptr_at(layout.left_offset(), layout.left_capacity())?;
        let right = region.ptr_at(layout.right_offset(), layout.right_capacity())?;

        // SAFETY: both rings lie inside the mapping (checked above), which
        // lives as long as the endpoints since they are dropped first, and
        // each side only ever builds one producer and one consumer.
        let (tx, rx) = unsafe {
            let block = control.as_ref();
            let left_indices = NonNull::from(block.left());
            let right_indices = NonNull::from(block.right());
            match side {
                Side::Server => (
                    RingProducer::from_raw(right_indices, right, layout.right_order),
                    RingConsumer::from_raw(left_indices, left, layout.left_order),
                ),
                Side::Client => (
                    RingProducer::from_raw(left_indices, left, layout.left_order),
                    RingConsumer::from_raw(right_indices, right, layout.right_order),
                ),
            }
        };

        Ok(Self {
            tx,
            rx,
            control,
            _region: region,
        })
    }

    pub(crate) fn control(&self) -> &ControlBlock {
        // SAFETY: the pointer targets the start of the live mapping
        unsafe { self.control.as_ref() }
    }
}

// The raw pointers all point into `_region`, which moves with the link.
unsafe impl Send for Link {}
