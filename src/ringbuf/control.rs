//! Shared control block placed at the start of every channel region
//!
//! Both peers map the same control page. Everything in it can be rewritten
//! by the remote side at any moment, so every value loaded from here is
//! treated as untrusted input and validated by the caller before use.
//!
//! Plain loads and stores are not enough across the two address spaces:
//! the ring indices are published with release stores and observed with
//! acquire loads, and the notify-request handshake uses sequentially
//! consistent read-modify-write operations plus a full fence.

use std::sync::atomic::{fence, AtomicU16, AtomicU32, AtomicU8, Ordering};

use crate::error::{Result, VchanError};

/// Magic value identifying an initialized control block ("VCHN")
pub const VCHAN_MAGIC: u32 = 0x5643_484E;

/// Layout version understood by this implementation
pub const LAYOUT_VERSION: u32 = 1;

/// Page granularity used for the region layout
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved for the control block before the first ring
pub const CONTROL_PAGE_SIZE: usize = PAGE_SIZE;

/// Smallest ring: 1 KiB
pub const MIN_RING_ORDER: u16 = 10;

/// Largest ring: 16 MiB
pub const MAX_RING_ORDER: u16 = 24;

/// Values of the per-side liveness bytes
pub mod live {
    /// Endpoint closed or never present
    pub const GONE: u8 = 0;
    /// Endpoint bound and running
    pub const LIVE: u8 = 1;
    /// Server published, client not attached yet
    pub const PENDING: u8 = 2;
}

/// Bits of the per-side notify-request bytes
pub mod notify_bits {
    /// Signal me after you produce data
    pub const WRITE: u8 = 1;
    /// Signal me after you consume data
    pub const READ: u8 = 2;
}

/// Which end of a channel a handle represents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Publishes the region and reads the left ring
    Server,
    /// Binds to a published region and reads the right ring
    Client,
}

impl Side {
    /// The opposite end
    pub fn peer(self) -> Self {
        match self {
            Side::Server => Side::Client,
            Side::Client => Side::Server,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Side::Server => "server",
            Side::Client => "client",
        }
    }
}

/// Producer/consumer counters of one ring direction
#[repr(C)]
#[derive(Debug, Default)]
pub struct RingIndices {
    cons: AtomicU32,
    prod: AtomicU32,
}

impl RingIndices {
    /// Observe the producer index; pairs with [`RingIndices::publish_prod`]
    pub fn load_prod(&self) -> u32 {
        self.prod.load(Ordering::Acquire)
    }

    /// Observe the consumer index; pairs with [`RingIndices::publish_cons`]
    pub fn load_cons(&self) -> u32 {
        self.cons.load(Ordering::Acquire)
    }

    /// Publish a new producer index after the payload bytes are in place
    pub fn publish_prod(&self, value: u32) {
        self.prod.store(value, Ordering::Release);
    }

    /// Publish a new consumer index after the payload bytes were copied out
    pub fn publish_cons(&self, value: u32) {
        self.cons.store(value, Ordering::Release);
    }

    fn reset(&self) {
        self.cons.store(0, Ordering::Relaxed);
        self.prod.store(0, Ordering::Relaxed);
    }
}

/// Ring sizes and offsets derived from the two ring orders
///
/// Offsets are never stored in shared memory; both sides recompute them
/// from the (validated) orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// log2 capacity of the client-to-server ring
    pub left_order: u16,
    /// log2 capacity of the server-to-client ring
    pub right_order: u16,
}

impl RingLayout {
    pub fn new(left_order: u16, right_order: u16) -> Result<Self> {
        for (name, order) in [("left_order", left_order), ("right_order", right_order)] {
            if !(MIN_RING_ORDER..=MAX_RING_ORDER).contains(&order) {
                return Err(VchanError::invalid_parameter(
                    name,
                    format!(
                        "ring order {} outside [{}, {}]",
                        order, MIN_RING_ORDER, MAX_RING_ORDER
                    ),
                ));
            }
        }
        Ok(Self {
            left_order,
            right_order,
        })
    }

    /// Round a requested minimum up to a ring order
    ///
    /// The rule is: next power of two, at least 1 KiB, at most 16 MiB.
    pub fn order_for(min_size: usize) -> Result<u16> {
        let max = crate::config::MAX_RING_SIZE;
        if min_size > max {
            return Err(VchanError::invalid_parameter(
                "min_size",
                format!("requested {} bytes, maximum ring is {} bytes", min_size, max),
            ));
        }
        let rounded = min_size.max(crate::config::MIN_RING_SIZE).next_power_of_two();
        Ok(rounded.trailing_zeros() as u16)
    }

    pub fn left_capacity(&self) -> usize {
        1 << self.left_order
    }

    pub fn right_capacity(&self) -> usize {
        1 << self.right_order
    }

    pub fn left_offset(&self) -> usize {
        CONTROL_PAGE_SIZE
    }

    pub fn right_offset(&self) -> usize {
        self.left_offset() + round_to_page(self.left_capacity())
    }

    /// Total bytes the region must span
    pub fn total_size(&self) -> usize {
        self.right_offset() + round_to_page(self.right_capacity())
    }

    /// Largest region any valid layout can produce
    pub fn max_total_size() -> usize {
        CONTROL_PAGE_SIZE + 2 * round_to_page(1 << MAX_RING_ORDER)
    }
}

fn round_to_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Control block shared by both peers
#[repr(C)]
#[derive(Debug)]
pub struct ControlBlock {
    magic: AtomicU32,
    version: AtomicU32,
    /// Client writes, server reads
    left: RingIndices,
    /// Server writes, client reads
    right: RingIndices,
    left_order: AtomicU16,
    right_order: AtomicU16,
    cli_live: AtomicU8,
    srv_live: AtomicU8,
    cli_notify: AtomicU8,
    srv_notify: AtomicU8,
}

impl ControlBlock {
    /// Fill in a freshly created block before it is published
    ///
    /// The magic is written last with release ordering so a reader that
    /// sees it also sees the rest of the block.
    pub fn initialize(&self, layout: RingLayout) {
        self.left.reset();
        self.right.reset();
        self.left_order.store(layout.left_order, Ordering::Relaxed);
        self.right_order.store(layout.right_order, Ordering::Relaxed);
        self.cli_live.store(live::PENDING, Ordering::Relaxed);
        self.srv_live.store(live::LIVE, Ordering::Relaxed);
        self.cli_notify.store(notify_bits::WRITE, Ordering::Relaxed);
        self.srv_notify.store(notify_bits::WRITE, Ordering::Relaxed);
        self.version.store(LAYOUT_VERSION, Ordering::Relaxed);
        self.magic.store(VCHAN_MAGIC, Ordering::Release);
    }

    /// Check the header written by the peer and derive the layout from it
    pub fn validate(&self) -> Result<RingLayout> {
        let magic = self.magic.load(Ordering::Acquire);
        if magic != VCHAN_MAGIC {
            return Err(VchanError::protocol(format!(
                "bad control block magic {:#010x}",
                magic
            )));
        }
        let version = self.version.load(Ordering::Relaxed);
        if version != LAYOUT_VERSION {
            return Err(VchanError::protocol(format!(
                "unsupported layout version {}",
                version
            )));
        }
        RingLayout::new(
            self.left_order.load(Ordering::Relaxed),
            self.right_order.load(Ordering::Relaxed),
        )
        .map_err(|e| VchanError::protocol(format!("peer published {}", e)))
    }

    /// Indices of the client-to-server ring
    pub fn left(&self) -> &RingIndices {
        &self.left
    }

    /// Indices of the server-to-client ring
    pub fn right(&self) -> &RingIndices {
        &self.right
    }

    /// Liveness byte of `side`, raw and unvalidated
    pub fn live(&self, side: Side) -> u8 {
        self.live_field(side).load(Ordering::Acquire)
    }

    pub fn set_live(&self, side: Side, value: u8) {
        self.live_field(side).store(value, Ordering::Release);
    }

    /// Ask the peer of `side` to signal on the given events
    ///
    /// Followed by a full fence: the caller re-reads the ring state after
    /// this, and that read must not be reordered before the request.
    pub fn request_notify(&self, side: Side, bits: u8) {
        self.notify_field(side).fetch_or(bits, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    /// Clear `bits` in the request byte of `side`, returning whether any was set
    pub fn take_notify_request(&self, side: Side, bits: u8) -> bool {
        fence(Ordering::SeqCst);
        self.notify_field(side).fetch_and(!bits, Ordering::SeqCst) & bits != 0
    }

    /// Current request byte of `side`
    pub fn notify_requests(&self, side: Side) -> u8 {
        self.notify_field(side).load(Ordering::Acquire)
    }

    fn live_field(&self, side: Side) -> &AtomicU8 {
        match side {
            Side::Server => &self.srv_live,
            Side::Client => &self.cli_live,
        }
    }

    fn notify_field(&self, side: Side) -> &AtomicU8 {
        match side {
            Side::Server => &self.srv_notify,
            Side::Client => &self.cli_notify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_block() -> Box<ControlBlock> {
        Box::new(ControlBlock {
            magic: AtomicU32::new(0),
            version: AtomicU32::new(0),
            left: RingIndices::default(),
            right: RingIndices::default(),
            left_order: AtomicU16::new(0),
            right_order: AtomicU16::new(0),
            cli_live: AtomicU8::new(0),
            srv_live: AtomicU8::new(0),
            cli_notify: AtomicU8::new(0),
            srv_notify: AtomicU8::new(0),
        })
    }

    #[test]
    fn test_control_block_fits_control_page() {
        assert_eq!(std::mem::size_of::<ControlBlock>(), 32);
        assert!(std::mem::size_of::<ControlBlock>() <= CONTROL_PAGE_SIZE);
    }

    #[test]
    fn test_order_rounding() {
        assert_eq!(RingLayout::order_for(0).unwrap(), 10);
        assert_eq!(RingLayout::order_for(1024).unwrap(), 10);
        assert_eq!(RingLayout::order_for(1025).unwrap(), 11);
        assert_eq!(RingLayout::order_for(4096).unwrap(), 12);
        assert_eq!(RingLayout::order_for(10_000).unwrap(), 14);
        assert_eq!(RingLayout::order_for(1 << 24).unwrap(), 24);
        assert!(RingLayout::order_for((1 << 24) + 1).is_err());
    }

    #[test]
    fn test_layout_offsets() {
        let layout = RingLayout::new(10, 13).unwrap();
        assert_eq!(layout.left_offset(), 4096);
        // a 1 KiB ring still takes a whole page
        assert_eq!(layout.right_offset(), 8192);
        assert_eq!(layout.total_size(), 8192 + 8192);
        assert!(layout.total_size() <= RingLayout::max_total_size());

        assert!(RingLayout::new(9, 12).is_err());
        assert!(RingLayout::new(12, 25).is_err());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        let block = zeroed_block();
        assert!(matches!(block.validate(), Err(VchanError::Protocol { .. })));

        block.initialize(RingLayout::new(12, 12).unwrap());
        assert_eq!(block.validate().unwrap(), RingLayout::new(12, 12).unwrap());

        block.left_order.store(40, Ordering::Relaxed);
        assert!(matches!(block.validate(), Err(VchanError::Protocol { .. })));
    }

    #[test]
    fn test_initial_state() {
        let block = zeroed_block();
        block.initialize(RingLayout::new(10, 10).unwrap());
        assert_eq!(block.live(Side::Server), live::LIVE);
        assert_eq!(block.live(Side::Client), live::PENDING);
        assert_eq!(block.notify_requests(Side::Server), notify_bits::WRITE);
        assert_eq!(block.notify_requests(Side::Client), notify_bits::WRITE);
    }

    #[test]
    fn test_notify_request_handshake() {
        let block = zeroed_block();

        block.request_notify(Side::Client, notify_bits::READ);
        assert!(!block.take_notify_request(Side::Client, notify_bits::WRITE));
        assert!(block.take_notify_request(Side::Client, notify_bits::READ));
        // one-shot: the request is consumed
        assert!(!block.take_notify_request(Side::Client, notify_bits::READ));
        assert_eq!(block.notify_requests(Side::Server), 0);
    }
}
