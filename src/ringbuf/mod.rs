//! Shared-memory byte rings and the control block that describes them

pub mod basic;
pub mod control;


// Re-export main types for convenience
pub use basic::{ByteRing, RingConsumer, RingProducer};
pub use control::{live, notify_bits, ControlBlock, RingIndices, RingLayout, Side};
