//! Per-channel counters

use std::sync::atomic::{AtomicU64, Ordering};

use crate::sync::NotificationStats;

/// Point-in-time copy of [`AtomicChannelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Bytes pushed into the outgoing ring
    pub bytes_written: u64,
    /// Bytes pulled from the incoming ring
    pub bytes_read: u64,
    /// Signals sent to the peer
    pub signals_sent: u64,
    /// One-shot acknowledgments performed
    pub waits: u64,
    /// Times a blocking call had to suspend
    pub suspensions: u64,
}

/// Thread-safe counters for one channel
#[derive(Debug)]
pub struct AtomicChannelStats {
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    suspensions: AtomicU64,
}

impl AtomicChannelStats {
    pub fn new() -> Self {
        Self {
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            suspensions: AtomicU64::new(0),
        }
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_suspension(&self) {
        self.suspensions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot, merged with the endpoint counters
    pub fn snapshot(&self, notify: NotificationStats) -> ChannelStats {
        ChannelStats {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            signals_sent: notify.notify_count,
            waits: notify.wait_count,
            suspensions: self.suspensions.load(Ordering::Relaxed),
        }
    }
}

impl Default for AtomicChannelStats {
    fn default() -> Self {
        Self::new()
    }
}
