//! Single-producer single-consumer byte ring over untrusted shared indices
//!
//! Each side keeps a private copy of the index it owns and never reads it
//! back from shared memory. The index owned by the peer is loaded, checked
//! against the private copy and rejected if it would put more than
//! `capacity` bytes in flight. Buffer offsets are always derived from the
//! private copy, so a hostile peer can at worst make us report a protocol
//! violation.

use std::{
    alloc::Layout,
    marker::PhantomData,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::error::{Result, VchanError};

use super::control::{RingIndices, MAX_RING_ORDER};

/// Heap-backed ring, used where both ends live in one address space
#[derive(Debug)]
pub struct ByteRing {
    /// Buffer storage
    buffer: NonNull<u8>,
    /// Shared counters
    indices: Box<RingIndices>,
    /// log2 of the capacity
    order: u16,
    /// Each endpoint is handed out once
    producer_taken: AtomicBool,
    consumer_taken: AtomicBool,
}

impl ByteRing {
    /// Create a new ring with the given capacity
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > 1 << MAX_RING_ORDER {
            return Err(VchanError::invalid_parameter(
                "capacity",
                "Capacity must be a power of 2, greater than 0 and at most 16 MiB",
            ));
        }

        let layout = Layout::array::<u8>(capacity)
            .map_err(|_| VchanError::memory("Failed to create layout for ring buffer"))?;

        let buffer = unsafe {
            let ptr = std::alloc::alloc_zeroed(layout);
            NonNull::new(ptr).ok_or_else(|| VchanError::memory("Failed to allocate ring buffer"))?
        };

        Ok(Self {
            buffer,
            indices: Box::default(),
            order: capacity.trailing_zeros() as u16,
            producer_taken: AtomicBool::new(false),
            consumer_taken: AtomicBool::new(false),
        })
    }

    /// Get the capacity of the ring in bytes
    pub fn capacity(&self) -> usize {
        1 << self.order
    }

    /// The shared counters, as the peer would see them
    pub fn indices(&self) -> &RingIndices {
        &self.indices
    }

    /// Take the writing end
    ///
    /// Fails if it was already taken, even if that producer has since been
    /// dropped.
    pub fn producer(&self) -> Result<RingProducer<'_>> {
        if self.producer_taken.swap(true, Ordering::AcqRel) {
            return Err(VchanError::invalid_parameter(
                "producer",
                "ring already has a producer",
            ));
        }
        // SAFETY: the storage lives as long as `self` and this is the only producer
        Ok(unsafe { RingProducer::from_raw(NonNull::from(&*self.indices), self.buffer, self.order) })
    }

    /// Take the reading end; fails if it was already taken
    pub fn consumer(&self) -> Result<RingConsumer<'_>> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            return Err(VchanError::invalid_parameter(
                "consumer",
                "ring already has a consumer",
            ));
        }
        // SAFETY: as for `producer`
        Ok(unsafe { RingConsumer::from_raw(NonNull::from(&*self.indices), self.buffer, self.order) })
    }
}

impl Drop for ByteRing {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::array::<u8>(self.capacity()) {
            unsafe { std::alloc::dealloc(self.buffer.as_ptr(), layout) };
        }
    }
}

unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

/// Writing end of a ring
#[derive(Debug)]
pub struct RingProducer<'a> {
    buffer: NonNull<u8>,
    indices: NonNull<RingIndices>,
    capacity: usize,
    mask: u32,
    /// Trusted producer index
    prod: u32,
    _phantom: PhantomData<&'a RingIndices>,
}

impl<'a> RingProducer<'a> {
    /// Build a producer over raw ring memory
    ///
    /// The starting position is taken from the shared producer index; any
    /// value is acceptable because offsets are masked.
    ///
    /// # Safety
    /// `indices` and `buffer` must stay valid for `'a`, `buffer` must span
    /// `1 << order` bytes, and no other producer may exist for this ring.
    pub unsafe fn from_raw(indices: NonNull<RingIndices>, buffer: NonNull<u8>, order: u16) -> Self {
        let capacity = 1usize << order;
        let prod = indices.as_ref().load_prod();
        Self {
            buffer,
            indices,
            capacity,
            mask: (capacity - 1) as u32,
            prod,
            _phantom: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Trusted producer position
    pub fn position(&self) -> u32 {
        self.prod
    }

    /// Free space, after validating the consumer index published by the peer
    pub fn space(&self) -> Result<usize> {
        let cons = self.indices().load_cons();
        let used = self.prod.wrapping_sub(cons) as usize;
        if used > self.capacity {
            return Err(VchanError::protocol(format!(
                "consumer index {} out of range for producer index {} (capacity {})",
                cons, self.prod, self.capacity
            )));
        }
        Ok(self.capacity - used)
    }

    /// Copy as much of `data` as fits; returns the number of bytes written
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let count = self.space()?.min(data.len());
        if count > 0 {
            self.commit(&data[..count]);
        }
        Ok(count)
    }

    /// Write all of `data` or nothing
    pub fn try_write_all(&mut self, data: &[u8]) -> Result<bool> {
        if self.space()? < data.len() {
            return Ok(false);
        }
        if !data.is_empty() {
            self.commit(data);
        }
        Ok(true)
    }

    fn commit(&mut self, data: &[u8]) {
        let offset = (self.prod & self.mask) as usize;
        let first = data.len().min(self.capacity - offset);

        unsafe {
            let base = self.buffer.as_ptr();
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset), first);
            std::ptr::copy_nonoverlapping(data.as_ptr().add(first), base, data.len() - first);
        }

        // Payload first, index second
        self.prod = self.prod.wrapping_add(data.len() as u32);
        self.indices().publish_prod(self.prod);
    }

    fn indices(&self) -> &RingIndices {
        unsafe { self.indices.as_ref() }
    }
}

/// Reading end of a ring
#[derive(Debug)]
pub struct RingConsumer<'a> {
    buffer: NonNull<u8>,
    indices: NonNull<RingIndices>,
    capacity: usize,
    mask: u32,
    /// Trusted consumer index
    cons: u32,
    _phantom: PhantomData<&'a RingIndices>,
}

impl<'a> RingConsumer<'a> {
    /// Build a consumer over raw ring memory
    ///
    /// # Safety
    /// Same requirements as [`RingProducer::from_raw`], for the single consumer.
    pub unsafe fn from_raw(indices: NonNull<RingIndices>, buffer: NonNull<u8>, order: u16) -> Self {
        let capacity = 1usize << order;
        let cons = indices.as_ref().load_cons();
        Self {
            buffer,
            indices,
            capacity,
            mask: (capacity - 1) as u32,
            cons,
            _phantom: PhantomData,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Trusted consumer position
    pub fn position(&self) -> u32 {
        self.cons
    }

    /// Unread bytes, after validating the producer index published by the peer
    pub fn available(&self) -> Result<usize> {
        let prod = self.indices().load_prod();
        let ready = prod.wrapping_sub(self.cons) as usize;
        if ready > self.capacity {
            return Err(VchanError::protocol(format!(
                "producer index {} out of range for consumer index {} (capacity {})",
                prod, self.cons, self.capacity
            )));
        }
        Ok(ready)
    }

    /// Copy up to `buf.len()` bytes out; returns the number of bytes read
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let count = self.available()?.min(buf.len());
        if count > 0 {
            self.take(&mut buf[..count]);
        }
        Ok(count)
    }

    /// Fill all of `buf` or read nothing
    pub fn try_read_exact(&mut self, buf: &mut [u8]) -> Result<bool> {
        if self.available()? < buf.len() {
            return Ok(false);
        }
        if !buf.is_empty() {
            self.take(buf);
        }
        Ok(true)
    }

    fn take(&mut self, buf: &mut [u8]) {
        let offset = (self.cons & self.mask) as usize;
        let first = buf.len().min(self.capacity - offset);

        unsafe {
            let base = self.buffer.as_ptr();
            std::ptr::copy_nonoverlapping(base.add(offset), buf.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, buf.as_mut_ptr().add(first), buf.len() - first);
        }

        self.cons = self.cons.wrapping_add(buf.len() as u32);
        self.indices().publish_cons(self.cons);
    }

    fn indices(&self) -> &RingIndices {
        unsafe { self.indices.as_ref() }
    }
}
