//! Lock-free byte ring buffer for audio transfer
//!
//! This implements a single-producer single-consumer (SPSC) circular byte
//! buffer with independent atomic read/write cursors, sized to a power of
//! two at creation. One reader thread and one writer thread may operate
//! concurrently without locks; multiple readers or multiple writers are
//! not supported.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity SPSC byte ring buffer
pub struct RingBuffer {
    /// Backing storage, capacity bytes
    data: Box<[UnsafeCell<u8>]>,
    /// Capacity mask for wraparound (capacity - 1)
    mask: usize,
    /// Cumulative bytes written (producer cursor)
    write_pos: AtomicUsize,
    /// Cumulative bytes read (consumer cursor)
    read_pos: AtomicUsize,
}

// Safety: the cursors guarantee the producer only writes bytes the consumer
// is not reading and vice versa, as long as the SPSC discipline holds.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity in bytes
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be power of 2");

        let mut data = Vec::with_capacity(capacity);
        data.resize_with(capacity, || UnsafeCell::new(0));

        Self {
            data: data.into_boxed_slice(),
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Get buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently available to read
    pub fn read_available(&self) -> usize {
        self.write_pos
            .load(Ordering::Acquire)
            .wrapping_sub(self.read_pos.load(Ordering::Acquire))
    }

    /// Bytes currently available to write
    pub fn write_available(&self) -> usize {
        self.capacity() - self.read_available()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.read_available() == 0
    }

    /// Write up to `src.len()` bytes into the buffer.
    /// Returns the number of bytes actually written (may be less than
    /// `src.len()` if the buffer is full).
    pub fn write(&self, src: &[u8]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let available = self.capacity()
            - write_pos.wrapping_sub(self.read_pos.load(Ordering::Acquire));
        let count = src.len().min(available);

        for (i, &byte) in src[..count].iter().enumerate() {
            let index = write_pos.wrapping_add(i) & self.mask;
            // Safety: only the producer touches bytes in the writable region
            unsafe { *self.data[index].get() = byte };
        }

        self.write_pos
            .store(write_pos.wrapping_add(count), Ordering::Release);
        count
    }

    /// Read up to `dst.len()` bytes from the buffer.
    /// Returns the number of bytes actually read (may be less than
    /// `dst.len()` if the buffer holds less data).
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let available = self
            .write_pos
            .load(Ordering::Acquire)
            .wrapping_sub(read_pos);
        let count = dst.len().min(available);

        for (i, slot) in dst[..count].iter_mut().enumerate() {
            let index = read_pos.wrapping_add(i) & self.mask;
            // Safety: only the consumer touches bytes in the readable region
            *slot = unsafe { *self.data[index].get() };
        }

        self.read_pos
            .store(read_pos.wrapping_add(count), Ordering::Release);
        count
    }

    /// Discard all readable content. Consumer-side operation: advances the
    /// read cursor to the current write cursor.
    pub fn flush(&self) {
        self.read_pos
            .store(self.write_pos.load(Ordering::Acquire), Ordering::Release);
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
