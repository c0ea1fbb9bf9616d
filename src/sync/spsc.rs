//! SPSC byte ring buffer
//!
//! Moves bulk byte streams between the network thread and the audio thread.
//! One producer, one consumer; both sides are wait-free. Capacity is fixed
//! at construction, one slot is sacrificed to distinguish full from empty.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single-producer single-consumer ring of bytes.
pub struct SpscRing {
    buffer: UnsafeCell<Vec<u8>>,
    capacity: usize,
    head: AtomicUsize, // consumer position
    tail: AtomicUsize, // producer position
}

// Safety: producer only writes buffer[tail..] and tail, consumer only reads
// buffer[head..] and head; positions are exchanged with acquire/release.
unsafe impl Send for SpscRing {}
unsafe impl Sync for SpscRing {}

impl SpscRing {
    /// Creates a ring able to hold `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        Self {
            buffer: UnsafeCell::new(vec![0; capacity + 1]),
            capacity: capacity + 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Number of bytes available to read.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + self.capacity - head) % self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free space in bytes.
    pub fn space(&self) -> usize {
        self.capacity - 1 - self.len()
    }

    /// Producer side: appends as much of `data` as fits.
    ///
    /// Returns the number of bytes written. Must only be called from one
    /// thread.
    pub fn write(&self, data: &[u8]) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let space = (head + self.capacity - tail - 1) % self.capacity;
        let to_write = data.len().min(space);
        if to_write == 0 {
            return 0;
        }

        let buffer = unsafe { &mut *self.buffer.get() };
        let first = to_write.min(self.capacity - tail);
        buffer[tail..tail + first].copy_from_slice(&data[..first]);
        if first < to_write {
            buffer[..to_write - first].copy_from_slice(&data[first..to_write]);
        }

        self.tail
            .store((tail + to_write) % self.capacity, Ordering::Release);
        to_write
    }

    /// Consumer side: reads up to `out.len()` bytes.
    ///
    /// Returns the number of bytes read. Must only be called from one
    /// thread.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        let available = (tail + self.capacity - head) % self.capacity;
        let to_read = out.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let buffer = unsafe { &*self.buffer.get() };
        let first = to_read.min(self.capacity - head);
        out[..first].copy_from_slice(&buffer[head..head + first]);
        if first < to_read {
            out[first..to_read].copy_from_slice(&buffer[..to_read - first]);
        }

        self.head
            .store((head + to_read) % self.capacity, Ordering::Release);
        to_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_write_read_roundtrip() {
        let ring = SpscRing::new(16);
        assert_eq!(ring.write(b"hello"), 5);
        assert_eq!(ring.len(), 5);

        let mut out = [0u8; 8];
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(&out[..5], b"hello");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_ring_rejects_overflow() {
        let ring = SpscRing::new(4);
        assert_eq!(ring.write(b"abcdef"), 4);
        assert_eq!(ring.write(b"x"), 0);

        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn test_wraparound() {
        let ring = SpscRing::new(8);
        let mut out = [0u8; 8];

        for chunk in 0..100u8 {
            let data = [chunk, chunk, chunk];
            assert_eq!(ring.write(&data), 3);
            assert_eq!(ring.read(&mut out[..3]), 3);
            assert_eq!(&out[..3], &data);
        }
    }

    #[test]
    fn test_concurrent_stream_preserves_order() {
        let ring = Arc::new(SpscRing::new(64));
        let producer_ring = ring.clone();

        let producer = std::thread::spawn(move || {
            let mut next = 0u8;
            while next < 200 {
                if producer_ring.write(&[next]) == 1 {
                    next = next.wrapping_add(1);
                }
            }
        });

        let mut expected = 0u8;
        let mut byte = [0u8; 1];
        while expected < 200 {
            if ring.read(&mut byte) == 1 {
                assert_eq!(byte[0], expected);
                expected += 1;
            }
        }

        producer.join().unwrap();
    }
}
