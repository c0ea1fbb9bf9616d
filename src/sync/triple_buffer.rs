//! SPSC triple buffer
//!
//! Exchanges whole audio frames between the audio callback (producer) and
//! the network thread (consumer) without blocking either side. The writer
//! always fills the "back" slot and atomically swaps back/ready; the reader
//! atomically claims "ready" and swaps it with its "front". A dirty bit in
//! the state word tells the reader whether "ready" holds a fresh value.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};

const DIRTY_BIT: u8 = 0b100;
const INDEX_MASK: u8 = 0b011;

/// A single-producer single-consumer triple buffer.
///
/// `write` never blocks and never observes the reader; `read` never blocks
/// and never observes the writer mid-write.
pub struct TripleBuffer<T> {
    slots: [UnsafeCell<T>; 3],
    /// Low two bits: index of the "ready" slot. Bit two: fresh value flag.
    state: AtomicU8,
    back: UnsafeCell<usize>,
    front: UnsafeCell<usize>,
}

// Safety: writer only touches `back` + the slot it indexes, reader only
// touches `front` + the slot it indexes; ownership of slots is transferred
// through `state` swaps with acquire/release ordering.
unsafe impl<T: Send> Send for TripleBuffer<T> {}
unsafe impl<T: Send> Sync for TripleBuffer<T> {}

impl<T: Default> TripleBuffer<T> {
    pub fn new() -> Self {
        Self::with_value(T::default(), T::default(), T::default())
    }
}

impl<T: Default> Default for TripleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TripleBuffer<T> {
    pub fn with_value(a: T, b: T, c: T) -> Self {
        Self {
            slots: [UnsafeCell::new(a), UnsafeCell::new(b), UnsafeCell::new(c)],
            state: AtomicU8::new(1), // slot 1 is "ready", not dirty
            back: UnsafeCell::new(0),
            front: UnsafeCell::new(2),
        }
    }

    /// Producer side: fill the back slot via `f` and publish it.
    ///
    /// Must only be called from one thread.
    pub fn write(&self, f: impl FnOnce(&mut T)) {
        let back = unsafe { &mut *self.back.get() };
        f(unsafe { &mut *self.slots[*back].get() });

        // Swap back <-> ready and mark dirty
        let prev = self
            .state
            .swap(*back as u8 | DIRTY_BIT, Ordering::AcqRel);
        *back = (prev & INDEX_MASK) as usize;
    }

    /// Consumer side: if a fresh value was published since the last read,
    /// claim it and return a reference valid until the next `read` call.
    ///
    /// Must only be called from one thread.
    pub fn read(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) & DIRTY_BIT == 0 {
            return None;
        }

        let front = unsafe { &mut *self.front.get() };
        let prev = self.state.swap(*front as u8, Ordering::AcqRel);
        *front = (prev & INDEX_MASK) as usize;

        Some(unsafe { &*self.slots[*front].get() })
    }

    /// The most recently claimed value, fresh or not.
    pub fn front(&self) -> &T {
        let front = unsafe { &*self.front.get() };
        unsafe { &*self.slots[*front].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_single_thread_roundtrip() {
        let buffer = TripleBuffer::<u32>::new();
        assert!(buffer.read().is_none());

        buffer.write(|v| *v = 42);
        assert_eq!(buffer.read(), Some(&42));
        // No new publish since the last read
        assert!(buffer.read().is_none());
        assert_eq!(*buffer.front(), 42);

        buffer.write(|v| *v = 1);
        buffer.write(|v| *v = 2);
        // Reader only ever sees the most recent publish
        assert_eq!(buffer.read(), Some(&2));
    }

    #[test]
    fn test_reader_never_sees_torn_value() {
        // Write pairs (n, n); a torn read would show mismatched halves.
        let buffer = Arc::new(TripleBuffer::<(u64, u64)>::new());
        let writer_buffer = buffer.clone();

        let writer = std::thread::spawn(move || {
            for n in 0..10_000u64 {
                writer_buffer.write(|v| *v = (n, n));
            }
        });

        let mut last = 0;
        for _ in 0..10_000 {
            if let Some(&(a, b)) = buffer.read() {
                assert_eq!(a, b);
                assert!(a >= last);
                last = a;
            }
        }

        writer.join().unwrap();
    }
}
