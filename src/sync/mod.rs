//! Lock-free / low-lock primitives shared between the audio and network threads
//!
//! These are the only data structures in the node that are touched from more
//! than one thread:
//! - [`TripleBuffer`]: SPSC frame exchange between audio callback and sender
//! - [`SpscRing`]: SPSC bulk byte stream between network and audio threads
//! - [`AtomicRwLock`] / [`AtomicRwCell`]: occasionally-updated configuration
//! - [`Rcu`]: read-mostly shared snapshots

mod rcu;
mod rwlock;
mod spsc;
mod triple_buffer;

pub use rcu::Rcu;
pub use rwlock::{AtomicRwCell, AtomicRwLock};
pub use spsc::SpscRing;
pub use triple_buffer::TripleBuffer;
