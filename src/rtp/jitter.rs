//! Timestamp-indexed jitter buffer
//!
//! A circular byte buffer that absorbs network jitter on the receive path.
//! Packets land at the position given by their RTP timestamp; the reader
//! trails the newest data by a configured delay. The buffer is unaware of
//! its contents beyond the frame size. Regions are zeroed after
//! consumption, so gaps from lost packets read back as silence.

use tracing::{debug, warn};

use crate::util::WrappingU32;

/// Ring capacity in multiples of the delay.
const BUFFER_SIZE_DELAY_FACTOR: usize = 2;

/// A circular byte buffer indexed by RTP timestamp.
#[derive(Debug, Default)]
pub struct JitterBuffer {
    buffer: Vec<u8>,
    /// Reader delay in frames. Reads fail until this many frames are
    /// buffered; contract: at least 1.
    delay: usize,
    bytes_per_frame: usize,
    /// One past the newest frame written (RTP timestamp units).
    most_recent_ts: WrappingU32,
    /// Frames between the read position and `most_recent_ts`.
    num_frames: usize,
    started: bool,
}

impl JitterBuffer {
    pub fn new(delay_frames: usize, bytes_per_frame: usize) -> Self {
        let mut buffer = Self::default();
        buffer.resize(delay_frames, bytes_per_frame);
        buffer
    }

    /// Resizes the ring to `delay * 2` frames and resets all state.
    pub fn resize(&mut self, delay_frames: usize, bytes_per_frame: usize) {
        self.delay = delay_frames;
        self.bytes_per_frame = bytes_per_frame;
        self.buffer.clear();
        self.buffer
            .resize(delay_frames * BUFFER_SIZE_DELAY_FACTOR * bytes_per_frame, 0);
        self.most_recent_ts = WrappingU32::default();
        self.num_frames = 0;
        self.started = false;
    }

    fn capacity_frames(&self) -> usize {
        self.delay * BUFFER_SIZE_DELAY_FACTOR
    }

    /// Frames available to read, excluding the delay.
    pub fn frames_available(&self) -> usize {
        self.num_frames.saturating_sub(self.delay)
    }

    pub fn bytes_available(&self) -> usize {
        self.frames_available() * self.bytes_per_frame
    }

    /// Writes `payload` at the ring position of `at_timestamp`.
    ///
    /// Returns false if the payload does not fit the frame grid, exceeds
    /// the ring, or is older than the window.
    pub fn write(&mut self, at_timestamp: u32, payload: &[u8]) -> bool {
        if self.bytes_per_frame == 0 || self.buffer.is_empty() {
            return false;
        }
        if payload.len() % self.bytes_per_frame != 0 {
            warn!("jitter buffer write must be a multiple of the frame size");
            return false;
        }
        if payload.len() > self.buffer.len() {
            warn!("jitter buffer write larger than the buffer");
            return false;
        }

        let at_timestamp = WrappingU32(at_timestamp);
        let frames = (payload.len() / self.bytes_per_frame) as u32;
        let end_ts = at_timestamp + frames;

        if self.started {
            let oldest_accepted = self.most_recent_ts - self.delay as u32;
            if at_timestamp.is_before(oldest_accepted) {
                debug!(
                    "discarding old data with timestamp {}",
                    at_timestamp.value()
                );
                return false;
            }
        }

        let position =
            (at_timestamp.value() as u64 * self.bytes_per_frame as u64) % self.buffer.len() as u64;
        let position = position as usize;
        let first = payload.len().min(self.buffer.len() - position);
        self.buffer[position..position + first].copy_from_slice(&payload[..first]);
        if first < payload.len() {
            self.buffer[..payload.len() - first].copy_from_slice(&payload[first..]);
        }

        if !self.started {
            self.started = true;
            self.most_recent_ts = end_ts;
            self.num_frames = frames as usize;
        } else if end_ts.is_after(self.most_recent_ts) {
            self.num_frames += end_ts.diff(self.most_recent_ts) as usize;
            self.most_recent_ts = end_ts;
            if self.num_frames > self.capacity_frames() {
                // Writer lapped the reader; the oldest frames are gone.
                self.num_frames = self.capacity_frames();
            }
        }

        true
    }

    /// Reads into `out`, consuming from the oldest buffered frame.
    ///
    /// Returns the number of bytes read: zero until `delay` frames are
    /// buffered, and never more than what keeps the delay intact. Consumed
    /// regions are zeroed so later gaps read as silence.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        if self.delay == 0 || self.bytes_per_frame == 0 {
            return 0; // contract: delay >= 1 frame
        }
        if out.is_empty() || out.len() % self.bytes_per_frame != 0 {
            return 0;
        }
        if self.num_frames < self.delay {
            return 0;
        }

        let frames_to_read = (out.len() / self.bytes_per_frame).min(self.frames_available());
        if frames_to_read == 0 {
            return 0;
        }

        let read_ts = self.most_recent_ts - self.num_frames as u32;
        let position =
            (read_ts.value() as u64 * self.bytes_per_frame as u64) % self.buffer.len() as u64;
        let position = position as usize;
        let bytes = frames_to_read * self.bytes_per_frame;

        let first = bytes.min(self.buffer.len() - position);
        out[..first].copy_from_slice(&self.buffer[position..position + first]);
        self.buffer[position..position + first].fill(0);
        if first < bytes {
            out[first..bytes].copy_from_slice(&self.buffer[..bytes - first]);
            self.buffer[..bytes - first].fill(0);
        }

        self.num_frames -= frames_to_read;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_ready_returns_zero() {
        let mut buffer = JitterBuffer::new(48, 6);

        // 24 of the 48 delay frames buffered: not ready yet
        assert!(buffer.write(0, &[1u8; 24 * 6]));
        let mut out = [0u8; 6 * 6];
        assert_eq!(buffer.read(&mut out), 0);

        // State unchanged: writing the rest makes it readable
        assert!(buffer.write(24, &[2u8; 24 * 6]));
        assert_eq!(buffer.frames_available(), 0); // exactly delay buffered
        assert!(buffer.write(48, &[3u8; 6]));
        assert_eq!(buffer.read(&mut out), 6);
        assert_eq!(&out[..6], &[1u8; 6]);
    }

    #[test]
    fn test_delay_zero_rejects_reads() {
        let mut buffer = JitterBuffer::new(0, 6);
        let mut out = [0u8; 6];
        assert_eq!(buffer.read(&mut out), 0);
    }

    #[test]
    fn test_sequential_write_read() {
        let mut buffer = JitterBuffer::new(2, 4);

        assert!(buffer.write(0, &[1, 1, 1, 1]));
        assert!(buffer.write(1, &[2, 2, 2, 2]));
        assert!(buffer.write(2, &[3, 3, 3, 3]));

        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out), 4);
        assert_eq!(out, [1, 1, 1, 1]);
    }

    #[test]
    fn test_gap_reads_as_silence() {
        let mut buffer = JitterBuffer::new(2, 4);

        assert!(buffer.write(0, &[1, 1, 1, 1]));
        // Frame 1 lost
        assert!(buffer.write(2, &[3, 3, 3, 3]));
        assert!(buffer.write(3, &[4, 4, 4, 4]));

        let mut out = [0u8; 8];
        assert_eq!(buffer.read(&mut out), 8);
        assert_eq!(&out[..4], &[1, 1, 1, 1]);
        assert_eq!(&out[4..], &[0, 0, 0, 0]); // silence in the gap
    }

    #[test]
    fn test_consumed_region_is_zeroed() {
        let mut buffer = JitterBuffer::new(2, 2);

        assert!(buffer.write(0, &[9, 9]));
        assert!(buffer.write(1, &[8, 8]));
        assert!(buffer.write(2, &[7, 7]));
        let mut out = [0u8; 2];
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(out, [9, 9]);

        // Timestamp 3 is never written; after the ring wrapped past the
        // consumed slot it must yield silence, not stale data.
        assert!(buffer.write(4, &[6, 6]));
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(out, [8, 8]);
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(out, [7, 7]);
        assert!(buffer.write(5, &[5, 5]));
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(out, [0, 0]); // the gap at timestamp 3
    }

    #[test]
    fn test_old_packet_is_dropped() {
        let mut buffer = JitterBuffer::new(4, 2);

        assert!(buffer.write(100, &[1, 1]));
        assert!(buffer.write(101, &[1, 1]));
        // 90 is more than `delay` behind the newest data
        assert!(!buffer.write(90, &[9, 9]));
    }

    #[test]
    fn test_unaligned_write_rejected() {
        let mut buffer = JitterBuffer::new(4, 6);
        assert!(!buffer.write(0, &[0u8; 5]));
    }

    #[test]
    fn test_timestamp_wrap() {
        let mut buffer = JitterBuffer::new(2, 1);

        assert!(buffer.write(u32::MAX - 1, &[1]));
        assert!(buffer.write(u32::MAX, &[2]));
        assert!(buffer.write(0, &[3]));

        let mut out = [0u8; 1];
        assert_eq!(buffer.read(&mut out), 1);
        assert_eq!(out, [1]);
    }
}
