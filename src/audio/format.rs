//! Audio format description
//!
//! AES67 payload formats are big-endian linear PCM. The node additionally
//! understands little-endian and float formats for the host-facing side of
//! the converters.

use serde::{Deserialize, Serialize};

/// Sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 16-bit signed integer (L16 on the wire)
    I16,
    /// 24-bit signed integer, packed in 3 bytes (L24 on the wire)
    I24,
    /// 32-bit signed integer
    I32,
    /// 32-bit IEEE float, full scale -1.0..1.0
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I24 => 3,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }

    pub fn bits_per_sample(self) -> u8 {
        (self.bytes_per_sample() * 8) as u8
    }

    /// The format used on the wire for a given bit depth, if valid for AES67.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            16 => Some(SampleFormat::I16),
            24 => Some(SampleFormat::I24),
            32 => Some(SampleFormat::I32),
            _ => None,
        }
    }

    /// The SDP encoding name (L16/L24) if this format is AES67-transportable.
    pub fn sdp_encoding_name(self) -> Option<&'static str> {
        match self {
            SampleFormat::I16 => Some("L16"),
            SampleFormat::I24 => Some("L24"),
            _ => None,
        }
    }
}

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Be,
    Le,
}

impl ByteOrder {
    /// The byte order of the machine the node runs on.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Be
        } else {
            ByteOrder::Le
        }
    }
}

/// A complete audio format: rate, channel count, encoding, byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub byte_order: ByteOrder,
}

impl Default for AudioFormat {
    fn default() -> Self {
        // AES67 baseline: L24/48000, stereo
        Self {
            sample_rate: 48_000,
            channels: 2,
            format: SampleFormat::I24,
            byte_order: ByteOrder::Be,
        }
    }
}

impl AudioFormat {
    pub fn bytes_per_sample(&self) -> usize {
        self.format.bytes_per_sample()
    }

    /// One frame carries one sample per channel.
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Number of frames in one packet of the given packet time.
    pub fn frames_per_ptime(&self, ptime_seconds: f64) -> u32 {
        (self.sample_rate as f64 * ptime_seconds).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_frame() {
        let format = AudioFormat::default();
        assert_eq!(format.bytes_per_frame(), 6); // L24 stereo

        let format = AudioFormat {
            channels: 8,
            format: SampleFormat::I16,
            ..AudioFormat::default()
        };
        assert_eq!(format.bytes_per_frame(), 16);
    }

    #[test]
    fn test_frames_per_ptime() {
        let format = AudioFormat::default();
        assert_eq!(format.frames_per_ptime(0.001), 48); // 1 ms at 48 kHz
        assert_eq!(format.frames_per_ptime(0.000125), 6); // 125 us at 48 kHz
    }

    #[test]
    fn test_from_bits() {
        assert_eq!(SampleFormat::from_bits(16), Some(SampleFormat::I16));
        assert_eq!(SampleFormat::from_bits(24), Some(SampleFormat::I24));
        assert_eq!(SampleFormat::from_bits(20), None);
    }
}
