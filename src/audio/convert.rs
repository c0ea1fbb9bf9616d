//! Sample buffer conversion
//!
//! Transcodes between the wire formats (L16/L24 big-endian) and host formats
//! (integer or float, either byte order). Dispatch happens in two steps: the
//! sample encoding selects a per-sample decode/encode pair working on a
//! canonical left-justified 32-bit value, and the byte order selects how the
//! bytes of each sample are read or written. This keeps the conversion
//! matrix at (formats + orders) functions instead of their product.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use super::format::{ByteOrder, SampleFormat};
use crate::error::{NodeError, NodeResult};

/// Canonical scale: samples are left-justified signed 32-bit.
const CANONICAL_SCALE: f64 = 2_147_483_648.0; // 2^31

type DecodeFn = fn(&[u8]) -> i32;
type EncodeFn = fn(i32, &mut [u8]);

fn decode_i16_be(bytes: &[u8]) -> i32 {
    (BigEndian::read_i16(bytes) as i32) << 16
}

fn decode_i16_le(bytes: &[u8]) -> i32 {
    (LittleEndian::read_i16(bytes) as i32) << 16
}

fn decode_i24_be(bytes: &[u8]) -> i32 {
    (bytes[0] as i32) << 24 | (bytes[1] as i32) << 16 | (bytes[2] as i32) << 8
}

fn decode_i24_le(bytes: &[u8]) -> i32 {
    (bytes[2] as i32) << 24 | (bytes[1] as i32) << 16 | (bytes[0] as i32) << 8
}

fn decode_i32_be(bytes: &[u8]) -> i32 {
    BigEndian::read_i32(bytes)
}

fn decode_i32_le(bytes: &[u8]) -> i32 {
    LittleEndian::read_i32(bytes)
}

fn decode_f32_be(bytes: &[u8]) -> i32 {
    float_to_canonical(BigEndian::read_f32(bytes))
}

fn decode_f32_le(bytes: &[u8]) -> i32 {
    float_to_canonical(LittleEndian::read_f32(bytes))
}

fn encode_i16_be(sample: i32, bytes: &mut [u8]) {
    BigEndian::write_i16(bytes, (sample >> 16) as i16);
}

fn encode_i16_le(sample: i32, bytes: &mut [u8]) {
    LittleEndian::write_i16(bytes, (sample >> 16) as i16);
}

fn encode_i24_be(sample: i32, bytes: &mut [u8]) {
    bytes[0] = (sample >> 24) as u8;
    bytes[1] = (sample >> 16) as u8;
    bytes[2] = (sample >> 8) as u8;
}

fn encode_i24_le(sample: i32, bytes: &mut [u8]) {
    bytes[0] = (sample >> 8) as u8;
    bytes[1] = (sample >> 16) as u8;
    bytes[2] = (sample >> 24) as u8;
}

fn encode_i32_be(sample: i32, bytes: &mut [u8]) {
    BigEndian::write_i32(bytes, sample);
}

fn encode_i32_le(sample: i32, bytes: &mut [u8]) {
    LittleEndian::write_i32(bytes, sample);
}

fn encode_f32_be(sample: i32, bytes: &mut [u8]) {
    BigEndian::write_f32(bytes, canonical_to_float(sample));
}

fn encode_f32_le(sample: i32, bytes: &mut [u8]) {
    LittleEndian::write_f32(bytes, canonical_to_float(sample));
}

fn float_to_canonical(value: f32) -> i32 {
    let clamped = value.clamp(-1.0, 1.0) as f64;
    let scaled = (clamped * CANONICAL_SCALE).round();
    scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

fn canonical_to_float(sample: i32) -> f32 {
    (sample as f64 / CANONICAL_SCALE) as f32
}

fn decoder(format: SampleFormat, order: ByteOrder) -> DecodeFn {
    match (format, order) {
        (SampleFormat::I16, ByteOrder::Be) => decode_i16_be,
        (SampleFormat::I16, ByteOrder::Le) => decode_i16_le,
        (SampleFormat::I24, ByteOrder::Be) => decode_i24_be,
        (SampleFormat::I24, ByteOrder::Le) => decode_i24_le,
        (SampleFormat::I32, ByteOrder::Be) => decode_i32_be,
        (SampleFormat::I32, ByteOrder::Le) => decode_i32_le,
        (SampleFormat::F32, ByteOrder::Be) => decode_f32_be,
        (SampleFormat::F32, ByteOrder::Le) => decode_f32_le,
    }
}

fn encoder(format: SampleFormat, order: ByteOrder) -> EncodeFn {
    match (format, order) {
        (SampleFormat::I16, ByteOrder::Be) => encode_i16_be,
        (SampleFormat::I16, ByteOrder::Le) => encode_i16_le,
        (SampleFormat::I24, ByteOrder::Be) => encode_i24_be,
        (SampleFormat::I24, ByteOrder::Le) => encode_i24_le,
        (SampleFormat::I32, ByteOrder::Be) => encode_i32_be,
        (SampleFormat::I32, ByteOrder::Le) => encode_i32_le,
        (SampleFormat::F32, ByteOrder::Be) => encode_f32_be,
        (SampleFormat::F32, ByteOrder::Le) => encode_f32_le,
    }
}

/// Converts a sample buffer from one encoding to another.
///
/// `src` and `dst` must describe the same number of samples. Channel layout
/// is untouched; use [`interleave`]/[`deinterleave`] for layout changes.
pub fn convert_buffer(
    src: &[u8],
    src_format: SampleFormat,
    src_order: ByteOrder,
    dst: &mut [u8],
    dst_format: SampleFormat,
    dst_order: ByteOrder,
) -> NodeResult<()> {
    let src_stride = src_format.bytes_per_sample();
    let dst_stride = dst_format.bytes_per_sample();

    if src.len() % src_stride != 0 {
        return Err(NodeError::Config(
            "source buffer is not a whole number of samples".into(),
        ));
    }
    if src.len() / src_stride != dst.len() / dst_stride || dst.len() % dst_stride != 0 {
        return Err(NodeError::Config(
            "source and destination sample counts differ".into(),
        ));
    }

    if src_format == dst_format && src_order == dst_order {
        dst.copy_from_slice(src);
        return Ok(());
    }

    let decode = decoder(src_format, src_order);
    let encode = encoder(dst_format, dst_order);

    for (src_sample, dst_sample) in src.chunks_exact(src_stride).zip(dst.chunks_exact_mut(dst_stride)) {
        encode(decode(src_sample), dst_sample);
    }

    Ok(())
}

/// Reverses the byte order of every sample in place.
pub fn swap_bytes(data: &mut [u8], bytes_per_sample: usize) {
    debug_assert!(data.len() % bytes_per_sample == 0);
    if bytes_per_sample < 2 {
        return;
    }
    for sample in data.chunks_exact_mut(bytes_per_sample) {
        sample.reverse();
    }
}

/// Converts planar channel data to interleaved frames.
///
/// `src` holds `channels` contiguous planes; `dst` receives frames with one
/// sample per channel.
pub fn interleave(src: &[u8], dst: &mut [u8], channels: usize, bytes_per_sample: usize) {
    debug_assert_eq!(src.len(), dst.len());
    debug_assert!(channels >= 1);
    let frames = src.len() / (channels * bytes_per_sample);

    for frame in 0..frames {
        for channel in 0..channels {
            let src_index = (channel * frames + frame) * bytes_per_sample;
            let dst_index = (frame * channels + channel) * bytes_per_sample;
            dst[dst_index..dst_index + bytes_per_sample]
                .copy_from_slice(&src[src_index..src_index + bytes_per_sample]);
        }
    }
}

/// Converts interleaved frames to planar channel data. Inverse of
/// [`interleave`].
pub fn deinterleave(src: &[u8], dst: &mut [u8], channels: usize, bytes_per_sample: usize) {
    debug_assert_eq!(src.len(), dst.len());
    debug_assert!(channels >= 1);
    let frames = src.len() / (channels * bytes_per_sample);

    for frame in 0..frames {
        for channel in 0..channels {
            let src_index = (frame * channels + channel) * bytes_per_sample;
            let dst_index = (channel * frames + frame) * bytes_per_sample;
            dst[dst_index..dst_index + bytes_per_sample]
                .copy_from_slice(&src[src_index..src_index + bytes_per_sample]);
        }
    }
}
