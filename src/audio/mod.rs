//! Audio-Format Modul
//!
//! Formatbeschreibung und Sample-Konvertierung für AES67-Payloads

mod convert;
mod format;

pub use convert::{convert_buffer, deinterleave, interleave, swap_bytes};
pub use format::{AudioFormat, ByteOrder, SampleFormat};
