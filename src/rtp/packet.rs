//! RTP packet encoding/decoding
//!
//! Zero-copy view over received RTP packets (RFC 3550) plus the owned
//! header used on the send path.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::RtpError;

/// Minimum RTP header size (without CSRC entries).
pub const RTP_HEADER_SIZE: usize = 12;

/// A validated, zero-copy view over an RTP packet.
#[derive(Debug, Clone, Copy)]
pub struct RtpPacketView<'a> {
    data: &'a [u8],
}

impl<'a> RtpPacketView<'a> {
    /// Validates the fixed header and returns a view.
    ///
    /// Checks: length, version 2, CSRC count within packet bounds.
    pub fn parse(data: &'a [u8]) -> Result<Self, RtpError> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(RtpError::TooShort);
        }
        if (data[0] >> 6) != 2 {
            return Err(RtpError::BadVersion);
        }

        let view = Self { data };
        if view.header_len() > data.len() {
            return Err(RtpError::BadLength);
        }
        Ok(view)
    }

    pub fn version(&self) -> u8 {
        self.data[0] >> 6
    }

    pub fn padding(&self) -> bool {
        self.data[0] & 0x20 != 0
    }

    pub fn extension(&self) -> bool {
        self.data[0] & 0x10 != 0
    }

    pub fn csrc_count(&self) -> u8 {
        self.data[0] & 0x0F
    }

    pub fn marker(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.data[1] & 0x7F
    }

    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    fn header_len(&self) -> usize {
        RTP_HEADER_SIZE + self.csrc_count() as usize * 4
    }

    /// The payload bytes after header and CSRC list, trailing padding
    /// removed.
    pub fn payload(&self) -> &'a [u8] {
        let start = self.header_len();
        let mut end = self.data.len();
        if self.padding() && end > start {
            let pad = self.data[end - 1] as usize;
            if pad <= end - start {
                end -= pad;
            }
        }
        &self.data[start..end]
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

/// The owned header state of an outgoing RTP stream.
#[derive(Debug, Clone)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence_number: 0,
            timestamp: 0,
            ssrc,
        }
    }

    /// Appends header and payload to `out`.
    pub fn encode(&self, payload: &[u8], out: &mut BytesMut) {
        out.reserve(RTP_HEADER_SIZE + payload.len());
        out.put_u8(2 << 6); // V=2, no padding, no extension, no CSRC
        out.put_u8((self.marker as u8) << 7 | (self.payload_type & 0x7F));
        out.put_u16(self.sequence_number);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
        out.put_slice(payload);
    }

    pub fn advance(&mut self, frames: u32) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut header = RtpHeader::new(97, 0xCAFEBABE);
        header.sequence_number = 12345;
        header.timestamp = 0xDEADBEEF;
        header.marker = true;

        let payload = [1u8, 2, 3, 4, 5, 6];
        let mut out = BytesMut::new();
        header.encode(&payload, &mut out);

        let view = RtpPacketView::parse(&out).unwrap();
        assert_eq!(view.version(), 2);
        assert!(view.marker());
        assert_eq!(view.payload_type(), 97);
        assert_eq!(view.sequence_number(), 12345);
        assert_eq!(view.timestamp(), 0xDEADBEEF);
        assert_eq!(view.ssrc(), 0xCAFEBABE);
        assert_eq!(view.payload(), &payload);
    }

    #[test]
    fn test_rejects_short_packet() {
        assert_eq!(
            RtpPacketView::parse(&[0x80; 11]).unwrap_err(),
            RtpError::TooShort
        );
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut data = [0u8; 12];
        data[0] = 1 << 6;
        assert_eq!(
            RtpPacketView::parse(&data).unwrap_err(),
            RtpError::BadVersion
        );
    }

    #[test]
    fn test_rejects_csrc_overflow() {
        let mut data = [0u8; 12];
        data[0] = 2 << 6 | 0x04; // 4 CSRC entries but no room for them
        assert_eq!(
            RtpPacketView::parse(&data).unwrap_err(),
            RtpError::BadLength
        );
    }

    #[test]
    fn test_padding_is_stripped() {
        let mut data = vec![0u8; 12];
        data[0] = 2 << 6 | 0x20; // V=2, padding
        data.extend_from_slice(&[10, 11, 12]);
        data.extend_from_slice(&[0, 0, 3]); // 3 bytes padding, last = count

        let view = RtpPacketView::parse(&data).unwrap();
        assert_eq!(view.payload(), &[10, 11, 12]);
    }

    #[test]
    fn test_advance_wraps() {
        let mut header = RtpHeader::new(97, 1);
        header.sequence_number = 0xFFFF;
        header.timestamp = u32::MAX - 10;
        header.advance(48);
        assert_eq!(header.sequence_number, 0);
        assert_eq!(header.timestamp, 37);
    }
}
