//! Scheduled RTP sender
//!
//! Emits one stream of RTP packets paced against the PTP clock. The send
//! loop ticks at a tenth of the packet time and transmits every packet
//! whose timestamp the media clock has reached, requesting frames from a
//! producer callback just in time. A bounded burst per tick keeps a
//! stalled clock from flooding the network.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::audio::{swap_bytes, AudioFormat, ByteOrder};
use crate::error::NodeResult;
use crate::ptp::PtpClock;
use crate::rtp::packet::RtpHeader;
use crate::sync::{SpscRing, TripleBuffer};
use crate::util::WrappingU32;

/// Upper bound of packets sent per tick.
const MAX_PACKETS_PER_TICK: u32 = 10;

/// Called for every outgoing packet to fill `buf` with `framecount` frames
/// starting at the given RTP timestamp. Returning false skips transmission.
pub type ProducerFn = Box<dyn FnMut(u32, &mut [u8]) -> bool + Send>;

/// Producer draining an SPSC byte ring fed by the audio thread.
///
/// Underruns skip the packet; the ring never blocks either side.
pub fn ring_producer(ring: Arc<SpscRing>) -> ProducerFn {
    Box::new(move |_timestamp, buf: &mut [u8]| {
        if ring.len() < buf.len() {
            return false;
        }
        ring.read(buf) == buf.len()
    })
}

/// Producer consuming whole blocks from a triple buffer: the audio
/// callback publishes fixed-size blocks, the sender picks up the freshest.
pub fn block_producer(blocks: Arc<TripleBuffer<Vec<u8>>>) -> ProducerFn {
    Box::new(move |_timestamp, buf: &mut [u8]| match blocks.read() {
        Some(block) if block.len() == buf.len() => {
            buf.copy_from_slice(block);
            true
        }
        _ => false,
    })
}

/// Configuration of one outgoing stream.
#[derive(Debug, Clone)]
pub struct RtpSenderConfig {
    pub destination: SocketAddr,
    pub payload_type: u8,
    /// Format of the produced audio; the wire is always big-endian.
    pub format: AudioFormat,
    /// Frames per packet, derived from ptime.
    pub framecount: u32,
}

/// Fills `out` with the next RTP packet: requests audio from the producer,
/// converts to network byte order if needed and advances sequence number
/// and timestamp.
fn assemble_packet(
    header: &mut RtpHeader,
    producer: &mut ProducerFn,
    scratch: &mut [u8],
    needs_swap: bool,
    bytes_per_sample: usize,
    framecount: u32,
    out: &mut BytesMut,
) -> bool {
    if !producer(header.timestamp, scratch) {
        return false; // no data provided
    }

    if needs_swap {
        swap_bytes(scratch, bytes_per_sample);
    }

    out.clear();
    header.encode(scratch, out);
    header.advance(framecount);
    true
}

/// One paced RTP output stream.
pub struct RtpStreamSender {
    socket: tokio::net::UdpSocket,
    interface: Ipv4Addr,
    config: RtpSenderConfig,
    clock: Arc<PtpClock>,
    header: RtpHeader,
    producer: ProducerFn,
    scratch: Vec<u8>,
}

impl RtpStreamSender {
    /// Binds a send socket on the given interface.
    pub async fn new(
        interface: Ipv4Addr,
        config: RtpSenderConfig,
        clock: Arc<PtpClock>,
        producer: ProducerFn,
    ) -> NodeResult<Self> {
        let socket = tokio::net::UdpSocket::bind((interface, 0)).await?;
        socket.set_multicast_ttl_v4(64)?;

        let ssrc: u32 = rand::random();
        let mut header = RtpHeader::new(config.payload_type, ssrc);
        header.sequence_number = rand::random();

        let bytes_per_packet = config.framecount as usize * config.format.bytes_per_frame();

        Ok(Self {
            socket,
            interface,
            config,
            clock,
            header,
            producer,
            scratch: vec![0u8; bytes_per_packet],
        })
    }

    pub fn interface_address(&self) -> Ipv4Addr {
        self.interface
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    /// Runs the paced send loop until `shutdown` flips to true.
    ///
    /// Transmission starts at the current media clock position; the RTP
    /// timestamp advances by `framecount` per packet from there.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let rate = self.config.format.sample_rate;
        let ptime_seconds = self.config.framecount as f64 / rate as f64;
        let tick_duration = Duration::from_secs_f64((ptime_seconds / 10.0).max(0.000_1));

        self.header.timestamp = self.clock.now().to_rtp_timestamp(rate);
        info!(
            "📡 RTP sender -> {} starting at timestamp {}",
            self.config.destination, self.header.timestamp
        );

        let needs_swap = self.config.format.byte_order == ByteOrder::Le;
        let bytes_per_sample = self.config.format.bytes_per_sample();
        let mut out = BytesMut::with_capacity(self.scratch.len() + 16);
        let mut tick = tokio::time::interval(tick_duration);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let now_samples =
                WrappingU32(self.clock.now().to_rtp_timestamp(rate));

            for _ in 0..MAX_PACKETS_PER_TICK {
                if now_samples.is_before(WrappingU32(self.header.timestamp)) {
                    break;
                }

                if !assemble_packet(
                    &mut self.header,
                    &mut self.producer,
                    &mut self.scratch,
                    needs_swap,
                    bytes_per_sample,
                    self.config.framecount,
                    &mut out,
                ) {
                    debug!("producer provided no data");
                    break;
                }

                if let Err(e) = self.socket.send_to(&out, self.config.destination).await {
                    warn!("RTP send failed: {e}");
                    break;
                }
                trace!(
                    "sent RTP packet seq={} ts={}",
                    self.header.sequence_number.wrapping_sub(1),
                    self.header.timestamp.wrapping_sub(self.config.framecount)
                );
            }
        }

        info!("RTP sender -> {} stopped", self.config.destination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::packet::RtpPacketView;

    #[test]
    fn test_assemble_packet_advances_header() {
        let mut header = RtpHeader::new(97, 7);
        header.sequence_number = 100;
        header.timestamp = 4800;

        let mut producer: ProducerFn = Box::new(|ts, buf: &mut [u8]| {
            buf.fill((ts % 251) as u8);
            true
        });

        let mut scratch = vec![0u8; 12];
        let mut out = BytesMut::new();
        assert!(assemble_packet(
            &mut header,
            &mut producer,
            &mut scratch,
            false,
            3,
            2,
            &mut out
        ));

        let view = RtpPacketView::parse(&out).unwrap();
        assert_eq!(view.sequence_number(), 100);
        assert_eq!(view.timestamp(), 4800);
        assert_eq!(view.payload(), &[(4800u32 % 251) as u8; 12][..]);

        // Header advanced for the next packet
        assert_eq!(header.sequence_number, 101);
        assert_eq!(header.timestamp, 4802);
    }

    #[test]
    fn test_assemble_packet_swaps_byte_order() {
        let mut header = RtpHeader::new(97, 7);
        let mut producer: ProducerFn = Box::new(|_, buf: &mut [u8]| {
            buf.copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
            true
        });

        let mut scratch = vec![0u8; 4];
        let mut out = BytesMut::new();
        assert!(assemble_packet(
            &mut header,
            &mut producer,
            &mut scratch,
            true,
            2,
            2,
            &mut out
        ));

        let view = RtpPacketView::parse(&out).unwrap();
        assert_eq!(view.payload(), &[0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn test_ring_producer_underrun_skips_packet() {
        let ring = Arc::new(SpscRing::new(64));
        let mut producer = ring_producer(ring.clone());
        let mut buf = [0u8; 8];

        // Not enough buffered yet
        ring.write(&[1, 2, 3, 4]);
        assert!(!producer(0, &mut buf));

        ring.write(&[5, 6, 7, 8]);
        assert!(producer(0, &mut buf));
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_block_producer_takes_freshest_block() {
        let blocks = Arc::new(TripleBuffer::<Vec<u8>>::new());
        let mut producer = block_producer(blocks.clone());
        let mut buf = [0u8; 4];

        // Nothing published yet
        assert!(!producer(0, &mut buf));

        blocks.write(|block| *block = vec![1, 1, 1, 1]);
        blocks.write(|block| *block = vec![2, 2, 2, 2]);
        assert!(producer(0, &mut buf));
        assert_eq!(buf, [2, 2, 2, 2]);

        // Stale again until the next publish
        assert!(!producer(0, &mut buf));
    }

    #[test]
    fn test_assemble_packet_respects_empty_producer() {
        let mut header = RtpHeader::new(97, 7);
        header.sequence_number = 5;
        let mut producer: ProducerFn = Box::new(|_, _buf: &mut [u8]| false);

        let mut scratch = vec![0u8; 4];
        let mut out = BytesMut::new();
        assert!(!assemble_packet(
            &mut header,
            &mut producer,
            &mut scratch,
            false,
            2,
            2,
            &mut out
        ));
        // Nothing advanced
        assert_eq!(header.sequence_number, 5);
    }
}
