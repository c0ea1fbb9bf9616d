//! RTP data plane
//!
//! UDP transport, packet codec, per-stream statistics, jitter buffering
//! and the paced sender. Sessions are classified by destination address,
//! source address, destination port and SSRC.

mod filter;
mod jitter;
mod packet;
mod receiver;
mod sender;
mod socket;
mod stats;

pub use filter::RtpFilter;
pub use jitter::JitterBuffer;
pub use packet::{RtpHeader, RtpPacketView, RTP_HEADER_SIZE};
pub use receiver::{
    RtpPacketEvent, RtpReceiver, RtpSessionId, RtpSessionParams, SubscriptionId,
};
pub use sender::{block_producer, ring_producer, ProducerFn, RtpSenderConfig, RtpStreamSender};
pub use socket::{RecvInfo, UdpExtSocket};
pub use stats::{RtpPacketStats, RtpStatsCounters};
