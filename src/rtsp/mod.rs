//! RTSP control plane
//!
//! Message codec, connection framing with pipelining, and the multi-peer
//! client/server used for RAVENNA session negotiation.

mod client;
mod connection;
mod message;
mod parser;
mod server;

pub use client::RtspClient;
pub use connection::RtspConnection;
pub use message::{RtspHeaders, RtspMessage, RtspRequest, RtspResponse};
pub use parser::{ParseStatus, RtspParser};
pub use server::{RtspHandler, RtspServer, ALL_PATH};
