//! Error types
//!
//! Three kinds of failures exist in the node: validation errors from the
//! wire codecs (count and drop, never crash), transient I/O errors (retried
//! by the async layer) and fatal configuration errors (returned to the
//! caller from setup).

use thiserror::Error;

/// Errors produced by the PTP message codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PtpError {
    #[error("invalid data")]
    InvalidData,
    #[error("not enough data")]
    NotEnoughData,
    #[error("invalid message length")]
    InvalidMessageLength,
}

/// Errors produced when validating RTP packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtpError {
    #[error("packet too short")]
    TooShort,
    #[error("unsupported RTP version")]
    BadVersion,
    #[error("header exceeds packet bounds")]
    BadLength,
}

/// Errors produced by the RTSP message parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtspError {
    #[error("bad method")]
    BadMethod,
    #[error("bad uri")]
    BadUri,
    #[error("bad protocol")]
    BadProtocol,
    #[error("bad version")]
    BadVersion,
    #[error("bad status code")]
    BadStatus,
    #[error("bad header")]
    BadHeader,
    #[error("bad end of headers")]
    BadEndOfHeaders,
}

/// Errors produced by the SDP parser/generator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sdp: {0}")]
pub struct SdpError(pub String);

impl SdpError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Top-level error type for node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ptp: {0}")]
    Ptp(#[from] PtpError),

    #[error("rtp: {0}")]
    Rtp(#[from] RtpError),

    #[error("rtsp: {0}")]
    Rtsp(#[from] RtspError),

    #[error(transparent)]
    Sdp(#[from] SdpError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration: {0}")]
    Config(String),

    #[error("session rejected: {0}")]
    SessionRejected(String),

    #[error("operation aborted")]
    OperationAborted,

    #[error("node is not running")]
    NotRunning,
}

pub type NodeResult<T> = Result<T, NodeError>;
