//! PTP (IEEE 1588) Engine
//!
//! Best Master Clock Algorithm participant and clock servo for AES67.
//! The node runs one PTP port per interface; all subsystems read time from
//! the disciplined [`PtpClock`].

pub mod bmca;
pub mod datasets;
pub mod messages;
pub mod port;
pub mod servo;
pub mod time;

pub use datasets::{PtpClockIdentity, PtpClockQuality, PtpPortIdentity};
pub use port::{ParentChangedEvent, PtpConfig, PtpInstance, PtpPortState, PtpSockets};
pub use servo::PtpClock;
pub use time::{PtpTimeInterval, PtpTimestamp};
